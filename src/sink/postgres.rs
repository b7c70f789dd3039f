//! PostgreSQL result sink.
//!
//! Writes metadata into the `links` table owned by the content service and,
//! when a Redis connection is attached, publishes a small event so realtime
//! subscribers of the post can refresh its preview.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

use super::ResultSink;
use crate::error::SinkError;
use crate::fetcher::LinkMetadata;

/// Stores metadata in `links.metadata` (JSONB), keyed by link id.
pub struct PostgresSink {
    pool: PgPool,
    publisher: Option<Publisher>,
}

struct Publisher {
    redis: ConnectionManager,
    channel_prefix: String,
}

impl PostgresSink {
    /// Connects to the database.
    ///
    /// # Arguments
    ///
    /// * `database_url` - PostgreSQL connection string
    pub async fn connect(database_url: &str) -> Result<Self, SinkError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await?;

        Ok(Self::from_pool(pool))
    }

    /// Creates a sink from an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            publisher: None,
        }
    }

    /// Publishes an event to `{channel_prefix}:post:{post_id}` after each
    /// successful write.
    pub fn with_publisher(
        mut self,
        redis: ConnectionManager,
        channel_prefix: impl Into<String>,
    ) -> Self {
        self.publisher = Some(Publisher {
            redis,
            channel_prefix: channel_prefix.into(),
        });
        self
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Channel a post's link updates are published on.
pub fn post_channel(prefix: &str, post_id: Uuid) -> String {
    format!("{}:post:{}", prefix, post_id)
}

#[async_trait]
impl ResultSink for PostgresSink {
    async fn persist(&self, link_id: Uuid, metadata: &LinkMetadata) -> Result<(), SinkError> {
        let metadata_json = serde_json::to_value(metadata)?;

        let result = sqlx::query(
            r#"
            UPDATE links
            SET metadata = $2,
                metadata_fetched_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(link_id)
        .bind(&metadata_json)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SinkError::NotFound(link_id));
        }

        Ok(())
    }

    async fn notify(
        &self,
        post_id: Uuid,
        link_id: Uuid,
        metadata: &LinkMetadata,
    ) -> Result<(), SinkError> {
        let Some(publisher) = &self.publisher else {
            return Ok(());
        };

        let event = serde_json::json!({
            "event": "link_metadata_updated",
            "post_id": post_id,
            "link_id": link_id,
            "metadata": metadata,
        });

        let mut conn = publisher.redis.clone();
        conn.publish::<_, _, ()>(
            post_channel(&publisher.channel_prefix, post_id),
            serde_json::to_string(&event)?,
        )
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_channel() {
        let post_id = Uuid::nil();
        assert_eq!(
            post_channel("metadata_queue", post_id),
            "metadata_queue:post:00000000-0000-0000-0000-000000000000"
        );
    }
}
