//! Link metadata fetching.
//!
//! Workers see a fetcher only through [`MetadataFetcher`]. The pool wraps
//! every call in its own timeout, so implementations must be cancellation
//! safe: dropping the returned future abandons the fetch.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::FetchError;

mod http;

pub use http::{HttpMetadataFetcher, MetadataParser};

/// Preview metadata scraped from a link.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkMetadata {
    /// Page title (`og:title`, falling back to `<title>`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Short description (`og:description` or `description`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Content type (`og:type`, e.g. "article", "video.movie").
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Preview image URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Name of the site.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_name: Option<String>,
    /// Canonical URL reported by the page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_url: Option<String>,
}

impl LinkMetadata {
    /// Returns whether nothing useful for a preview was found.
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none()
    }
}

/// Something that can turn a URL into preview metadata.
#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    /// Fetches metadata for `url`.
    async fn fetch(&self, url: &str) -> Result<LinkMetadata, FetchError>;
}
