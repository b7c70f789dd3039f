//! Integration tests for the worker pool.
//!
//! Uses the in-memory store and sink with scripted fetchers, so no network,
//! Redis or database is needed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use linkmeta::error::FetchError;
use linkmeta::fetcher::{LinkMetadata, MetadataFetcher};
use linkmeta::scheduler::{
    JobOutcome, JobQueue, JobReport, MemoryStore, MetadataJob, PoolError, QueueError, QueueStore,
    WorkerPool, WorkerPoolConfig, WorkerState,
};
use linkmeta::sink::MemorySink;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Fails for URLs containing "fail", hangs for "hang", succeeds otherwise.
struct ScriptedFetcher {
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl MetadataFetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str) -> Result<LinkMetadata, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if url.contains("fail") {
            return Err(FetchError::BadStatus {
                url: url.to_string(),
                status: 500,
            });
        }
        if url.contains("hang") {
            std::future::pending::<()>().await;
        }

        Ok(LinkMetadata {
            title: Some(format!("Title for {url}")),
            description: Some("A page".to_string()),
            kind: Some("website".to_string()),
            ..Default::default()
        })
    }
}

/// Takes the job at once but answers late, like a blocking move whose reply
/// is still in transit. Not cancel safe.
struct SlowReplyStore {
    inner: MemoryStore,
    reply_delay: Duration,
}

#[async_trait]
impl QueueStore for SlowReplyStore {
    async fn push_pending(&self, payloads: &[String]) -> Result<(), QueueError> {
        self.inner.push_pending(payloads).await
    }

    async fn move_to_processing(&self, timeout: Duration) -> Result<Option<String>, QueueError> {
        let moved = self.inner.move_to_processing(timeout).await?;
        tokio::time::sleep(self.reply_delay).await;
        Ok(moved)
    }

    async fn remove_processing(&self, payload: &str) -> Result<usize, QueueError> {
        self.inner.remove_processing(payload).await
    }

    async fn requeue_processing(&self) -> Result<usize, QueueError> {
        self.inner.requeue_processing().await
    }

    async fn peek_processing(&self, limit: usize) -> Result<Vec<String>, QueueError> {
        self.inner.peek_processing(limit).await
    }

    async fn pending_len(&self) -> Result<usize, QueueError> {
        self.inner.pending_len().await
    }

    async fn processing_len(&self) -> Result<usize, QueueError> {
        self.inner.processing_len().await
    }

    async fn clear(&self) -> Result<(), QueueError> {
        self.inner.clear().await
    }
}

fn test_config(workers: i64) -> WorkerPoolConfig {
    WorkerPoolConfig::new(workers)
        .with_reserve_timeout(Duration::from_millis(100))
        .with_fetch_timeout(Duration::from_millis(200))
        .with_shutdown_timeout(Duration::from_secs(5))
}

fn job(url: &str) -> MetadataJob {
    MetadataJob::new(Uuid::new_v4(), Uuid::new_v4(), url)
}

async fn next_report(reports: &mut broadcast::Receiver<JobReport>) -> JobReport {
    tokio::time::timeout(Duration::from_secs(5), reports.recv())
        .await
        .expect("report within timeout")
        .expect("report channel open")
}

#[tokio::test]
async fn test_failed_fetch_is_acknowledged_and_pool_continues() {
    let queue = JobQueue::new(Arc::new(MemoryStore::new()));
    let sink = MemorySink::new();
    let fetcher = ScriptedFetcher::new();

    let mut pool = WorkerPool::new(
        test_config(1),
        queue.clone(),
        fetcher.clone(),
        Arc::new(sink.clone()),
    )
    .expect("pool");
    let mut reports = pool.subscribe_reports();
    pool.start().await.expect("start");

    let failing = job("https://fail.test");
    let working = job("https://ok.test");
    queue.enqueue(&failing).await.unwrap();
    queue.enqueue(&working).await.unwrap();

    let first = next_report(&mut reports).await;
    assert_eq!(first.link_id, failing.link_id);
    assert_eq!(first.outcome, JobOutcome::FetchFailed);
    assert!(first.error.is_some());

    let second = next_report(&mut reports).await;
    assert_eq!(second.link_id, working.link_id);
    assert_eq!(second.outcome, JobOutcome::Stored);

    pool.shutdown().await.expect("shutdown");

    // Failed jobs are not retried.
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    assert_eq!(queue.stats().await.unwrap().total_jobs(), 0);
    assert!(sink.get(failing.link_id).is_none());
    assert!(sink.get(working.link_id).is_some());

    let stats = pool.stats();
    assert_eq!(stats.jobs_completed, 1);
    assert_eq!(stats.jobs_failed, 1);
}

#[tokio::test]
async fn test_stored_metadata_reaches_sink() {
    let queue = JobQueue::new(Arc::new(MemoryStore::new()));
    let sink = MemorySink::new();

    let mut pool = WorkerPool::new(
        test_config(2),
        queue.clone(),
        ScriptedFetcher::new(),
        Arc::new(sink.clone()),
    )
    .expect("pool");
    let mut reports = pool.subscribe_reports();
    pool.start().await.expect("start");

    let jobs: Vec<MetadataJob> = (0..4).map(|i| job(&format!("https://{i}.test"))).collect();
    queue.enqueue_batch(&jobs).await.unwrap();

    for _ in 0..jobs.len() {
        assert!(next_report(&mut reports).await.is_success());
    }
    pool.shutdown().await.expect("shutdown");

    assert_eq!(sink.len(), 4);
    for j in &jobs {
        let stored = sink.get(j.link_id).expect("stored metadata");
        assert_eq!(stored.title, Some(format!("Title for {}", j.url)));
        assert_eq!(stored.kind.as_deref(), Some("website"));
    }
    assert_eq!(sink.notifications().len(), 4);
}

#[tokio::test]
async fn test_hanging_fetch_times_out() {
    let queue = JobQueue::new(Arc::new(MemoryStore::new()));
    let sink = MemorySink::new();

    let mut pool = WorkerPool::new(
        test_config(1),
        queue.clone(),
        ScriptedFetcher::new(),
        Arc::new(sink.clone()),
    )
    .expect("pool");
    let mut reports = pool.subscribe_reports();
    pool.start().await.expect("start");

    let slow = job("https://hang.test");
    queue.enqueue(&slow).await.unwrap();

    let report = next_report(&mut reports).await;
    assert_eq!(report.link_id, slow.link_id);
    assert_eq!(report.outcome, JobOutcome::TimedOut);

    pool.shutdown().await.expect("shutdown");
    assert_eq!(queue.processing_len().await.unwrap(), 0);
    assert!(sink.is_empty());
}

#[tokio::test]
async fn test_unknown_link_is_terminal() {
    let queue = JobQueue::new(Arc::new(MemoryStore::new()));
    let sink = MemorySink::with_known_links(Vec::<Uuid>::new());

    let mut pool = WorkerPool::new(
        test_config(1),
        queue.clone(),
        ScriptedFetcher::new(),
        Arc::new(sink.clone()),
    )
    .expect("pool");
    let mut reports = pool.subscribe_reports();
    pool.start().await.expect("start");

    queue.enqueue(&job("https://deleted.test")).await.unwrap();

    let report = next_report(&mut reports).await;
    assert_eq!(report.outcome, JobOutcome::LinkNotFound);

    pool.shutdown().await.expect("shutdown");
    assert_eq!(queue.stats().await.unwrap().total_jobs(), 0);
}

#[tokio::test]
async fn test_idle_pool_shuts_down_promptly() {
    let queue = JobQueue::new(Arc::new(MemoryStore::new()));
    // Reserve timeout far longer than the expected shutdown time.
    let config = test_config(4).with_reserve_timeout(Duration::from_secs(30));

    let mut pool = WorkerPool::new(
        config,
        queue,
        ScriptedFetcher::new(),
        Arc::new(MemorySink::new()),
    )
    .expect("pool");
    pool.start().await.expect("start");
    assert!(pool.is_running());
    assert_eq!(pool.num_workers(), 4);

    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    pool.shutdown().await.expect("shutdown");

    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!pool.is_running());
    assert!(pool
        .worker_states()
        .iter()
        .all(|state| *state == WorkerState::Stopped));
}

#[tokio::test]
async fn test_non_positive_worker_count_uses_default() {
    let queue = JobQueue::new(Arc::new(MemoryStore::new()));

    for requested in [0, -5] {
        let pool = WorkerPool::new(
            test_config(requested),
            queue.clone(),
            ScriptedFetcher::new(),
            Arc::new(MemorySink::new()),
        )
        .expect("pool");
        assert_eq!(pool.num_workers(), 3);
    }
}

#[tokio::test]
async fn test_start_twice_and_shutdown_when_stopped() {
    let queue = JobQueue::new(Arc::new(MemoryStore::new()));
    let mut pool = WorkerPool::new(
        test_config(1),
        queue,
        ScriptedFetcher::new(),
        Arc::new(MemorySink::new()),
    )
    .expect("pool");

    assert!(matches!(pool.shutdown().await, Err(PoolError::NotRunning)));

    pool.start().await.expect("start");
    assert!(matches!(pool.start().await, Err(PoolError::AlreadyRunning)));

    pool.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_recover_on_start_requeues_in_flight_jobs() {
    let queue = JobQueue::new(Arc::new(MemoryStore::new()));
    let sink = MemorySink::new();

    let abandoned = job("https://abandoned.test");
    queue.enqueue(&abandoned).await.unwrap();
    let _ = queue
        .reserve(Duration::from_millis(10))
        .await
        .unwrap()
        .expect("job");
    assert_eq!(queue.processing_len().await.unwrap(), 1);

    let config = test_config(1).with_recover_on_start(true);
    let mut pool = WorkerPool::new(
        config,
        queue.clone(),
        ScriptedFetcher::new(),
        Arc::new(sink.clone()),
    )
    .expect("pool");
    let mut reports = pool.subscribe_reports();
    pool.start().await.expect("start");

    let report = next_report(&mut reports).await;
    assert_eq!(report.link_id, abandoned.link_id);
    assert!(report.is_success());

    pool.shutdown().await.expect("shutdown");
    assert_eq!(queue.stats().await.unwrap().total_jobs(), 0);
}

#[tokio::test]
async fn test_shutdown_during_blocking_reserve_strands_no_job() {
    let store = SlowReplyStore {
        inner: MemoryStore::new(),
        reply_delay: Duration::from_millis(300),
    };
    let queue = JobQueue::new(Arc::new(store));
    assert!(!queue.reserve_is_cancel_safe());
    let sink = MemorySink::new();

    let pending = job("https://in-transit.test");
    queue.enqueue(&pending).await.unwrap();

    let mut pool = WorkerPool::new(
        test_config(1),
        queue.clone(),
        ScriptedFetcher::new(),
        Arc::new(sink.clone()),
    )
    .expect("pool");
    pool.start().await.expect("start");

    // The worker has moved the job and is still waiting for the reply.
    tokio::time::sleep(Duration::from_millis(50)).await;
    pool.shutdown().await.expect("shutdown");

    assert_eq!(queue.processing_len().await.unwrap(), 0);
    assert_eq!(queue.len().await.unwrap(), 0);
    assert!(sink.get(pending.link_id).is_some());
}

#[tokio::test]
async fn test_zero_worker_config_uses_default() {
    let queue = JobQueue::new(Arc::new(MemoryStore::new()));
    let mut config = test_config(1);
    config.num_workers = 0;

    let pool = WorkerPool::new(
        config,
        queue,
        ScriptedFetcher::new(),
        Arc::new(MemorySink::new()),
    )
    .expect("zero workers means the default");
    assert_eq!(pool.num_workers(), 3);
}
