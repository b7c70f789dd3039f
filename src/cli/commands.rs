//! CLI command definitions for linkmeta.
//!
//! `enqueue` is a producer, `work` runs the worker pool until Ctrl-C, and
//! `stats`, `peek` and `requeue` are operator tools for the queue.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use redis::aio::ConnectionManager;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::fetcher::HttpMetadataFetcher;
use crate::metrics::{export_metrics, init_metrics, MetricsCollector};
use crate::scheduler::config::{resolve_worker_count, DEFAULT_QUEUE_NAME, DEFAULT_REDIS_URL};
use crate::scheduler::{JobQueue, MetadataJob, QueueConfig, WorkerPool, WorkerPoolConfig};
use crate::sink::{MemorySink, PostgresSink, ResultSink};

/// Default interval between queue depth reports while working.
const DEFAULT_REPORT_INTERVAL_SECS: u64 = 30;

/// Default number of in-flight jobs shown by `peek`.
const DEFAULT_PEEK_LIMIT: usize = 10;

/// Background link-metadata fetcher.
#[derive(Parser)]
#[command(name = "linkmeta")]
#[command(about = "Queue and fetch link-preview metadata in the background")]
#[command(version)]
#[command(
    long_about = "linkmeta keeps a Redis-backed queue of links whose preview metadata (title, description, type) must be fetched, and runs a pool of workers that drain it.\n\nExample usage:\n  linkmeta enqueue --post-id <uuid> https://example.com\n  linkmeta work --workers 4 --database-url postgres://localhost/app"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Redis connection URL.
    #[arg(long, env = "REDIS_URL", default_value = DEFAULT_REDIS_URL, global = true)]
    pub redis_url: String,

    /// Prefix for the queue's Redis keys.
    #[arg(long, env = "METADATA_QUEUE_NAME", default_value = DEFAULT_QUEUE_NAME, global = true)]
    pub queue_name: String,
}

impl Cli {
    fn queue_config(&self) -> anyhow::Result<QueueConfig> {
        let config =
            QueueConfig::new(self.redis_url.clone()).with_queue_name(self.queue_name.clone());
        config.validate()?;
        Ok(config)
    }
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Enqueue metadata jobs for one post's links.
    Enqueue(EnqueueArgs),

    /// Run the worker pool until Ctrl-C.
    Work(WorkArgs),

    /// Show pending and in-flight job counts.
    Stats(StatsArgs),

    /// List the oldest in-flight jobs with their ages.
    Peek(PeekArgs),

    /// Move every in-flight job back to pending.
    ///
    /// Only safe while no worker is running against this queue: jobs that
    /// are still being processed would be delivered twice.
    Requeue(RequeueArgs),
}

/// Arguments for `linkmeta enqueue`.
#[derive(Parser, Debug)]
pub struct EnqueueArgs {
    /// Post the links belong to.
    #[arg(long)]
    pub post_id: Uuid,

    /// Link id to use; only allowed with a single URL. Generated when omitted.
    #[arg(long)]
    pub link_id: Option<Uuid>,

    /// URLs to fetch metadata for.
    #[arg(required = true)]
    pub urls: Vec<String>,

    /// Output in JSON format.
    #[arg(short, long)]
    pub json: bool,
}

/// Arguments for `linkmeta work`.
#[derive(Parser, Debug)]
pub struct WorkArgs {
    /// Number of workers; zero or negative uses the default. Overrides METADATA_WORKERS.
    #[arg(short = 'w', long, allow_negative_numbers = true)]
    pub workers: Option<i64>,

    /// Fetch timeout in seconds. Overrides METADATA_FETCH_TIMEOUT_SECS.
    #[arg(long)]
    pub fetch_timeout: Option<u64>,

    /// Reserve timeout in seconds. Overrides METADATA_RESERVE_TIMEOUT_SECS.
    #[arg(long)]
    pub reserve_timeout: Option<u64>,

    /// Graceful shutdown timeout in seconds. Overrides METADATA_SHUTDOWN_TIMEOUT_SECS.
    #[arg(long)]
    pub shutdown_timeout: Option<u64>,

    /// Requeue all in-flight jobs before starting. Only safe for a single worker process.
    #[arg(long)]
    pub recover_on_start: bool,

    /// PostgreSQL URL for storing metadata. Results stay in memory when omitted.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Publish updates to `{prefix}:post:{post_id}` on the queue's Redis.
    #[arg(long, env = "METADATA_PUBLISH_PREFIX")]
    pub publish_prefix: Option<String>,

    /// Seconds between queue depth reports.
    #[arg(long, default_value_t = DEFAULT_REPORT_INTERVAL_SECS)]
    pub report_interval: u64,

    /// Print Prometheus metrics on exit.
    #[arg(long)]
    pub print_metrics: bool,
}

impl WorkArgs {
    /// Builds the pool configuration: environment first, then flags.
    fn pool_config(&self) -> anyhow::Result<WorkerPoolConfig> {
        let mut config = WorkerPoolConfig::from_env()?;

        if let Some(workers) = self.workers {
            config.num_workers = resolve_worker_count(workers);
        }
        if let Some(secs) = self.fetch_timeout {
            config.fetch_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.reserve_timeout {
            config.reserve_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.shutdown_timeout {
            config.shutdown_timeout = Duration::from_secs(secs);
        }
        if self.recover_on_start {
            config.recover_on_start = true;
        }

        config.validate()?;
        Ok(config)
    }
}

/// Arguments for `linkmeta stats`.
#[derive(Parser, Debug)]
pub struct StatsArgs {
    /// Output in JSON format.
    #[arg(short, long)]
    pub json: bool,
}

/// Arguments for `linkmeta peek`.
#[derive(Parser, Debug)]
pub struct PeekArgs {
    /// Maximum number of jobs to show.
    #[arg(short = 'n', long, default_value_t = DEFAULT_PEEK_LIMIT)]
    pub limit: usize,

    /// Output in JSON format.
    #[arg(short, long)]
    pub json: bool,
}

/// Arguments for `linkmeta requeue`.
#[derive(Parser, Debug)]
pub struct RequeueArgs {
    /// Confirm that no worker is running against this queue.
    #[arg(long)]
    pub maintenance: bool,

    /// Output in JSON format.
    #[arg(short, long)]
    pub json: bool,
}

/// Parse CLI arguments without running any command.
///
/// Use this to access CLI options (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
///
/// For more control over logging initialization, use `parse_cli()` and `run_with_cli()`.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let queue_config = cli.queue_config()?;

    match cli.command {
        Commands::Enqueue(args) => run_enqueue_command(&queue_config, args).await,
        Commands::Work(args) => run_work_command(&queue_config, args).await,
        Commands::Stats(args) => run_stats_command(&queue_config, args).await,
        Commands::Peek(args) => run_peek_command(&queue_config, args).await,
        Commands::Requeue(args) => run_requeue_command(&queue_config, args).await,
    }
}

// ============================================================================
// Producer
// ============================================================================

#[derive(Debug, Serialize)]
struct EnqueueOutput {
    post_id: Uuid,
    jobs: Vec<EnqueuedJob>,
}

#[derive(Debug, Serialize)]
struct EnqueuedJob {
    link_id: Uuid,
    url: String,
}

/// Builds one job per URL, using `link_id` when a single URL is given.
fn build_jobs(
    post_id: Uuid,
    link_id: Option<Uuid>,
    urls: &[String],
) -> anyhow::Result<Vec<MetadataJob>> {
    if link_id.is_some() && urls.len() > 1 {
        anyhow::bail!("--link-id can only be used with a single URL");
    }

    Ok(urls
        .iter()
        .map(|url| MetadataJob::new(post_id, link_id.unwrap_or_else(Uuid::new_v4), url.clone()))
        .collect())
}

async fn run_enqueue_command(queue_config: &QueueConfig, args: EnqueueArgs) -> anyhow::Result<()> {
    let jobs = build_jobs(args.post_id, args.link_id, &args.urls)?;

    let queue = JobQueue::connect(queue_config)
        .await
        .context("failed to connect to queue")?;
    queue.enqueue_batch(&jobs).await?;

    let output = EnqueueOutput {
        post_id: args.post_id,
        jobs: jobs
            .iter()
            .map(|job| EnqueuedJob {
                link_id: job.link_id,
                url: job.url.clone(),
            })
            .collect(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("Enqueued {} job(s) for post {}", output.jobs.len(), output.post_id);
        for job in &output.jobs {
            println!("  {}  {}", job.link_id, job.url);
        }
    }

    Ok(())
}

// ============================================================================
// Worker
// ============================================================================

async fn build_sink(
    queue_config: &QueueConfig,
    args: &WorkArgs,
) -> anyhow::Result<Arc<dyn ResultSink>> {
    let Some(database_url) = &args.database_url else {
        warn!("No database URL configured; fetched metadata is kept in memory only");
        return Ok(Arc::new(MemorySink::new()));
    };

    let mut sink = PostgresSink::connect(database_url)
        .await
        .context("failed to connect to database")?;

    if let Some(prefix) = &args.publish_prefix {
        let client = redis::Client::open(queue_config.redis_url.as_str())?;
        let publisher = ConnectionManager::new(client)
            .await
            .context("failed to connect publisher to Redis")?;
        sink = sink.with_publisher(publisher, prefix.clone());
    }

    Ok(Arc::new(sink))
}

async fn run_work_command(queue_config: &QueueConfig, args: WorkArgs) -> anyhow::Result<()> {
    init_metrics().context("failed to initialize metrics")?;

    let config = args.pool_config()?;
    let queue = JobQueue::connect(queue_config)
        .await
        .context("failed to connect to queue")?;
    let fetcher = Arc::new(HttpMetadataFetcher::new(config.fetch_timeout)?);
    let sink = build_sink(queue_config, &args).await?;

    let mut pool = WorkerPool::new(config, queue.clone(), fetcher, sink)?;
    pool.start().await?;

    info!(
        workers = pool.num_workers(),
        queue = %queue_config.queue_name,
        "Worker pool running; press Ctrl-C to stop"
    );

    let metrics = MetricsCollector::new();
    let mut ticker = tokio::time::interval(Duration::from_secs(args.report_interval.max(1)));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    warn!(error = %e, "Failed to listen for Ctrl-C; shutting down");
                } else {
                    info!("Received Ctrl-C, shutting down");
                }
                break;
            }
            _ = ticker.tick() => {
                match queue.stats().await {
                    Ok(stats) => {
                        metrics.set_queue_depth(stats.pending_jobs, stats.processing_jobs);
                        info!(
                            pending = stats.pending_jobs,
                            processing = stats.processing_jobs,
                            "Queue depth"
                        );
                    }
                    Err(e) => warn!(error = %e, "Failed to read queue depth"),
                }
            }
        }
    }

    let shutdown = pool.shutdown().await;
    let stats = pool.stats();

    println!("Jobs stored:     {}", stats.jobs_completed);
    println!("Jobs failed:     {}", stats.jobs_failed);
    println!("Success rate:    {:.1}%", stats.success_rate());
    println!("Avg job time:    {:?}", stats.average_job_duration);

    if args.print_metrics {
        print!("{}", export_metrics());
    }

    shutdown?;
    Ok(())
}

// ============================================================================
// Operator tools
// ============================================================================

async fn run_stats_command(queue_config: &QueueConfig, args: StatsArgs) -> anyhow::Result<()> {
    let queue = JobQueue::connect(queue_config)
        .await
        .context("failed to connect to queue")?;
    let stats = queue.stats().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!("Queue:       {}", queue_config.queue_name);
        println!("Pending:     {}", stats.pending_jobs);
        println!("In flight:   {}", stats.processing_jobs);
    }

    Ok(())
}

#[derive(Debug, Serialize)]
struct InFlightJob {
    post_id: Uuid,
    link_id: Uuid,
    url: String,
    created_at: chrono::DateTime<chrono::Utc>,
    age_secs: i64,
}

impl From<MetadataJob> for InFlightJob {
    fn from(job: MetadataJob) -> Self {
        let age_secs = job.age().num_seconds();
        Self {
            post_id: job.post_id,
            link_id: job.link_id,
            url: job.url,
            created_at: job.created_at,
            age_secs,
        }
    }
}

async fn run_peek_command(queue_config: &QueueConfig, args: PeekArgs) -> anyhow::Result<()> {
    let queue = JobQueue::connect(queue_config)
        .await
        .context("failed to connect to queue")?;
    let jobs: Vec<InFlightJob> = queue
        .peek_in_flight(args.limit)
        .await?
        .into_iter()
        .map(InFlightJob::from)
        .collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&jobs)?);
        return Ok(());
    }

    if jobs.is_empty() {
        println!("No jobs in flight.");
        return Ok(());
    }

    println!("Oldest {} in-flight job(s):", jobs.len());
    for job in &jobs {
        println!("  {:>6}s  {}  {}", job.age_secs, job.link_id, job.url);
    }

    Ok(())
}

#[derive(Debug, Serialize)]
struct RequeueOutput {
    requeued: usize,
}

async fn run_requeue_command(queue_config: &QueueConfig, args: RequeueArgs) -> anyhow::Result<()> {
    if !args.maintenance {
        anyhow::bail!(
            "refusing to requeue: jobs still being processed would be delivered twice. \
             Stop every worker on queue '{}' and rerun with --maintenance",
            queue_config.queue_name
        );
    }

    let queue = JobQueue::connect(queue_config)
        .await
        .context("failed to connect to queue")?;
    let output = RequeueOutput {
        requeued: queue.requeue_abandoned().await?,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("Requeued {} job(s)", output.requeued);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        // Verify CLI definition is valid
        Cli::command().debug_assert();
    }

    #[test]
    fn test_enqueue_command() {
        let post_id = Uuid::new_v4();
        let post_id_arg = post_id.to_string();
        let args = vec![
            "linkmeta",
            "enqueue",
            "--post-id",
            post_id_arg.as_str(),
            "https://a.test",
            "https://b.test",
            "--json",
        ];
        let cli = Cli::try_parse_from(args).expect("should parse");

        match cli.command {
            Commands::Enqueue(args) => {
                assert_eq!(args.post_id, post_id);
                assert!(args.link_id.is_none());
                assert_eq!(args.urls, vec!["https://a.test", "https://b.test"]);
                assert!(args.json);
            }
            _ => panic!("Expected Enqueue command"),
        }
    }

    #[test]
    fn test_enqueue_requires_url() {
        let post_id = Uuid::new_v4().to_string();
        let result = Cli::try_parse_from(["linkmeta", "enqueue", "--post-id", post_id.as_str()]);
        assert!(result.is_err());
    }

    #[test]
    fn test_work_command_flags() {
        let args = vec![
            "linkmeta",
            "work",
            "--workers",
            "-1",
            "--fetch-timeout",
            "10",
            "--recover-on-start",
        ];
        let cli = Cli::try_parse_from(args).expect("should parse");

        match cli.command {
            Commands::Work(args) => {
                assert_eq!(args.workers, Some(-1));
                assert_eq!(args.fetch_timeout, Some(10));
                assert!(args.recover_on_start);
                assert_eq!(args.report_interval, DEFAULT_REPORT_INTERVAL_SECS);

                let config = args.pool_config().expect("valid config");
                assert_eq!(config.num_workers, 3);
                assert_eq!(config.fetch_timeout, Duration::from_secs(10));
                assert!(config.recover_on_start);
            }
            _ => panic!("Expected Work command"),
        }
    }

    #[test]
    fn test_work_rejects_zero_fetch_timeout() {
        let cli = Cli::try_parse_from(["linkmeta", "work", "--fetch-timeout", "0"])
            .expect("should parse");

        match cli.command {
            Commands::Work(args) => assert!(args.pool_config().is_err()),
            _ => panic!("Expected Work command"),
        }
    }

    #[test]
    fn test_peek_defaults() {
        let cli = Cli::try_parse_from(["linkmeta", "peek"]).expect("should parse");

        match cli.command {
            Commands::Peek(args) => {
                assert_eq!(args.limit, DEFAULT_PEEK_LIMIT);
                assert!(!args.json);
            }
            _ => panic!("Expected Peek command"),
        }
    }

    #[test]
    fn test_requeue_maintenance_flag() {
        let cli = Cli::try_parse_from(["linkmeta", "requeue"]).expect("should parse");
        match cli.command {
            Commands::Requeue(args) => assert!(!args.maintenance),
            _ => panic!("Expected Requeue command"),
        }

        let cli =
            Cli::try_parse_from(["linkmeta", "requeue", "--maintenance"]).expect("should parse");
        match cli.command {
            Commands::Requeue(args) => assert!(args.maintenance),
            _ => panic!("Expected Requeue command"),
        }
    }

    #[tokio::test]
    async fn test_requeue_without_maintenance_refuses() {
        let config = QueueConfig::default();
        let args = RequeueArgs {
            maintenance: false,
            json: false,
        };

        // Refuses before connecting, so no Redis is needed.
        let err = run_requeue_command(&config, args).await.unwrap_err();
        assert!(err.to_string().contains("--maintenance"));
    }

    #[test]
    fn test_build_jobs() {
        let post_id = Uuid::new_v4();
        let link_id = Uuid::new_v4();
        let urls = vec!["https://a.test".to_string()];

        let jobs = build_jobs(post_id, Some(link_id), &urls).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].link_id, link_id);
        assert_eq!(jobs[0].post_id, post_id);

        let two = vec!["https://a.test".to_string(), "https://b.test".to_string()];
        assert!(build_jobs(post_id, Some(link_id), &two).is_err());

        let jobs = build_jobs(post_id, None, &two).unwrap();
        assert_ne!(jobs[0].link_id, jobs[1].link_id);
    }
}
