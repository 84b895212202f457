//! The polling ingestion worker.
//!
//! Claims queued url items in short transactions, fetches and extracts with
//! no database locks held, and writes outcomes back through the store. Safe
//! to run as any number of independent processes; the claim transaction is
//! the only coordination between them.

pub mod config;
pub mod process;

use std::time::Duration;

use log::{error, info};
use readable::HttpFetcher;

pub use crate::config::WorkerConfig;
pub use crate::process::{WorkerError, build_outcome, claim_and_process_batch, process_item};

#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum WorkerSetupError {
    #[error("couldn't build database connection pool")]
    Pool(#[from] nudge_db::PoolError),

    #[error("couldn't build HTTP client")]
    HttpClient(#[from] reqwest::Error),
}

#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum RunError {
    #[error(transparent)]
    Setup(#[from] WorkerSetupError),

    #[error(transparent)]
    Worker(#[from] WorkerError),
}

/// Run exactly one claim-and-process batch and return how many items it
/// claimed. Used by the `--once` worker mode and by the dev-mode nudge after
/// item creation.
pub async fn run_once(config: &WorkerConfig) -> Result<usize, RunError> {
    let (pool, fetcher) = setup(config)?;
    Ok(claim_and_process_batch(&pool, &fetcher, config).await?)
}

/// The production loop: poll, process, sleep when the queue is empty.
pub async fn run_forever(config: WorkerConfig) -> Result<(), WorkerSetupError> {
    info!(
        "worker_start poll_seconds={} batch_size={} connect_timeout={} read_timeout={} max_bytes={}",
        config.poll_seconds,
        config.batch_size,
        config.http_connect_timeout,
        config.http_read_timeout,
        config.max_bytes,
    );

    let (pool, fetcher) = setup(&config)?;

    loop {
        let processed = match claim_and_process_batch(&pool, &fetcher, &config).await {
            Ok(processed) => processed,
            Err(err) => {
                // Transient claim-phase failures (database restarts and the
                // like) should not kill the worker; resume polling.
                error!("worker tick failed: {err}");
                0
            }
        };

        if processed == 0 {
            tokio::time::sleep(Duration::from_secs(config.poll_seconds)).await;
        } else {
            // Small yield to avoid a tight loop when the backlog is large.
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

fn setup(config: &WorkerConfig) -> Result<(nudge_db::ConnectionPool, HttpFetcher), WorkerSetupError> {
    let pool = nudge_db::get_pool(config.db_pool_size)?;
    let fetcher = HttpFetcher::new(&config.fetch_config())?;
    Ok((pool, fetcher))
}
