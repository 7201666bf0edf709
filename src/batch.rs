//! Bounded-concurrency processing of many endpoints.
//!
//! The [`BatchEngine`] either warms the cache for a list of endpoints
//! ([`BatchEngine::sync_endpoints`]) or describes each of them
//! ([`BatchEngine::describe_endpoints`]). A semaphore permit is acquired
//! before each task is spawned, so at most `concurrency` endpoints are in
//! flight. Failures of single endpoints are logged and counted; they never
//! abort the batch.
//!
//! # Example
//!
//! ```no_run
//! use oai_mirror::{BatchEngine, Config, DEFAULT_WORKERS};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::default();
//! let engine = BatchEngine::new(DEFAULT_WORKERS)?;
//! let endpoints = vec!["https://example.org/oai".to_string()];
//! let stats = engine.sync_endpoints(&config.harvester()?, endpoints).await?;
//! println!("completed: {}, failed: {}", stats.completed(), stats.failed());
//! # Ok(())
//! # }
//! ```

use std::io::{self, BufRead};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, info, instrument, warn};

use crate::harvest::Harvester;
use crate::info::{Describer, RepositoryInfo};
use crate::protocol::{Request, Verb};

const MIN_CONCURRENCY: usize = 1;

const MAX_CONCURRENCY: usize = 64;

/// Default number of endpoints processed at once.
pub const DEFAULT_WORKERS: usize = 8;

/// Error type for batch operations.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The rejected value.
        value: usize,
    },

    /// Semaphore was closed unexpectedly.
    #[error("semaphore closed unexpectedly")]
    SemaphoreClosed,
}

/// Outcome counters of a batch run.
#[derive(Debug, Default)]
pub struct BatchStats {
    completed: AtomicUsize,
    failed: AtomicUsize,
}

impl BatchStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Endpoints processed, successful or not.
    #[must_use]
    pub fn total(&self) -> usize {
        self.completed() + self.failed()
    }

    fn increment_completed(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    fn snapshot(&self) -> Self {
        Self {
            completed: AtomicUsize::new(self.completed()),
            failed: AtomicUsize::new(self.failed()),
        }
    }
}

/// Runs per-endpoint work with bounded concurrency.
#[derive(Debug)]
pub struct BatchEngine {
    semaphore: Arc<Semaphore>,
    concurrency: usize,
}

impl BatchEngine {
    /// Creates an engine running at most `concurrency` endpoints at once.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::InvalidConcurrency`] outside 1..=64.
    #[instrument(level = "debug")]
    pub fn new(concurrency: usize) -> Result<Self, BatchError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(BatchError::InvalidConcurrency { value: concurrency });
        }
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
        })
    }

    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Harvests `ListRecords` with default arguments for every endpoint,
    /// discarding the output. Only the cache side effect remains.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::SemaphoreClosed`] if the semaphore is closed.
    /// Individual harvest failures are counted, not returned.
    #[instrument(skip(self, harvester, endpoints), fields(endpoints = endpoints.len()))]
    pub async fn sync_endpoints(
        &self,
        harvester: &Harvester,
        endpoints: Vec<String>,
    ) -> Result<BatchStats, BatchError> {
        let stats = Arc::new(BatchStats::new());
        let mut handles = Vec::new();

        for endpoint in endpoints {
            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| BatchError::SemaphoreClosed)?;
            let harvester = harvester.clone();
            let stats = Arc::clone(&stats);

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let request = Request::new(endpoint.as_str(), Verb::ListRecords);
                let mut sink = io::sink();
                match harvester.harvest(&request, &mut sink).await {
                    Ok(harvest) => {
                        info!(
                            endpoint = %endpoint,
                            windows = harvest.windows,
                            fetched = harvest.fetched,
                            "endpoint synced"
                        );
                        stats.increment_completed();
                    }
                    Err(error) => {
                        warn!(endpoint = %endpoint, error = %error, "endpoint sync failed");
                        stats.increment_failed();
                    }
                }
            }));
        }

        debug!(task_count = handles.len(), "waiting for sync tasks");
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "sync task panicked");
                stats.increment_failed();
            }
        }

        info!(
            completed = stats.completed(),
            failed = stats.failed(),
            "sync complete"
        );
        Ok(stats.snapshot())
    }

    /// Describes every endpoint and hands each result to `on_result` as it
    /// arrives. Partial results after a timeout are delivered too.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::SemaphoreClosed`] if the semaphore is closed.
    #[instrument(skip(self, describer, endpoints, on_result), fields(endpoints = endpoints.len()))]
    pub async fn describe_endpoints<F>(
        &self,
        describer: &Describer,
        endpoints: Vec<String>,
        timeout: Duration,
        mut on_result: F,
    ) -> Result<BatchStats, BatchError>
    where
        F: FnMut(RepositoryInfo),
    {
        let stats = Arc::new(BatchStats::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handles = Vec::new();

        for endpoint in endpoints {
            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| BatchError::SemaphoreClosed)?;
            while let Ok(info) = rx.try_recv() {
                on_result(info);
            }

            let describer = describer.clone();
            let stats = Arc::clone(&stats);
            let tx = tx.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let info = match describer.describe(&endpoint, timeout).await {
                    Ok(info) => {
                        stats.increment_completed();
                        info
                    }
                    Err(timed_out) => {
                        warn!(endpoint = %endpoint, error = %timed_out, "partial repository info");
                        stats.increment_failed();
                        timed_out.into_info()
                    }
                };
                // The receiver lives until every task has been joined.
                let _ = tx.send(info);
            }));
        }
        drop(tx);

        while let Some(info) = rx.recv().await {
            on_result(info);
        }
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "describe task panicked");
                stats.increment_failed();
            }
        }

        info!(
            completed = stats.completed(),
            failed = stats.failed(),
            "describe batch complete"
        );
        Ok(stats.snapshot())
    }
}

/// Reads one endpoint per line, skipping blank lines and `#` comments.
///
/// # Errors
///
/// Returns the underlying IO error if reading fails.
pub fn read_endpoint_list<R: BufRead>(reader: R) -> io::Result<Vec<String>> {
    let mut endpoints = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        endpoints.push(trimmed.to_string());
    }
    Ok(endpoints)
}
