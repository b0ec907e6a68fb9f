//! Bounded concurrent executor for many downloads.
//!
//! This module provides the [`Batch`] which coordinates concurrent downloads
//! using a semaphore-based concurrency control pattern: a single background
//! feeder enumerates the (possibly blocking, possibly fallible) download
//! source and submits each unit to a worker task, while the consumer iterates
//! [`Completions`] in completion order.
//!
//! # Concurrency Model
//!
//! - Each download runs in its own Tokio task
//! - A semaphore permit is acquired by the feeder before spawning each
//!   worker, so feeding can never outrun execution by more than the pool size
//! - Permits are released automatically when workers complete (RAII)
//! - Workers push finished units onto a bounded completion channel; a slow
//!   consumer backpressures the whole pipeline
//!
//! # Failure Model
//!
//! - A failed download occupies its slot as a [`Completion`] with the error
//!   recorded; other in-flight downloads are unaffected
//! - A failed source enumeration stops feeding, is delivered exactly once as
//!   an `Err` item, and still finalizes the total so the consumer terminates
//! - A panicked worker is surfaced as an `Err` item for its slot

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, instrument, warn};

use super::context::Context;
use super::core::Download;
use super::error::DownloadError;
use super::iterator::{Completions, Message};

/// Minimum allowed concurrency value.
const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
const MAX_CONCURRENCY: usize = 100;

/// Default concurrency if not specified.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Default completion-channel backlog.
pub const DEFAULT_BACKLOG: usize = 1024;

/// A lazy, possibly fallible source of downloads.
type DownloadSource =
    Box<dyn Iterator<Item = Result<Download, Box<dyn std::error::Error + Send + Sync>>> + Send>;

/// Error type for batch operations.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// Backlog smaller than the concurrency limit.
    #[error("backlog {backlog} may not be smaller than the concurrency limit {concurrent}")]
    InvalidBacklog {
        /// The rejected backlog.
        backlog: usize,
        /// The configured concurrency limit.
        concurrent: usize,
    },

    /// `download()` was called more than once.
    #[error("batch downloads already started")]
    AlreadyStarted,

    /// The download source itself failed while being enumerated.
    #[error("download source failed: {source}")]
    Source {
        /// The enumeration error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A worker task panicked instead of completing its download.
    #[error("download worker panicked: {reason}")]
    WorkerPanic {
        /// Rendering of the panic payload.
        reason: String,
    },
}

impl BatchError {
    /// Creates a source enumeration error.
    pub fn source(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Source {
            source: error.into(),
        }
    }

    fn worker_panic(join_error: &tokio::task::JoinError) -> Self {
        Self::WorkerPanic {
            reason: join_error.to_string(),
        }
    }
}

/// Statistics from a batch run.
///
/// Uses atomic counters for thread-safe updates from concurrent workers.
#[derive(Debug, Default)]
pub struct BatchStats {
    completed: AtomicUsize,
    failed: AtomicUsize,
}

impl BatchStats {
    /// Returns the number of successfully completed downloads.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Returns the number of failed downloads.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Returns the total number of downloads processed so far.
    #[must_use]
    pub fn total(&self) -> usize {
        self.completed() + self.failed()
    }

    fn record(&self, completion: &Completion) {
        if completion.succeeded() {
            self.completed.fetch_add(1, Ordering::SeqCst);
        } else {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// One executed download plus its outcome.
#[derive(Debug)]
pub struct Completion {
    download: Download,
    error: Option<DownloadError>,
}

impl Completion {
    pub(crate) fn new(download: Download, error: Option<DownloadError>) -> Self {
        Self { download, error }
    }

    async fn execute(mut download: Download) -> Self {
        let error = download.execute().await.err();
        Self { download, error }
    }

    /// The download succeeded.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    /// The download terminally failed.
    #[must_use]
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }

    /// The failure, when there was one.
    #[must_use]
    pub fn error(&self) -> Option<&DownloadError> {
        self.error.as_ref()
    }

    /// The executed unit.
    #[must_use]
    pub fn download(&self) -> &Download {
        &self.download
    }

    /// Takes the unit (and its error) apart.
    #[must_use]
    pub fn into_parts(self) -> (Download, Option<DownloadError>) {
        (self.download, self.error)
    }
}

/// Bounded concurrent executor feeding a completion iterator.
///
/// The batch must be torn down exactly once via [`Batch::shutdown`] after
/// the consumer is done; dropping it merely signals the feeder. See the
/// module-level example in [`crate::download`].
pub struct Batch {
    downloads: Option<DownloadSource>,
    concurrent: usize,
    context: Context,
    stats: Arc<BatchStats>,
    feeder: Option<JoinHandle<()>>,
    interrupted: Arc<AtomicBool>,
}

impl Batch {
    /// Creates a batch over a fallible download source.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::InvalidConcurrency`] if `concurrent` is outside
    /// the valid range (1-100).
    pub fn new<I, E>(downloads: I, concurrent: usize) -> Result<Self, BatchError>
    where
        I: IntoIterator<Item = Result<Download, E>>,
        I::IntoIter: Send + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
    {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrent) {
            return Err(BatchError::InvalidConcurrency { value: concurrent });
        }
        let source: DownloadSource =
            Box::new(downloads.into_iter().map(|item| item.map_err(Into::into)));
        debug!(concurrent, "creating batch");
        Ok(Self {
            downloads: Some(source),
            concurrent,
            context: Context::new(),
            stats: Arc::default(),
            feeder: None,
            interrupted: Arc::default(),
        })
    }

    /// Creates a batch over an infallible download source.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::InvalidConcurrency`] if `concurrent` is outside
    /// the valid range (1-100).
    pub fn from_downloads<I>(downloads: I, concurrent: usize) -> Result<Self, BatchError>
    where
        I: IntoIterator<Item = Download>,
        I::IntoIter: Send + 'static,
    {
        Self::new(
            downloads
                .into_iter()
                .map(Ok::<Download, std::convert::Infallible>),
            concurrent,
        )
    }

    /// Seeds the context shared by every download in the batch.
    #[must_use]
    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    /// The configured concurrency limit.
    #[must_use]
    pub fn concurrent(&self) -> usize {
        self.concurrent
    }

    /// Live completion statistics for this batch.
    #[must_use]
    pub fn stats(&self) -> Arc<BatchStats> {
        Arc::clone(&self.stats)
    }

    /// Starts the background feeder and returns the completion iterator
    /// immediately, with the default backlog.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::AlreadyStarted`] on a second call.
    pub fn download(&mut self) -> Result<Completions, BatchError> {
        self.download_with_backlog(DEFAULT_BACKLOG)
    }

    /// Starts the background feeder with an explicit completion backlog.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::InvalidBacklog`] if `backlog` is smaller than
    /// the concurrency limit and [`BatchError::AlreadyStarted`] on a second
    /// call.
    #[instrument(skip(self), fields(concurrent = self.concurrent))]
    pub fn download_with_backlog(&mut self, backlog: usize) -> Result<Completions, BatchError> {
        if backlog < self.concurrent {
            return Err(BatchError::InvalidBacklog {
                backlog,
                concurrent: self.concurrent,
            });
        }
        let downloads = self.downloads.take().ok_or(BatchError::AlreadyStarted)?;
        let (tx, total, completions) = Completions::channel(backlog);
        info!("batch download started");
        self.feeder = Some(tokio::spawn(feed(
            downloads,
            self.concurrent,
            self.context.clone(),
            Arc::clone(&self.stats),
            Arc::clone(&self.interrupted),
            tx,
            total,
        )));
        Ok(completions)
    }

    /// Tears the batch down: stops the feeder from claiming new work and
    /// waits for in-flight downloads to drain. Idempotent.
    ///
    /// Consume (or drop) the [`Completions`] before calling this; the drain
    /// can only finish while results are being received or discarded.
    pub async fn shutdown(&mut self) {
        self.interrupted.store(true, Ordering::SeqCst);
        if let Some(feeder) = self.feeder.take() {
            debug!("batch shutdown: waiting for feeder to drain");
            if let Err(error) = feeder.await {
                warn!(%error, "feeder task failed during shutdown");
            }
        }
    }
}

impl Drop for Batch {
    fn drop(&mut self) {
        if self.feeder.is_some() {
            // Signal-only backstop; shutdown() is the real teardown.
            self.interrupted.store(true, Ordering::SeqCst);
            debug!("batch dropped without shutdown; feeder signalled");
        }
    }
}

impl std::fmt::Debug for Batch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch")
            .field("concurrent", &self.concurrent)
            .field("started", &self.feeder.is_some())
            .finish_non_exhaustive()
    }
}

/// The feeder loop: enumerate the source, merge the batch context into each
/// download, submit it under a semaphore permit, then finalize the total and
/// drain the workers.
async fn feed(
    mut downloads: DownloadSource,
    concurrent: usize,
    context: Context,
    stats: Arc<BatchStats>,
    interrupted: Arc<AtomicBool>,
    tx: tokio::sync::mpsc::Sender<Message>,
    total: Arc<std::sync::OnceLock<usize>>,
) {
    let semaphore = Arc::new(Semaphore::new(concurrent));
    let mut workers = JoinSet::new();
    let mut fed: usize = 0;
    let mut source_error: Option<BatchError> = None;

    loop {
        if interrupted.load(Ordering::SeqCst) {
            debug!(fed, "feeder interrupted; no further downloads will be submitted");
            break;
        }
        match downloads.next() {
            None => break,
            Some(Ok(mut download)) => {
                // Batch context wins on key conflicts so shared resources
                // are visible to every download.
                download.merge_context(&context);
                let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                    break;
                };
                fed += 1;
                debug!(fed, url = %download.url(), "feeding download");
                let tx = tx.clone();
                let stats = Arc::clone(&stats);
                workers.spawn(async move {
                    // Permit is dropped when this block exits (RAII)
                    let _permit = permit;
                    let completion = Completion::execute(download).await;
                    stats.record(&completion);
                    let _ = tx.send(Message::Next(completion)).await;
                });
            }
            Some(Err(error)) => {
                source_error = Some(BatchError::source(error));
                break;
            }
        }
    }

    // Finalize the total so the consumer can terminate: a source error is
    // counted as one slot and delivered exactly once.
    if let Some(error) = source_error {
        warn!(%error, "download source failed; feeding stopped");
        fed += 1;
        let _ = tx.send(Message::Raised(error)).await;
    }
    if fed == 0 {
        let _ = tx.send(Message::Empty).await;
    } else {
        let _ = total.set(fed);
    }

    // Drain in-flight workers; a panicked worker surfaces as the error item
    // for its slot so the consumed/total accounting stays consistent.
    while let Some(joined) = workers.join_next().await {
        if let Err(join_error) = joined {
            warn!(%join_error, "download worker panicked");
            let _ = tx.send(Message::Raised(BatchError::worker_panic(&join_error))).await;
        }
    }
    debug!(fed, "feeder finished");
}
