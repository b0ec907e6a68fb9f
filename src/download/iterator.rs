//! Completion-order iteration over a batch.
//!
//! Workers finish out of order; the consumer wants one awaitable sequence.
//! The bridge is a bounded channel of tagged messages — a completed unit, a
//! fatal batch error, or the "nothing will ever arrive" sentinel — plus a
//! set-once total the feeder publishes when it finishes enumerating the
//! source. The consumer stops exactly when it has consumed `total` items, on
//! the empty sentinel, or (defensively) on a closed channel.

use std::sync::Arc;
use std::sync::OnceLock;

use tokio::sync::mpsc;
use tracing::debug;

use super::batch::{BatchError, Completion};

/// One slot of the completion sequence.
#[derive(Debug)]
pub(crate) enum Message {
    /// A unit finished (successfully or not).
    Next(Completion),
    /// A fatal batch-level failure, counted as one slot.
    Raised(BatchError),
    /// The source produced nothing; the sequence ends here.
    Empty,
}

/// Awaitable sequence of completed downloads, in completion order.
///
/// Per-download failures arrive as `Ok(completion)` with
/// [`Completion::failed`] set; batch-level failures (source enumeration,
/// worker panic) arrive as `Err` items, each consuming one slot.
#[derive(Debug)]
pub struct Completions {
    rx: mpsc::Receiver<Message>,
    iterated: usize,
    total: Arc<OnceLock<usize>>,
}

impl Completions {
    /// Creates the bounded channel, the set-once total cell, and the
    /// consumer half.
    pub(crate) fn channel(
        backlog: usize,
    ) -> (mpsc::Sender<Message>, Arc<OnceLock<usize>>, Self) {
        let (tx, rx) = mpsc::channel(backlog);
        let total = Arc::new(OnceLock::new());
        let completions = Self {
            rx,
            iterated: 0,
            total: Arc::clone(&total),
        };
        (tx, total, completions)
    }

    /// The next completed unit, or `None` once the sequence is exhausted.
    pub async fn next(&mut self) -> Option<Result<Completion, BatchError>> {
        if self.total.get() == Some(&self.iterated) {
            return None;
        }
        match self.rx.recv().await {
            Some(Message::Next(completion)) => {
                self.iterated += 1;
                Some(Ok(completion))
            }
            Some(Message::Raised(error)) => {
                self.iterated += 1;
                Some(Err(error))
            }
            Some(Message::Empty) => {
                debug!("download source produced nothing");
                None
            }
            // Feeder and workers are gone without publishing a total;
            // nothing more can arrive.
            None => None,
        }
    }

    /// How many slots have been consumed.
    #[must_use]
    pub fn iterated(&self) -> usize {
        self.iterated
    }

    /// The total number of slots, once the feeder has finished enumerating.
    #[must_use]
    pub fn total(&self) -> Option<usize> {
        self.total.get().copied()
    }
}
