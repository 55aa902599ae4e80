//! Batch dispatch to the destination index.
//!
//! A failed batch is logged and counted, never retried, and never aborts the
//! run. Completion order of concurrently dispatched batches is unspecified;
//! primary-key upserts make the final index state independent of it.

use crate::document::Batch;
use crate::error::{Error, Result};
use crate::sink::IndexHandle;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info};

/// How batches are handed to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Wait for each acknowledgement, then pause for `delay`
    Sequential {
        /// Pause after each acknowledged batch
        delay: Duration,
    },
    /// Submit without waiting; join everything at the end
    Concurrent {
        /// Bound on in-flight submissions (`None` = unbounded)
        max_in_flight: Option<usize>,
    },
}

impl Default for DispatchMode {
    fn default() -> Self {
        DispatchMode::Sequential {
            delay: Duration::ZERO,
        }
    }
}

/// Totals reported once every batch has been joined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Batches acknowledged by the sink
    pub dispatched: usize,
    /// Batches that failed to reach the sink
    pub failed: usize,
}

impl DispatchSummary {
    fn record(&mut self, outcome: &Result<()>) {
        match outcome {
            Ok(()) => self.dispatched += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// Forwards batches to one index.
pub struct Dispatcher {
    handle: IndexHandle,
    mode: DispatchMode,
    pending: JoinSet<Result<()>>,
    permits: Option<Arc<Semaphore>>,
    summary: DispatchSummary,
}

impl Dispatcher {
    /// Create a dispatcher for `handle`.
    pub fn new(handle: IndexHandle, mode: DispatchMode) -> Self {
        let permits = match mode {
            DispatchMode::Concurrent {
                max_in_flight: Some(limit),
            } => Some(Arc::new(Semaphore::new(limit.max(1)))),
            _ => None,
        };

        Self {
            handle,
            mode,
            pending: JoinSet::new(),
            permits,
            summary: DispatchSummary::default(),
        }
    }

    /// Dispatch mode in use.
    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Hand one batch to the sink.
    ///
    /// In sequential mode this returns after the sink acknowledged the batch
    /// and the inter-batch delay elapsed. In concurrent mode it returns as
    /// soon as the batch is scheduled, waiting only for a free slot when
    /// in-flight submissions are bounded.
    pub async fn dispatch(&mut self, batch: Batch) {
        match self.mode {
            DispatchMode::Sequential { delay } => {
                let outcome = submit(&self.handle, batch).await;
                self.summary.record(&outcome);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            DispatchMode::Concurrent { .. } => {
                let permit = self.acquire().await;
                let handle = self.handle.clone();
                self.pending.spawn(async move {
                    let _permit = permit;
                    submit(&handle, batch).await
                });
            }
        }
    }

    /// Wait for every outstanding batch and report totals.
    pub async fn finish(mut self) -> DispatchSummary {
        while let Some(joined) = self.pending.join_next().await {
            match joined {
                Ok(outcome) => self.summary.record(&outcome),
                Err(e) => {
                    error!(index = %self.handle.uid(), error = %e, "Dispatch task did not complete");
                    self.summary.failed += 1;
                }
            }
        }
        self.summary
    }

    async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        match self.permits {
            Some(ref permits) => permits.clone().acquire_owned().await.ok(),
            None => None,
        }
    }
}

async fn submit(handle: &IndexHandle, batch: Batch) -> Result<()> {
    let size = batch.len();
    match handle.add_documents(&batch).await {
        Ok(task) => {
            info!(index = %handle.uid(), batch = size, task = task.task_uid, "Added batch to index");
            metrics::counter!("meilisync_batches_dispatched_total", "index" => handle.uid().to_string())
                .increment(1);
            Ok(())
        }
        Err(e) => {
            let e = Error::dispatch(handle.uid(), size, e);
            error!(index = %handle.uid(), batch = size, error = %e, "Failed to add batch to index");
            metrics::counter!("meilisync_batches_failed_total", "index" => handle.uid().to_string())
                .increment(1);
            Err(e)
        }
    }
}
