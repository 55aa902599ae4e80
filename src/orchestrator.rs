//! Per-index sync orchestration.
//!
//! One run of one index moves through
//! `NotStarted → Provisioning → Extracting → CursorAdvance → Done`, or ends in
//! `Aborted` when provisioning or extraction fails.

use crate::config::IndexConfig;
use crate::cursor::{Bound, CursorPolicy};
use crate::dispatch::{DispatchMode, Dispatcher};
use crate::error::{Error, Result};
use crate::extract::Extractor;
use crate::provision::provision;
use crate::sink::SearchSink;
use crate::source::RowSource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Orchestration state of one index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Not started
    NotStarted,
    /// Dropping, creating or configuring the destination index
    Provisioning,
    /// Paging through the source and dispatching batches
    Extracting,
    /// Every batch joined; moving the cursor
    CursorAdvance,
    /// Finished successfully
    Done,
    /// Stopped by a provisioning or extraction failure
    Aborted,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncState::NotStarted => write!(f, "not started"),
            SyncState::Provisioning => write!(f, "provisioning"),
            SyncState::Extracting => write!(f, "extracting"),
            SyncState::CursorAdvance => write!(f, "advancing cursor"),
            SyncState::Done => write!(f, "done"),
            SyncState::Aborted => write!(f, "aborted"),
        }
    }
}

/// Sync progress callback.
pub type ProgressCallback = Box<dyn Fn(SyncProgress) + Send + Sync>;

/// Sync progress update.
#[derive(Debug, Clone)]
pub struct SyncProgress {
    /// Destination index
    pub index: String,
    /// Current state
    pub state: SyncState,
    /// Documents extracted so far
    pub documents: usize,
    /// Batches handed to the dispatcher so far
    pub batches: usize,
}

/// Result of one successful index run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSyncResult {
    /// Destination index
    pub index: String,
    /// Documents extracted, including those in failed batches
    pub total: usize,
    /// Batches extracted
    pub batches: usize,
    /// Batches the sink did not accept
    pub failed_batches: usize,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When every batch had been joined
    pub completed_at: DateTime<Utc>,
    /// Wall time in milliseconds
    pub duration_ms: u64,
}

/// Knobs shared by every index in a run.
#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    /// Rows per page and per batch
    pub batch_size: usize,
    /// How batches reach the sink
    pub dispatch: DispatchMode,
}

/// Runs one index end to end: cursor, provisioning, extraction, dispatch.
pub struct IndexSync<'a> {
    sink: Arc<dyn SearchSink>,
    source: &'a dyn RowSource,
    options: SyncOptions,
    progress: Option<Arc<ProgressCallback>>,
}

impl<'a> IndexSync<'a> {
    /// Create an orchestrator reading from `source` and writing to `sink`.
    pub fn new(sink: Arc<dyn SearchSink>, source: &'a dyn RowSource, options: SyncOptions) -> Self {
        Self {
            sink,
            source,
            options,
            progress: None,
        }
    }

    /// Report state changes and extraction progress to `callback`.
    pub fn with_progress(mut self, callback: Arc<ProgressCallback>) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Sync `index`.
    ///
    /// On success the cursor of `index` has moved to the completion time.
    /// With `drop` the stored cursor is cleared before anything else, so a
    /// failed run leaves the next one reading from the beginning. A failed
    /// extraction still joins every dispatched batch before returning an
    /// [`Error::Extraction`] carrying the partial total.
    #[instrument(skip(self, index), fields(index = %index.destination))]
    pub async fn run(
        &self,
        index: &mut IndexConfig,
        drop: bool,
        force_meta: bool,
    ) -> Result<IndexSyncResult> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let mut tracker = Tracker::new(&index.destination, self.progress.clone());

        let resolution = CursorPolicy::resolve(&index.cursor, drop);
        if resolution.reset {
            warn!("Dropping index, cursor reset");
            index.cursor.last_sync = None;
        }
        match resolution.bound {
            Bound::Disabled => debug!("No cursor column, reading every row"),
            Bound::FromBeginning => warn!("Cursor is at zero, indexing all documents"),
            Bound::After(ts) => info!(since = %ts.to_rfc3339(), "Indexing rows modified since cursor"),
        }
        let watermark = resolution.watermark(&index.cursor);

        tracker.enter(SyncState::Provisioning);
        let handle = match provision(index, drop, force_meta, self.sink.clone()).await {
            Ok(handle) => handle,
            Err(e) => {
                tracker.enter(SyncState::Aborted);
                return Err(e);
            }
        };

        tracker.enter(SyncState::Extracting);
        let mut extractor = Extractor::new(
            self.source,
            index.source.as_str(),
            index.primary.as_str(),
            watermark,
            self.options.batch_size,
        );
        let mut dispatcher = Dispatcher::new(handle, self.options.dispatch);

        let failure = loop {
            match extractor.next_batch().await {
                Ok(Some(batch)) => {
                    dispatcher.dispatch(batch).await;
                    tracker.progress(extractor.rows_extracted(), extractor.pages_extracted());
                }
                Ok(None) => break None,
                Err(e) => break Some(e),
            }
        };

        let summary = dispatcher.finish().await;
        let total = extractor.rows_extracted();
        let batches = extractor.pages_extracted();
        tracker.progress(total, batches);

        if let Some(e) = failure {
            tracker.enter(SyncState::Aborted);
            return Err(Error::extraction(&index.destination, total, e));
        }

        tracker.enter(SyncState::CursorAdvance);
        let completed_at = Utc::now();
        if CursorPolicy::advance(&mut index.cursor, completed_at) {
            info!(time = %completed_at.to_rfc3339(), "Updated cursor");
        }

        let duration = clock.elapsed();
        tracker.enter(SyncState::Done);
        info!(
            total,
            failed_batches = summary.failed,
            time = %humantime::format_duration(duration),
            "Index synchronized"
        );

        Ok(IndexSyncResult {
            index: index.destination.clone(),
            total,
            batches,
            failed_batches: summary.failed,
            started_at,
            completed_at,
            duration_ms: duration.as_millis() as u64,
        })
    }
}

struct Tracker {
    index: String,
    state: SyncState,
    documents: usize,
    batches: usize,
    callback: Option<Arc<ProgressCallback>>,
}

impl Tracker {
    fn new(index: &str, callback: Option<Arc<ProgressCallback>>) -> Self {
        Self {
            index: index.to_string(),
            state: SyncState::NotStarted,
            documents: 0,
            batches: 0,
            callback,
        }
    }

    fn enter(&mut self, next: SyncState) {
        debug!(from = %self.state, to = %next, "State transition");
        self.state = next;
        self.report();
    }

    fn progress(&mut self, documents: usize, batches: usize) {
        self.documents = documents;
        self.batches = batches;
        self.report();
    }

    fn report(&self) {
        if let Some(ref callback) = self.callback {
            callback(SyncProgress {
                index: self.index.clone(),
                state: self.state,
                documents: self.documents,
                batches: self.batches,
            });
        }
    }
}
