//! Job runner: one pass over every configured index.

use crate::config::{ExitPolicy, PersistPolicy, SyncConfig};
use crate::error::{Error, Result};
use crate::metrics::{Metrics, Timer};
use crate::orchestrator::{IndexSync, IndexSyncResult, ProgressCallback, SyncOptions, SyncProgress};
use crate::sink::SearchSink;
use crate::source::RowSource;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Per-invocation switches.
#[derive(Debug, Clone, Default)]
pub struct RunPolicy {
    /// Delete and recreate every selected index
    pub drop: bool,
    /// Re-apply attribute settings even on populated indexes
    pub refresh_meta: bool,
    /// Sync only the index with this destination name
    pub only: Option<String>,
    /// Exit policy override; the configured policy applies when unset
    pub exit_policy: Option<ExitPolicy>,
}

impl RunPolicy {
    fn selects(&self, destination: &str) -> bool {
        self.only.as_deref().is_none_or(|only| only == destination)
    }
}

/// Outcome of one index.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum IndexOutcome {
    /// Synced; cursor advanced
    Synced(IndexSyncResult),
    /// Failed; cursor untouched
    Failed {
        /// Error message
        error: String,
        /// Stable error code
        code: &'static str,
        /// Documents extracted before an extraction failure
        records_synced: Option<usize>,
    },
    /// Left out by `--only`
    Skipped,
}

/// Outcome of one index, by name.
#[derive(Debug, Clone, Serialize)]
pub struct IndexReport {
    /// Destination index
    pub index: String,
    /// What happened
    pub outcome: IndexOutcome,
}

/// Result of one run over all indexes.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Per-index outcomes, in configuration order
    pub indexes: Vec<IndexReport>,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// Total duration in milliseconds
    pub duration_ms: u64,
    /// Exit policy in effect
    pub exit_policy: ExitPolicy,
    /// Last failure writing the configuration back, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persist_error: Option<String>,
}

impl RunReport {
    /// Indexes synced successfully.
    pub fn synced(&self) -> impl Iterator<Item = &IndexSyncResult> {
        self.indexes.iter().filter_map(|r| match r.outcome {
            IndexOutcome::Synced(ref result) => Some(result),
            _ => None,
        })
    }

    /// Number of failed indexes.
    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, IndexOutcome::Failed { .. }))
    }

    /// Number of skipped indexes.
    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, IndexOutcome::Skipped))
    }

    /// Documents extracted across synced indexes.
    pub fn total_documents(&self) -> usize {
        self.synced().map(|r| r.total).sum()
    }

    /// Whether every selected index synced and the configuration was saved.
    pub fn all_success(&self) -> bool {
        self.failed() == 0 && self.persist_error.is_none()
    }

    /// Process exit status under the effective exit policy.
    pub fn exit_code(&self) -> u8 {
        match self.exit_policy {
            ExitPolicy::Strict if !self.all_success() => 1,
            _ => 0,
        }
    }

    fn count(&self, pred: impl Fn(&IndexOutcome) -> bool) -> usize {
        self.indexes.iter().filter(|r| pred(&r.outcome)).count()
    }
}

/// Drives the orchestrator over every configured index.
pub struct Runner<'a> {
    sink: Arc<dyn SearchSink>,
    source: &'a dyn RowSource,
    metrics: Arc<Metrics>,
    progress: Option<Arc<ProgressCallback>>,
    config_path: Option<PathBuf>,
}

impl<'a> Runner<'a> {
    /// Create a runner.
    pub fn new(sink: Arc<dyn SearchSink>, source: &'a dyn RowSource) -> Self {
        Self {
            sink,
            source,
            metrics: Arc::new(Metrics::new()),
            progress: None,
            config_path: None,
        }
    }

    /// Record into a shared metrics collector.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Set a progress callback.
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(SyncProgress) + Send + Sync + 'static,
    {
        let callback: ProgressCallback = Box::new(callback);
        self.progress = Some(Arc::new(callback));
        self
    }

    /// Write the configuration back to `path` according to its persist policy.
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Metrics collector in use.
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Sync every index selected by `policy`, in configuration order.
    ///
    /// A failing index is logged and recorded; the run carries on with the
    /// next one. Cursors of synced indexes are updated in `config`.
    #[instrument(skip_all, fields(only = ?policy.only, drop = policy.drop))]
    pub async fn run(&self, config: &mut SyncConfig, policy: &RunPolicy) -> RunReport {
        let started_at = Utc::now();
        let timer = Timer::start("sync run");
        let options = SyncOptions {
            batch_size: config.batch_size,
            dispatch: config.dispatch_mode(),
        };
        let exit_policy = policy.exit_policy.unwrap_or(config.exit_policy);

        if let Some(ref only) = policy.only {
            if config.index(only).is_none() {
                warn!(index = %only, "No configured index matches --only");
            }
        }

        let mut sync = IndexSync::new(self.sink.clone(), self.source, options);
        if let Some(ref progress) = self.progress {
            sync = sync.with_progress(progress.clone());
        }

        let mut reports = Vec::with_capacity(config.indexes.len());
        let mut persist_error = None;

        for position in 0..config.indexes.len() {
            let destination = config.indexes[position].destination.clone();

            if !policy.selects(&destination) {
                info!(index = %destination, "Skipping index");
                self.metrics.record_skipped(&destination);
                reports.push(IndexReport {
                    index: destination,
                    outcome: IndexOutcome::Skipped,
                });
                continue;
            }

            let index = &mut config.indexes[position];
            let outcome = match sync.run(index, policy.drop, policy.refresh_meta).await {
                Ok(result) => {
                    self.metrics.record_synced(&result);
                    IndexOutcome::Synced(result)
                }
                Err(e) => {
                    error!(index = %destination, error = %e, "Failed to sync index");
                    self.metrics.record_failed(&destination, &e);
                    IndexOutcome::Failed {
                        error: e.to_string(),
                        code: e.code(),
                        records_synced: e.records_synced(),
                    }
                }
            };

            if config.persist == PersistPolicy::PerIndex
                && matches!(outcome, IndexOutcome::Synced(_))
            {
                if let Err(e) = self.save(config) {
                    persist_error = Some(e.to_string());
                }
            }

            reports.push(IndexReport {
                index: destination,
                outcome,
            });
        }

        if config.persist == PersistPolicy::EndOfRun {
            if let Err(e) = self.save(config) {
                persist_error = Some(e.to_string());
            }
        }

        let report = RunReport {
            indexes: reports,
            started_at,
            duration_ms: timer.stop(),
            exit_policy,
            persist_error,
        };

        if report.all_success() {
            info!(
                synced = report.synced().count(),
                skipped = report.skipped(),
                total = report.total_documents(),
                "Done indexing"
            );
        } else {
            warn!(
                synced = report.synced().count(),
                failed = report.failed(),
                skipped = report.skipped(),
                "Done indexing with errors"
            );
        }

        report
    }

    fn save(&self, config: &SyncConfig) -> Result<()> {
        let Some(ref path) = self.config_path else {
            return Ok(());
        };
        config.save(path).map_err(|e| {
            error!(path = %path.display(), error = %e, "Failed to save config");
            Error::config_with_source(format!("Failed to save {}", path.display()), e)
        })
    }
}
