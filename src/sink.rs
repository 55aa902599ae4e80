//! Sink capability: the operations the sync engine needs from a search engine.

use crate::document::Document;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Index metadata attribute set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeKind {
    /// Attributes usable in filters
    Filterable,
    /// Attributes usable for sorting
    Sortable,
    /// Attributes searched, in ranking order
    Searchable,
}

impl AttributeKind {
    /// Settings route segment for this attribute set.
    pub fn settings_path(&self) -> &'static str {
        match self {
            AttributeKind::Filterable => "filterable-attributes",
            AttributeKind::Sortable => "sortable-attributes",
            AttributeKind::Searchable => "searchable-attributes",
        }
    }
}

impl std::fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttributeKind::Filterable => write!(f, "filterable"),
            AttributeKind::Sortable => write!(f, "sortable"),
            AttributeKind::Searchable => write!(f, "searchable"),
        }
    }
}

/// Asynchronous task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting in the queue
    Enqueued,
    /// Being processed
    Processing,
    /// Finished successfully
    Succeeded,
    /// Finished with an error
    Failed,
    /// Canceled before completion
    Canceled,
}

impl TaskStatus {
    /// Whether the task reached a final state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Canceled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Enqueued => "enqueued",
            TaskStatus::Processing => "processing",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

/// Acknowledgement of an enqueued write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    /// Task uid
    pub task_uid: u64,
    /// Index the task applies to
    #[serde(default)]
    pub index_uid: Option<String>,
    /// Status when acknowledged
    pub status: TaskStatus,
}

/// Search engine operations used by provisioning and dispatch.
#[async_trait]
pub trait SearchSink: Send + Sync {
    /// Whether the index exists.
    async fn index_exists(&self, uid: &str) -> Result<bool>;

    /// Enqueue index creation.
    async fn create_index(&self, uid: &str, primary_key: &str) -> Result<TaskInfo>;

    /// Enqueue index deletion.
    async fn delete_index(&self, uid: &str) -> Result<TaskInfo>;

    /// Number of documents currently held by the index.
    async fn document_count(&self, uid: &str) -> Result<u64>;

    /// Enqueue a replacement of one attribute set.
    async fn update_attributes(
        &self,
        uid: &str,
        kind: AttributeKind,
        names: &[String],
    ) -> Result<TaskInfo>;

    /// Enqueue an upsert of `batch` keyed by `primary_key`.
    async fn add_documents(
        &self,
        uid: &str,
        primary_key: &str,
        batch: &[Document],
    ) -> Result<TaskInfo>;

    /// Wait until `task` is final. A failed or canceled task is an error.
    async fn wait_for_task(&self, task: &TaskInfo) -> Result<TaskInfo>;
}

/// Provisioned destination index, shared by every batch of one run.
#[derive(Clone)]
pub struct IndexHandle {
    sink: Arc<dyn SearchSink>,
    uid: String,
    primary_key: String,
}

impl IndexHandle {
    /// Create a handle.
    pub fn new(
        sink: Arc<dyn SearchSink>,
        uid: impl Into<String>,
        primary_key: impl Into<String>,
    ) -> Self {
        Self {
            sink,
            uid: uid.into(),
            primary_key: primary_key.into(),
        }
    }

    /// Index uid.
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Primary key documents are upserted by.
    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Submit one batch; returns once the sink has acknowledged it.
    pub async fn add_documents(&self, batch: &[Document]) -> Result<TaskInfo> {
        self.sink
            .add_documents(&self.uid, &self.primary_key, batch)
            .await
    }
}

impl std::fmt::Debug for IndexHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexHandle")
            .field("uid", &self.uid)
            .field("primary_key", &self.primary_key)
            .finish()
    }
}
