//! In-memory source and sink used by unit tests.

use crate::document::{Batch, Document};
use crate::error::{Error, Result};
use crate::sink::{AttributeKind, SearchSink, TaskInfo, TaskStatus};
use crate::source::{PageQuery, RowSource};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use fake::Fake;
use fake::faker::internet::en::SafeEmail;
use fake::faker::name::en::Name;
use serde_json::{Value as JsonValue, json};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Primary key value of a document rendered as a string, if present and scalar.
pub fn primary_key_of(doc: &Document, primary_key: &str) -> Option<String> {
    match doc.get(primary_key)? {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// `count` user rows with ids `1..=count`, `updated_at` one minute apart from `start`.
pub fn users(count: usize, start: DateTime<Utc>) -> Vec<Document> {
    (1..=count)
        .map(|id| {
            let name: String = Name().fake();
            let email: String = SafeEmail().fake();
            let updated_at = start + ChronoDuration::minutes(id as i64);
            match json!({
                "id": id,
                "name": name,
                "email": email,
                "updated_at": updated_at.to_rfc3339(),
            }) {
                JsonValue::Object(map) => map,
                _ => unreachable!(),
            }
        })
        .collect()
}

/// Table-backed [`RowSource`].
#[derive(Default)]
pub struct MemorySource {
    tables: HashMap<String, Vec<Document>>,
    fail_on_page: Option<usize>,
    queries: Mutex<Vec<PageQuery>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, name: &str, rows: Vec<Document>) -> Self {
        self.tables.insert(name.to_string(), rows);
        self
    }

    /// Fail the query for the given zero-based page number.
    pub fn fail_on_page(mut self, page: usize) -> Self {
        self.fail_on_page = Some(page);
        self
    }

    pub fn queries(&self) -> Vec<PageQuery> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl RowSource for MemorySource {
    async fn fetch_page(&self, query: &PageQuery) -> Result<Batch> {
        let page_number = {
            let mut queries = self.queries.lock().unwrap();
            queries.push(query.clone());
            queries.len() - 1
        };

        if self.fail_on_page == Some(page_number) {
            return Err(Error::config(format!(
                "simulated failure reading {}",
                query.table
            )));
        }

        let rows = self
            .tables
            .get(&query.table)
            .ok_or_else(|| Error::config(format!("relation \"{}\" does not exist", query.table)))?;

        let mut selected: Vec<&Document> = rows
            .iter()
            .filter(|row| match query.watermark {
                None => true,
                Some(ref w) => row
                    .get(&w.column)
                    .and_then(|v| v.as_str())
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .is_some_and(|ts| ts.with_timezone(&Utc) > w.after),
            })
            .collect();

        selected.sort_by_key(|row| row.get(&query.order_by).and_then(|v| v.as_i64()));

        Ok(selected
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .cloned()
            .collect())
    }
}

/// Recorded sink call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    Delete(String),
    Create(String, String),
    Attributes(String, AttributeKind, Vec<String>),
    AddDocuments(String, usize),
}

#[derive(Debug, Default)]
struct MemoryIndex {
    primary_key: String,
    documents: BTreeMap<String, Document>,
    settings: HashMap<AttributeKind, Vec<String>>,
}

/// [`SearchSink`] keeping indexes in memory.
#[derive(Default)]
pub struct MemorySink {
    indexes: Mutex<HashMap<String, MemoryIndex>>,
    calls: Mutex<Vec<SinkCall>>,
    failing_batches: HashSet<usize>,
    fail_create: bool,
    create_conflict: bool,
    conflicted_tasks: Mutex<HashSet<u64>>,
    batch_delay: Option<Duration>,
    batches_seen: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    next_task: AtomicU64,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with an existing index holding `docs`.
    pub fn with_index(self, uid: &str, primary_key: &str, docs: Vec<Document>) -> Self {
        {
            let mut indexes = self.indexes.lock().unwrap();
            let index = indexes.entry(uid.to_string()).or_default();
            index.primary_key = primary_key.to_string();
            for doc in docs {
                if let Some(key) = primary_key_of(&doc, primary_key) {
                    index.documents.insert(key, doc);
                }
            }
        }
        self
    }

    /// Reject the given zero-based batch submissions.
    pub fn fail_batches(mut self, batches: impl IntoIterator<Item = usize>) -> Self {
        self.failing_batches = batches.into_iter().collect();
        self
    }

    pub fn fail_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    /// Another writer creates the index between the existence check and our
    /// create, so the create task fails with `index_already_exists`.
    pub fn create_conflict(mut self) -> Self {
        self.create_conflict = true;
        self
    }

    /// Hold every batch submission for `delay`.
    pub fn batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                SinkCall::AddDocuments(_, n) => Some(n),
                _ => None,
            })
            .collect()
    }

    pub fn attribute_updates(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, SinkCall::Attributes(..)))
            .count()
    }

    pub fn documents(&self, uid: &str) -> BTreeMap<String, Document> {
        self.indexes
            .lock()
            .unwrap()
            .get(uid)
            .map(|i| i.documents.clone())
            .unwrap_or_default()
    }

    pub fn settings(&self, uid: &str, kind: AttributeKind) -> Option<Vec<String>> {
        self.indexes
            .lock()
            .unwrap()
            .get(uid)
            .and_then(|i| i.settings.get(&kind).cloned())
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, call: SinkCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn task(&self, uid: &str) -> TaskInfo {
        TaskInfo {
            task_uid: self.next_task.fetch_add(1, Ordering::SeqCst),
            index_uid: Some(uid.to_string()),
            status: TaskStatus::Enqueued,
        }
    }

    fn not_found(uid: &str) -> Error {
        Error::meilisearch_api(
            404,
            Some("index_not_found".into()),
            format!("Index `{}` not found.", uid),
        )
    }
}

#[async_trait]
impl SearchSink for MemorySink {
    async fn index_exists(&self, uid: &str) -> Result<bool> {
        Ok(self.indexes.lock().unwrap().contains_key(uid))
    }

    async fn create_index(&self, uid: &str, primary_key: &str) -> Result<TaskInfo> {
        self.record(SinkCall::Create(uid.to_string(), primary_key.to_string()));
        if self.fail_create {
            return Err(Error::meilisearch_api(
                400,
                Some("invalid_index_primary_key".into()),
                "invalid primary key",
            ));
        }
        let task = self.task(uid);
        let mut indexes = self.indexes.lock().unwrap();
        let index = indexes.entry(uid.to_string()).or_default();
        index.primary_key = primary_key.to_string();
        if self.create_conflict {
            self.conflicted_tasks.lock().unwrap().insert(task.task_uid);
        }
        Ok(task)
    }

    async fn delete_index(&self, uid: &str) -> Result<TaskInfo> {
        self.record(SinkCall::Delete(uid.to_string()));
        match self.indexes.lock().unwrap().remove(uid) {
            Some(_) => Ok(self.task(uid)),
            None => Err(Self::not_found(uid)),
        }
    }

    async fn document_count(&self, uid: &str) -> Result<u64> {
        self.indexes
            .lock()
            .unwrap()
            .get(uid)
            .map(|i| i.documents.len() as u64)
            .ok_or_else(|| Self::not_found(uid))
    }

    async fn update_attributes(
        &self,
        uid: &str,
        kind: AttributeKind,
        names: &[String],
    ) -> Result<TaskInfo> {
        self.record(SinkCall::Attributes(uid.to_string(), kind, names.to_vec()));
        let mut indexes = self.indexes.lock().unwrap();
        let index = indexes.get_mut(uid).ok_or_else(|| Self::not_found(uid))?;
        index.settings.insert(kind, names.to_vec());
        Ok(self.task(uid))
    }

    async fn add_documents(
        &self,
        uid: &str,
        primary_key: &str,
        batch: &[Document],
    ) -> Result<TaskInfo> {
        let seq = self.batches_seen.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if let Some(delay) = self.batch_delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.record(SinkCall::AddDocuments(uid.to_string(), batch.len()));
        if self.failing_batches.contains(&seq) {
            return Err(Error::meilisearch_api(503, None, "simulated outage"));
        }

        let mut indexes = self.indexes.lock().unwrap();
        let index = indexes.entry(uid.to_string()).or_default();
        for doc in batch {
            if let Some(key) = primary_key_of(doc, primary_key) {
                index.documents.insert(key, doc.clone());
            }
        }
        Ok(self.task(uid))
    }

    async fn wait_for_task(&self, task: &TaskInfo) -> Result<TaskInfo> {
        if self.conflicted_tasks.lock().unwrap().contains(&task.task_uid) {
            return Err(Error::Task {
                task_uid: task.task_uid,
                status: TaskStatus::Failed.to_string(),
                code: Some("index_already_exists".into()),
                message: format!(
                    "Index `{}` already exists.",
                    task.index_uid.as_deref().unwrap_or_default()
                ),
            });
        }
        Ok(TaskInfo {
            status: TaskStatus::Succeeded,
            ..task.clone()
        })
    }
}

mod tests {
    use super::*;

    #[test]
    fn test_primary_key_of() {
        let d = match json!({"id": 42, "sku": "A-1", "tags": ["x"]}) {
            JsonValue::Object(map) => map,
            _ => unreachable!(),
        };
        assert_eq!(primary_key_of(&d, "id").as_deref(), Some("42"));
        assert_eq!(primary_key_of(&d, "sku").as_deref(), Some("A-1"));
        assert_eq!(primary_key_of(&d, "tags"), None);
        assert_eq!(primary_key_of(&d, "missing"), None);
    }
}
