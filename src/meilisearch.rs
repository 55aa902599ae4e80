//! Meilisearch HTTP client for meilisync-pg.
//!
//! Only the handful of routes the sync engine needs are wrapped. Every write
//! returns a [`TaskInfo`]; [`MeilisearchClient::wait_for_task`] polls the task
//! queue with exponential backoff until the task is final or the configured
//! task timeout elapses.

use crate::document::{Document, encode_batch};
use crate::error::{Error, Result};
use crate::sink::{AttributeKind, SearchSink, TaskInfo, TaskStatus};
use async_trait::async_trait;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info, instrument};
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(120);

/// Meilisearch client.
#[derive(Clone)]
pub struct MeilisearchClient {
    http: reqwest::Client,
    base: Url,
    api_key: Option<String>,
    task_timeout: Duration,
}

impl std::fmt::Debug for MeilisearchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeilisearchClient")
            .field("base", &self.base.as_str())
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("task_timeout", &self.task_timeout)
            .finish()
    }
}

impl MeilisearchClient {
    /// Create a client for `host`, authenticating with `api_key` when given.
    pub fn new(host: &str, api_key: Option<String>) -> Result<Self> {
        let mut base =
            Url::parse(host).map_err(|e| Error::config(format!("Invalid Meilisearch URL: {}", e)))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::meilisearch_request("Failed to build HTTP client", e))?;

        Ok(Self {
            http,
            base,
            api_key,
            task_timeout: DEFAULT_TASK_TIMEOUT,
        })
    }

    /// Set how long [`wait_for_task`](SearchSink::wait_for_task) keeps polling.
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    /// Base URL requests are resolved against.
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Check that the server reports itself available.
    #[instrument(skip(self), fields(host = %self.base))]
    pub async fn health(&self) -> Result<()> {
        let health: Health = self
            .send(self.request(Method::GET, "health")?)
            .await
            .map_err(|e| Error::meilisearch_connection(e.to_string()))?;

        if health.status != "available" {
            return Err(Error::meilisearch_connection(format!(
                "Meilisearch reports status '{}'",
                health.status
            )));
        }

        info!("Meilisearch: OK");
        Ok(())
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let url = self
            .base
            .join(path)
            .map_err(|e| Error::config(format!("Invalid Meilisearch path '{}': {}", path, e)))?;

        let builder = self.http.request(method, url);
        Ok(match self.api_key {
            Some(ref key) => builder.bearer_auth(key),
            None => builder,
        })
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::meilisearch_request("Request failed", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(api_error(status, response).await);
        }

        response
            .json::<T>()
            .await
            .map_err(|e| Error::meilisearch_request("Invalid response body", e))
    }

    async fn fetch_task(&self, task_uid: u64) -> Result<TaskView> {
        self.send(self.request(Method::GET, &format!("tasks/{}", task_uid))?)
            .await
    }
}

#[async_trait]
impl SearchSink for MeilisearchClient {
    async fn index_exists(&self, uid: &str) -> Result<bool> {
        let request = self.request(Method::GET, &format!("indexes/{}", uid))?;
        match self.send::<serde_json::Value>(request).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_index_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    async fn create_index(&self, uid: &str, primary_key: &str) -> Result<TaskInfo> {
        let body = serde_json::json!({ "uid": uid, "primaryKey": primary_key });
        self.send(self.request(Method::POST, "indexes")?.json(&body))
            .await
    }

    #[instrument(skip(self))]
    async fn delete_index(&self, uid: &str) -> Result<TaskInfo> {
        self.send(self.request(Method::DELETE, &format!("indexes/{}", uid))?)
            .await
    }

    async fn document_count(&self, uid: &str) -> Result<u64> {
        let stats: IndexStats = self
            .send(self.request(Method::GET, &format!("indexes/{}/stats", uid))?)
            .await?;
        Ok(stats.number_of_documents)
    }

    #[instrument(skip(self, names), fields(count = names.len()))]
    async fn update_attributes(
        &self,
        uid: &str,
        kind: AttributeKind,
        names: &[String],
    ) -> Result<TaskInfo> {
        let path = format!("indexes/{}/settings/{}", uid, kind.settings_path());
        self.send(self.request(Method::PUT, &path)?.json(names))
            .await
    }

    async fn add_documents(
        &self,
        uid: &str,
        primary_key: &str,
        batch: &[Document],
    ) -> Result<TaskInfo> {
        let body = encode_batch(batch)?;
        let request = self
            .request(Method::POST, &format!("indexes/{}/documents", uid))?
            .query(&[("primaryKey", primary_key)])
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        self.send(request).await
    }

    #[instrument(skip(self), fields(task = task.task_uid))]
    async fn wait_for_task(&self, task: &TaskInfo) -> Result<TaskInfo> {
        let task_uid = task.task_uid;

        let view = backoff::future::retry(create_backoff(self.task_timeout), move || async move {
            let view = self.fetch_task(task_uid).await.map_err(backoff::Error::permanent)?;
            if view.status.is_terminal() {
                Ok(view)
            } else {
                debug!(status = %view.status, "Task not finished yet");
                Err(backoff::Error::transient(Error::Task {
                    task_uid,
                    status: view.status.to_string(),
                    code: None,
                    message: "task did not finish before the timeout".into(),
                }))
            }
        })
        .await?;

        match view.status {
            TaskStatus::Succeeded => Ok(TaskInfo {
                task_uid,
                index_uid: view.index_uid,
                status: view.status,
            }),
            status => {
                let (code, message) = match view.error {
                    Some(e) => (e.code, e.message),
                    None => (None, format!("task {}", status)),
                };
                Err(Error::Task {
                    task_uid,
                    status: status.to_string(),
                    code,
                    message,
                })
            }
        }
    }
}

/// Create the task polling backoff.
pub fn create_backoff(timeout: Duration) -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(50))
        .with_max_interval(Duration::from_secs(1))
        .with_multiplier(1.5)
        .with_max_elapsed_time(Some(timeout))
        .build()
}

async fn api_error(status: StatusCode, response: reqwest::Response) -> Error {
    let text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ApiError>(&text) {
        Ok(body) => Error::meilisearch_api(status.as_u16(), body.code, body.message),
        Err(_) => Error::meilisearch_api(status.as_u16(), None, format!("HTTP {}: {}", status, text)),
    }
}

#[derive(Debug, Deserialize)]
struct Health {
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexStats {
    number_of_documents: u64,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
    #[serde(default)]
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskView {
    #[serde(default)]
    index_uid: Option<String>,
    status: TaskStatus,
    #[serde(default)]
    error: Option<ApiError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let client = MeilisearchClient::new("http://localhost:7700/meili", None).unwrap();
        assert_eq!(client.base_url().as_str(), "http://localhost:7700/meili/");
        let url = client.base_url().join("indexes/users").unwrap();
        assert_eq!(url.as_str(), "http://localhost:7700/meili/indexes/users");
    }

    #[test]
    fn test_debug_hides_api_key() {
        let client = MeilisearchClient::new("http://localhost:7700", Some("masterKey".into())).unwrap();
        let debug = format!("{:?}", client);
        assert!(debug.contains("***"));
        assert!(!debug.contains("masterKey"));
    }

    #[test]
    fn test_invalid_host_rejected() {
        let err = MeilisearchClient::new("not a url", None).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_task_view_parses_failure() {
        let view: TaskView = serde_json::from_str(
            r#"{"uid":7,"indexUid":"users","status":"failed","type":"indexDeletion",
                "error":{"message":"Index `users` not found.","code":"index_not_found","type":"invalid_request","link":"https://docs.meilisearch.com/errors#index_not_found"}}"#,
        )
        .unwrap();
        assert_eq!(view.status, TaskStatus::Failed);
        assert_eq!(view.error.unwrap().code.as_deref(), Some("index_not_found"));
    }
}
