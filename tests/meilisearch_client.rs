//! Meilisearch client against a mock HTTP server.

use meilisync_pg::sink::{AttributeKind, SearchSink, TaskInfo, TaskStatus};
use meilisync_pg::{Document, MeilisearchClient};
use serde_json::{Value as JsonValue, json};
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> MeilisearchClient {
    MeilisearchClient::new(&server.uri(), Some("masterKey".into()))
        .unwrap()
        .with_task_timeout(Duration::from_secs(5))
}

fn enqueued(uid: u64) -> JsonValue {
    json!({
        "taskUid": uid,
        "indexUid": "users",
        "status": "enqueued",
        "type": "documentAdditionOrUpdate",
        "enqueuedAt": "2024-05-01T08:30:00Z"
    })
}

fn task(uid: u64, status: &str) -> JsonValue {
    json!({
        "uid": uid,
        "indexUid": "users",
        "status": status,
        "type": "indexCreation"
    })
}

fn not_found() -> ResponseTemplate {
    ResponseTemplate::new(404).set_body_json(json!({
        "message": "Index `users` not found.",
        "code": "index_not_found",
        "type": "invalid_request",
        "link": "https://docs.meilisearch.com/errors#index_not_found"
    }))
}

#[tokio::test]
async fn test_health_available() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "available"})))
        .expect(1)
        .mount(&server)
        .await;

    client(&server).health().await.unwrap();
}

#[tokio::test]
async fn test_health_failure_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .mount(&server)
        .await;

    let err = client(&server).health().await.unwrap_err();
    assert_eq!(err.code(), "CONNECTIVITY_ERROR");
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_index_exists() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/indexes/users"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"uid": "users", "primaryKey": "id"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/indexes/orders"))
        .respond_with(not_found())
        .mount(&server)
        .await;

    let client = client(&server);
    assert!(client.index_exists("users").await.unwrap());
    assert!(!client.index_exists("orders").await.unwrap());
}

#[tokio::test]
async fn test_delete_missing_index_reports_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/indexes/users"))
        .respond_with(not_found())
        .mount(&server)
        .await;

    let err = client(&server).delete_index("users").await.unwrap_err();
    assert!(err.is_index_not_found());
}

#[tokio::test]
async fn test_add_documents_sends_batch_with_primary_key() {
    let server = MockServer::start().await;
    let body = json!([
        {"id": 1, "name": "Ada"},
        {"id": 2, "name": "Grace"}
    ]);
    Mock::given(method("POST"))
        .and(path("/indexes/users/documents"))
        .and(query_param("primaryKey", "id"))
        .and(header("authorization", "Bearer masterKey"))
        .and(body_json(&body))
        .respond_with(ResponseTemplate::new(202).set_body_json(enqueued(3)))
        .expect(1)
        .mount(&server)
        .await;

    let batch: Vec<Document> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_object().unwrap().clone())
        .collect();

    let info = client(&server)
        .add_documents("users", "id", &batch)
        .await
        .unwrap();
    assert_eq!(info.task_uid, 3);
    assert_eq!(info.status, TaskStatus::Enqueued);
}

#[tokio::test]
async fn test_update_attributes_route() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/indexes/users/settings/sortable-attributes"))
        .and(body_json(json!(["updated_at", "name"])))
        .respond_with(ResponseTemplate::new(202).set_body_json(enqueued(9)))
        .expect(1)
        .mount(&server)
        .await;

    let names = vec!["updated_at".to_string(), "name".to_string()];
    let info = client(&server)
        .update_attributes("users", AttributeKind::Sortable, &names)
        .await
        .unwrap();
    assert_eq!(info.task_uid, 9);
}

#[tokio::test]
async fn test_document_count() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/indexes/users/stats"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "numberOfDocuments": 42,
            "isIndexing": false,
            "fieldDistribution": {"id": 42}
        })))
        .mount(&server)
        .await;

    assert_eq!(client(&server).document_count("users").await.unwrap(), 42);
}

#[tokio::test]
async fn test_wait_for_task_polls_until_final() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tasks/5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(task(5, "processing")))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tasks/5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(task(5, "succeeded")))
        .mount(&server)
        .await;

    let pending = TaskInfo {
        task_uid: 5,
        index_uid: Some("users".into()),
        status: TaskStatus::Enqueued,
    };
    let done = client(&server).wait_for_task(&pending).await.unwrap();
    assert_eq!(done.status, TaskStatus::Succeeded);

    let polls = server.received_requests().await.unwrap().len();
    assert_eq!(polls, 3);
}

#[tokio::test]
async fn test_wait_for_failed_task_is_an_error() {
    let server = MockServer::start().await;
    let mut failed = task(6, "failed");
    failed["error"] = json!({
        "message": "Index `users` not found.",
        "code": "index_not_found",
        "type": "invalid_request",
        "link": "https://docs.meilisearch.com/errors#index_not_found"
    });
    Mock::given(method("GET"))
        .and(path("/tasks/6"))
        .respond_with(ResponseTemplate::new(200).set_body_json(failed))
        .mount(&server)
        .await;

    let pending = TaskInfo {
        task_uid: 6,
        index_uid: Some("users".into()),
        status: TaskStatus::Enqueued,
    };
    let err = client(&server).wait_for_task(&pending).await.unwrap_err();
    assert_eq!(err.code(), "MEILI_TASK_ERROR");
    assert!(err.is_index_not_found());
}
