//! HTTP search index behaviour against a mock server.
//!
//! Ingest paths are driven through a real crawl so batches are formed the
//! way production runs form them.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use spawn_index::config::Config;
use spawn_index::crawler::Crawler;
use spawn_index::error::PublishError;
use spawn_index::publish::{BearerToken, GlobusSearchIndex, IndexPublisher, RetryPolicy};
use spawn_index::report::RunReport;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const INGEST: &str = "/v1/index/idx/ingest";
const SUBJECT: &str = "/v1/index/idx/subject";

fn publisher(server: &MockServer, attempts: u32) -> IndexPublisher {
    let index = GlobusSearchIndex::new(
        server.uri(),
        "idx",
        BearerToken::new("t0ken"),
        Duration::from_secs(5),
    )
    .unwrap();
    IndexPublisher::new(Arc::new(index), RetryPolicy::immediate(attempts))
}

fn tree(names: &[&str]) -> TempDir {
    let tmp = TempDir::new().unwrap();
    for name in names {
        std::fs::write(tmp.path().join(name), format!("contents of {}", name)).unwrap();
    }
    tmp
}

fn subject_of(tmp: &TempDir, name: &str) -> String {
    let root = std::fs::canonicalize(tmp.path()).unwrap();
    format!("file://{}", root.join(name).display())
}

async fn crawl(root: &Path, batch_size: usize, publisher: IndexPublisher) -> RunReport {
    let mut config = Config::default();
    config.crawler.workers = 2;
    config.publish.batch_size = batch_size;
    Crawler::new(config)
        .unwrap()
        .with_publisher(publisher)
        .crawl(root)
        .await
        .unwrap()
}

#[tokio::test]
async fn ingest_sends_gmeta_list_with_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(INGEST))
        .and(header("Authorization", "Bearer t0ken"))
        .and(body_partial_json(json!({
            "@datatype": "GIngest",
            "ingest_type": "GMetaList",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "task_id": "task-1",
            "num_documents_ingested": 2,
            "success": true,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let tmp = tree(&["a.txt", "b.txt"]);
    let report = crawl(tmp.path(), 10, publisher(&server, 3)).await;

    let batch = &report.batches()[0];
    assert_eq!(report.batches().len(), 1);
    assert_eq!(batch.accepted, 2);
    assert_eq!(batch.attempts, 1);
    assert_eq!(batch.task_id.as_deref(), Some("task-1"));
    assert_eq!(report.counts().published_records, 2);
}

#[tokio::test]
async fn server_errors_are_retried_up_to_the_attempt_budget() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(INGEST))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let tmp = tree(&["a.txt"]);
    let report = crawl(tmp.path(), 10, publisher(&server, 3)).await;

    let batch = &report.batches()[0];
    assert_eq!(batch.attempts, 3);
    assert_eq!(batch.accepted, 0);
    assert!(matches!(
        batch.error,
        Some(PublishError::Transient { attempts: 3, .. })
    ));
    assert_eq!(report.counts().failed_batches, 1);
}

#[tokio::test]
async fn rate_limit_then_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(INGEST))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(INGEST))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"task_id": "task-2"})))
        .mount(&server)
        .await;

    let tmp = tree(&["a.txt"]);
    let report = crawl(tmp.path(), 10, publisher(&server, 5)).await;

    let batch = &report.batches()[0];
    assert_eq!(batch.attempts, 2);
    assert!(batch.error.is_none());
    assert_eq!(batch.accepted, 1);
}

#[tokio::test]
async fn validation_errors_reject_named_subjects_without_retry() {
    let server = MockServer::start().await;
    let tmp = tree(&["a.txt", "b.txt"]);
    let bad = subject_of(&tmp, "b.txt");
    Mock::given(method("POST"))
        .and(path(INGEST))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "code": "BadRequest.ValidationError",
            "message": "invalid entry",
            "error_data": [{"subject": bad}],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let report = crawl(tmp.path(), 10, publisher(&server, 5)).await;

    let batch = &report.batches()[0];
    assert_eq!(batch.attempts, 1);
    assert_eq!(batch.rejected, vec![bad]);
    assert_eq!(batch.accepted, 0);
    match &batch.error {
        Some(PublishError::Rejected {
            status, message, ..
        }) => {
            assert_eq!(*status, 400);
            assert_eq!(message, "invalid entry");
        }
        other => panic!("expected rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn unauthorized_stops_all_later_submissions() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(INGEST))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "token expired"})))
        .expect(1)
        .mount(&server)
        .await;

    let tmp = tree(&["a.txt", "b.txt", "c.txt"]);
    let report = crawl(tmp.path(), 1, publisher(&server, 5)).await;

    assert_eq!(report.counts().succeeded, 3);
    assert_eq!(report.batches().len(), 3);
    assert_eq!(report.batches().iter().filter(|b| b.submitted).count(), 1);
    match report.fatal_publish_error() {
        Some(PublishError::AuthFailure { status, message }) => {
            assert_eq!(*status, 401);
            assert_eq!(message, "token expired");
        }
        other => panic!("expected auth failure, got {:?}", other),
    }
}

#[tokio::test]
async fn get_entry_reads_first_entry_content() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(SUBJECT))
        .and(query_param("subject", "file:///data/a.txt"))
        .and(header("Authorization", "Bearer t0ken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "@datatype": "GMetaResult",
            "subject": "file:///data/a.txt",
            "entries": [{
                "entry_id": null,
                "content": {"filename": "a.txt", "size_bytes": 12},
            }],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let record = publisher(&server, 3)
        .get_entry("file:///data/a.txt")
        .await
        .unwrap();
    assert_eq!(record.subject, "file:///data/a.txt");
    assert_eq!(record.content["filename"], "a.txt");
    assert_eq!(record.content["size_bytes"], 12);
}

#[tokio::test]
async fn missing_subject_is_not_found_and_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(SUBJECT))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"code": "NotFound.Generic"})))
        .expect(1)
        .mount(&server)
        .await;

    let err = publisher(&server, 5)
        .get_entry("file:///nope")
        .await
        .unwrap_err();
    assert_eq!(
        err,
        PublishError::NotFound {
            subject: "file:///nope".into()
        }
    );
}

#[tokio::test]
async fn delete_entry_hits_subject_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path(SUBJECT))
        .and(query_param("subject", "file:///data/a.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"removed": true})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(SUBJECT))
        .and(query_param("subject", "file:///data/gone.txt"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let publisher = publisher(&server, 3);
    publisher.delete_entry("file:///data/a.txt").await.unwrap();
    let err = publisher
        .delete_entry("file:///data/gone.txt")
        .await
        .unwrap_err();
    assert!(matches!(err, PublishError::NotFound { .. }));
}

#[tokio::test]
async fn unreachable_index_is_transient() {
    let index = GlobusSearchIndex::new(
        "http://127.0.0.1:1",
        "idx",
        BearerToken::new("t"),
        Duration::from_secs(2),
    )
    .unwrap();
    let publisher = IndexPublisher::new(Arc::new(index), RetryPolicy::immediate(2));

    let err = publisher.get_entry("file:///a").await.unwrap_err();
    assert!(matches!(err, PublishError::Transient { attempts: 2, .. }));
}
