//! Integration tests for the read API.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use reqwest::Client;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use crate::config::Config;
use crate::db::{init_database, MirrorStore};
use crate::errors::AppError;
use crate::models::{RawDocument, SyncStatus};
use crate::remote::{ChannelCollection, ChannelFeed};
use crate::sync::{RetryPolicy, Session};
use crate::{create_router, AppState};

/// Test fixture for integration tests.
struct TestFixture {
    client: Client,
    base_url: String,
    feed: ChannelFeed,
    session: Session,
    _temp_dir: TempDir,
}

impl TestFixture {
    async fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.sqlite");

        let pool = init_database(&db_path).await.expect("Failed to init DB");
        let store = Arc::new(MirrorStore::open(pool).await.expect("Failed to open store"));

        let (collection, feed) = ChannelCollection::new();
        let session = Session::start(
            store.clone(),
            Arc::new(collection),
            RetryPolicy::new(Duration::from_millis(500), Duration::from_secs(1)),
        );

        let mut config = Config::from_map(&HashMap::new()).expect("Failed to build config");
        config.db_path = db_path;
        config.log_level = "warn".to_string();
        config.changes_timeout = Duration::from_millis(300);

        let state = AppState {
            store,
            status: session.status(),
            config: Arc::new(config),
        };

        let app = create_router(state);

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get addr");
        let base_url = format!("http://{}", addr);

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        TestFixture {
            client: Client::new(),
            base_url,
            feed,
            session,
            _temp_dir: temp_dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let resp = self.client.get(self.url(path)).send().await.unwrap();
        let status = StatusCode::from_u16(resp.status().as_u16()).unwrap();
        (status, resp.json().await.unwrap())
    }

    async fn wait_for_status(&self, predicate: impl Fn(&SyncStatus) -> bool) {
        let mut rx = self.session.status();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| predicate(s)))
            .await
            .expect("Timed out waiting for sync status")
            .expect("Watcher status closed");
    }

    /// Push a snapshot and wait until the mirror has applied it.
    async fn push(&self, docs: Vec<RawDocument>) {
        let applied = self.session.status().borrow().applied_batches;
        self.feed.push(docs);
        self.wait_for_status(|s| s.applied_batches > applied).await;
    }
}

fn scenario_docs() -> Vec<RawDocument> {
    vec![
        RawDocument::from_json(
            "b",
            json!({ "bloodGroup": "A-", "hospitalName": "Darlington Memorial", "timestamp": 100 }),
        ),
        RawDocument::from_json(
            "a",
            json!({ "bloodGroup": "O+", "hospitalName": "North Tees", "timestamp": 200 }),
        ),
    ]
}

#[tokio::test]
async fn test_health_check() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .get(fixture.url("/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_router_without_network() {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("test.sqlite"))
        .await
        .unwrap();
    let store = Arc::new(MirrorStore::open(pool).await.unwrap());
    let (_, status) = tokio::sync::watch::channel(SyncStatus::default());

    let app = create_router(AppState {
        store,
        status,
        config: Arc::new(Config::from_map(&HashMap::new()).unwrap()),
    });

    let resp = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .oneshot(
            Request::builder()
                .uri("/api/does-not-exist")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_is_empty_before_first_snapshot() {
    let fixture = TestFixture::new().await;

    let (status, body) = fixture.get("/api/requests").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"], json!([]));
    assert_eq!(body["revision"], 0);
}

#[tokio::test]
async fn test_list_newest_first() {
    let fixture = TestFixture::new().await;
    fixture.push(scenario_docs()).await;

    let (status, body) = fixture.get("/api/requests").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["revision"], 1);

    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 2);
    assert_eq!(data[0]["id"], "a");
    assert_eq!(data[0]["bloodGroup"], "O+");
    assert_eq!(data[1]["id"], "b");
    assert_eq!(data[1]["hospitalName"], "Darlington Memorial");
    assert_eq!(data[1]["latitude"], 0.0);
}

#[tokio::test]
async fn test_lookup_cached_and_durable() {
    let fixture = TestFixture::new().await;
    fixture.push(scenario_docs()).await;

    let (status, body) = fixture.get("/api/requests/b").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["bloodGroup"], "A-");

    let (status, body) = fixture.get("/api/requests/b?source=durable").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["bloodGroup"], "A-");
    assert_eq!(body["data"]["timestamp"], 100);

    let (status, body) = fixture.get("/api/requests/z").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let (status, _) = fixture.get("/api/requests/z?source=durable").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_lookup_rejects_unknown_source() {
    let fixture = TestFixture::new().await;

    let (status, body) = fixture.get("/api/requests/a?source=remote").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_malformed_document_is_not_listed() {
    let fixture = TestFixture::new().await;

    let mut docs = scenario_docs();
    docs.push(RawDocument::new(
        None,
        json!({ "bloodGroup": "B+" }).as_object().cloned(),
    ));
    fixture.push(docs).await;

    let (_, body) = fixture.get("/api/requests").await;
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_refresh_replaces_everything() {
    let fixture = TestFixture::new().await;
    fixture.push(scenario_docs()).await;
    fixture
        .push(vec![RawDocument::from_json(
            "c",
            json!({ "bloodGroup": "AB-", "timestamp": 50 }),
        )])
        .await;

    let (_, body) = fixture.get("/api/requests").await;
    let ids: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["c"]);
    assert_eq!(body["revision"], 2);

    let (status, _) = fixture.get("/api/requests/a?source=durable").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_identical_snapshot_keeps_revision() {
    let fixture = TestFixture::new().await;
    fixture.push(scenario_docs()).await;
    fixture.push(scenario_docs()).await;

    let (_, body) = fixture.get("/api/requests").await;
    assert_eq!(body["revision"], 1);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_changes_returns_immediately_when_behind() {
    let fixture = TestFixture::new().await;
    fixture.push(scenario_docs()).await;

    let (status, body) = fixture.get("/api/requests/changes?after=0").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["revision"], 1);
    assert_eq!(body["data"]["requests"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_changes_waits_for_next_revision() {
    let fixture = TestFixture::new().await;
    fixture.push(scenario_docs()).await;

    let client = fixture.client.clone();
    let url = fixture.url("/api/requests/changes?after=1");
    let pending = tokio::spawn(async move {
        let resp = client.get(url).send().await.unwrap();
        resp.json::<Value>().await.unwrap()
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    fixture.feed.push(vec![RawDocument::from_json(
        "c",
        json!({ "bloodGroup": "AB-", "timestamp": 300 }),
    )]);

    let body = pending.await.unwrap();
    assert_eq!(body["revision"], 2);
    assert_eq!(body["data"]["requests"][0]["id"], "c");
}

#[tokio::test]
async fn test_changes_times_out_with_current_snapshot() {
    let fixture = TestFixture::new().await;
    fixture.push(scenario_docs()).await;

    let (status, body) = fixture.get("/api/requests/changes?after=1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["revision"], 1);
}

#[tokio::test]
async fn test_status_reports_degraded_but_keeps_data() {
    let fixture = TestFixture::new().await;
    fixture.push(scenario_docs()).await;

    let (_, body) = fixture.get("/api/status").await;
    assert_eq!(body["data"]["state"], "live");
    assert_eq!(body["data"]["records"], 2);
    assert!(body["data"]["lastSyncedAt"].is_string());

    fixture
        .feed
        .fail(AppError::Remote("transport closed".to_string()));
    fixture
        .wait_for_status(|s| s.consecutive_failures == 1)
        .await;

    let (_, body) = fixture.get("/api/status").await;
    assert_eq!(body["data"]["state"], "degraded");
    assert_eq!(body["data"]["consecutiveFailures"], 1);
    assert!(body["data"]["lastError"]
        .as_str()
        .unwrap()
        .contains("transport closed"));

    let (_, body) = fixture.get("/api/requests").await;
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
}
