//! Tests for the content API and the file-backed document store.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use tempfile::TempDir;
use textsync_core::{DocumentStore, InMemoryStore, DEFAULT_CONTENT};
use textsync_daemon::api::{self, ApiState, DOC_PATH};
use textsync_daemon::{FileStore, HttpStore};
use tower::ServiceExt;

fn state_with(store: Arc<InMemoryStore>) -> Arc<ApiState> {
    Arc::new(ApiState {
        store,
        default_content: DEFAULT_CONTENT.to_string(),
    })
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");
    String::from_utf8(bytes.to_vec()).expect("Body is UTF-8")
}

fn get_doc() -> Request<Body> {
    Request::builder()
        .uri(DOC_PATH)
        .body(Body::empty())
        .expect("Valid request")
}

fn post_doc(content: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(DOC_PATH)
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from(content.to_string()))
        .expect("Valid request")
}

// ==================== Content API ====================

#[tokio::test]
async fn test_get_returns_default_when_empty() {
    let app = api::router(state_with(Arc::new(InMemoryStore::new())));

    let response = app.oneshot(get_doc()).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
    assert_eq!(body_text(response).await, "**Hello Markdown!**");
}

#[tokio::test]
async fn test_post_then_get() {
    let store = Arc::new(InMemoryStore::new());
    let state = state_with(Arc::clone(&store));

    let response = api::router(Arc::clone(&state))
        .oneshot(post_doc("# Notes\n\nshared"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "");
    assert_eq!(store.snapshot().as_deref(), Some("# Notes\n\nshared"));

    let response = api::router(state).oneshot(get_doc()).await.unwrap();
    assert_eq!(body_text(response).await, "# Notes\n\nshared");
}

#[tokio::test]
async fn test_any_origin_is_allowed() {
    let app = api::router(state_with(Arc::new(InMemoryStore::new())));
    let request = Request::builder()
        .uri(DOC_PATH)
        .header(header::ORIGIN, "http://localhost:3000")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "*"
    );
}

#[tokio::test]
async fn test_seed_fills_empty_store_only() {
    let empty = Arc::new(InMemoryStore::new());
    api::seed(&state_with(Arc::clone(&empty))).await.unwrap();
    assert_eq!(empty.snapshot().as_deref(), Some(DEFAULT_CONTENT));

    let existing = Arc::new(InMemoryStore::with_content("kept"));
    api::seed(&state_with(Arc::clone(&existing))).await.unwrap();
    assert_eq!(existing.snapshot().as_deref(), Some("kept"));
    assert_eq!(existing.write_count(), 0);
}

// ==================== FileStore ====================

#[tokio::test]
async fn test_file_store_missing_file_reads_none() {
    let dir = TempDir::new().unwrap();
    let store = FileStore::new(dir.path().join("doc.md"));
    assert_eq!(store.read().await.unwrap(), None);
}

#[tokio::test]
async fn test_file_store_creates_parent_directories() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested/deeper/doc.md");
    let store = FileStore::new(&path);

    store.write("héllo 世界").await.unwrap();

    assert_eq!(std::fs::read_to_string(&path).unwrap(), "héllo 世界");
    assert_eq!(store.read().await.unwrap().as_deref(), Some("héllo 世界"));
}

#[tokio::test]
async fn test_api_over_file_store() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("doc.md");
    let state = Arc::new(ApiState {
        store: Arc::new(FileStore::new(&path)),
        default_content: DEFAULT_CONTENT.to_string(),
    });

    api::seed(&state).await.unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), DEFAULT_CONTENT);

    api::router(Arc::clone(&state))
        .oneshot(post_doc("updated"))
        .await
        .unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "updated");
}

// ==================== HttpStore ====================

#[tokio::test]
async fn test_http_store_gives_up_on_silent_server() {
    // Accepts connections but never answers
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}{}", listener.local_addr().unwrap(), DOC_PATH);
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let store = HttpStore::with_timeout(url, Duration::from_millis(200)).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), store.write("lost"))
        .await
        .expect("Write should fail before the test timeout");
    assert!(result.is_err());
}
