//! API route tests against the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use futures::StreamExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use framefan_api::{create_router, ApiConfig, AppState};
use framefan_coordinator::{
    CoordinatorConfig, CoordinatorResult, FailureClassifier, RenderDispatcher, Stitcher,
    WorkerStream, WorkerTransport,
};
use framefan_models::{ChunkRequest, StitchOutput, StitchRequest};
use framefan_storage::operations::write_timing_record;
use framefan_storage::MemoryStore;

struct RenderingWorker {
    store: MemoryStore,
}

#[async_trait]
impl WorkerTransport for RenderingWorker {
    async fn invoke(&self, request: &ChunkRequest) -> CoordinatorResult<WorkerStream> {
        write_timing_record(&self.store, &request.render_id, request.chunk_index, 1, 2).await?;
        let body: Vec<CoordinatorResult<Bytes>> =
            vec![Ok(Bytes::from_static(br#"{"type":"success"}"#))];
        Ok(futures::stream::iter(body).boxed())
    }
}

struct EchoStitcher;

#[async_trait]
impl Stitcher for EchoStitcher {
    async fn stitch(&self, request: &StitchRequest) -> CoordinatorResult<StitchOutput> {
        Ok(StitchOutput {
            output_key: request.output_key.clone(),
            output_size: 4096,
        })
    }
}

/// Helper to create a test router.
fn create_test_router(store: &MemoryStore) -> Router {
    let coordinator = CoordinatorConfig {
        poll_interval: Duration::from_millis(10),
        ..Default::default()
    };
    let dispatcher = RenderDispatcher::new(
        coordinator,
        Arc::new(store.clone()),
        Arc::new(RenderingWorker {
            store: store.clone(),
        }),
        Arc::new(EchoStitcher),
        FailureClassifier::default(),
    );
    let state = AppState::with_parts(ApiConfig::default(), Arc::new(store.clone()), dispatcher);
    create_router(state, None)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(Value::Null)
    };
    (status, value)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn launch(app: &Router) -> (String, u32) {
    let (status, body) = send(
        app,
        post_json("/api/renders", json!({"durationInFrames": 61, "framesPerChunk": 8})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    (
        body["renderId"].as_str().unwrap().to_string(),
        body["chunkCount"].as_u64().unwrap() as u32,
    )
}

/// Test health endpoint and the headers every response carries.
#[tokio::test]
async fn test_health_endpoint() {
    let app = create_test_router(&MemoryStore::new());

    let response = app.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert!(headers.contains_key("X-Content-Type-Options"));
    assert!(headers.contains_key("X-Request-ID"));
}

/// Test readiness against a reachable store.
#[tokio::test]
async fn test_ready_endpoint() {
    let app = create_test_router(&MemoryStore::new());

    let (status, body) = send(&app, get("/ready")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["checks"]["storage"]["status"], "ok");
}

/// Test launching a render and waiting for it through the status endpoint.
#[tokio::test]
async fn test_launch_and_wait_for_completion() {
    let store = MemoryStore::new();
    let app = create_test_router(&store);

    let (render_id, chunk_count) = launch(&app).await;
    assert_eq!(chunk_count, 8);

    let (status, body) = send(
        &app,
        get(&format!("/api/renders/{render_id}/status?waitMs=5000")),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["done"], true);
    assert_eq!(body["fatalErrorEncountered"], false);
    assert_eq!(body["lambdasInvoked"], 8);
    assert_eq!(body["outputFile"], format!("renders/{render_id}/out.mp4"));
    assert_eq!(body["outputSize"], 4096);
}

/// Test that an invalid chunk size is rejected before anything is written.
#[tokio::test]
async fn test_launch_validation_error() {
    let store = MemoryStore::new();
    let app = create_test_router(&store);

    let (status, body) = send(
        &app,
        post_json("/api/renders", json!({"durationInFrames": 100, "framesPerChunk": 2})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_error");
    assert!(body["detail"].as_str().unwrap().contains("framesPerChunk"));
    assert!(store.keys().is_empty());
}

/// Test status of unknown and malformed render IDs.
#[tokio::test]
async fn test_status_of_unknown_render() {
    let app = create_test_router(&MemoryStore::new());

    let (status, _) = send(&app, get("/api/renders/nosuchrender/status")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, get("/api/renders/bad:id/status")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

/// Test the cleanup plan and sweep of a finished render.
#[tokio::test]
async fn test_cleanup_plan_and_sweep() {
    let store = MemoryStore::new();
    let app = create_test_router(&store);

    let (render_id, chunk_count) = launch(&app).await;
    let (_, body) = send(
        &app,
        get(&format!("/api/renders/{render_id}/status?waitMs=5000")),
    )
    .await;
    assert_eq!(body["done"], true);

    let (status, plan) = send(&app, get(&format!("/api/renders/{render_id}/cleanup"))).await;
    assert_eq!(status, StatusCode::OK);
    let jobs = plan.as_array().unwrap();
    assert_eq!(jobs.len(), 2 * chunk_count as usize + 2);
    assert_eq!(jobs[0]["type"], "prefix");
    assert_eq!(
        jobs[0]["name"],
        format!("renders/{render_id}/lambda-initialized-chunk:")
    );

    let (status, report) = send(
        &app,
        post_json(&format!("/api/renders/{render_id}/cleanup"), Value::Null),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    // Markers and timing records per chunk, plus encoding progress.
    assert_eq!(report["deleted"], 2 * chunk_count + 1);

    // Status survives cleanup.
    let (status, body) = send(&app, get(&format!("/api/renders/{render_id}/status"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["done"], true);
}
