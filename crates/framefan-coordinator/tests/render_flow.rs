//! End-to-end renders against the in-memory store with fake workers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;

use framefan_coordinator::{
    CompletionHook, CoordinatorConfig, CoordinatorResult, FailureClassifier, RenderDispatcher,
    RenderOutcome, Stitcher, WorkerStream, WorkerTransport,
};
use framefan_models::{
    ChunkRequest, ErrorRecord, ErrorSource, PostRenderData, RenderId, RenderRequest,
    StitchOutput, StitchRequest,
};
use framefan_storage::operations::{write_chunk_payload, write_timing_record};
use framefan_storage::{plan_cleanup, sweep, KeyLifetime, MemoryStore, ObjectKey, ObjectStore};

const OK: &str = r#"{"type":"success"}"#;
const FLAKY: &str =
    r#"{"type":"error","message":"Compositor panicked","name":"Error","stack":""}"#;
const FATAL: &str =
    r#"{"type":"error","message":"TypeError: cannot read 'x' of undefined","name":"TypeError","stack":""}"#;

#[derive(Clone, Copy)]
enum Reply {
    /// Render the chunk and answer with success.
    Render,
    /// Answer with an error document without rendering.
    Fail(&'static str),
    /// Close the stream without a terminal message.
    Vanish,
    /// Never answer.
    Hang,
}

/// Worker that renders by writing a payload and a timing record, following a
/// per-chunk script of replies. Unscripted attempts render.
struct FakeWorker {
    store: MemoryStore,
    script: Mutex<HashMap<u32, Vec<Reply>>>,
    delay: Duration,
}

impl FakeWorker {
    fn new(store: &MemoryStore) -> Self {
        Self {
            store: store.clone(),
            script: Mutex::new(HashMap::new()),
            delay: Duration::ZERO,
        }
    }

    fn script(self, chunk: u32, replies: Vec<Reply>) -> Self {
        self.script.lock().unwrap().insert(chunk, replies);
        self
    }

    fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn next_reply(&self, chunk: u32) -> Reply {
        let mut script = self.script.lock().unwrap();
        match script.get_mut(&chunk) {
            Some(replies) if !replies.is_empty() => replies.remove(0),
            _ => Reply::Render,
        }
    }
}

fn body(text: &'static str) -> WorkerStream {
    let fragments: Vec<CoordinatorResult<Bytes>> = vec![Ok(Bytes::from_static(text.as_bytes()))];
    futures::stream::iter(fragments).boxed()
}

#[async_trait]
impl WorkerTransport for FakeWorker {
    async fn invoke(&self, request: &ChunkRequest) -> CoordinatorResult<WorkerStream> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.next_reply(request.chunk_index) {
            Reply::Render => {
                let frames = request.frame_range.len();
                write_chunk_payload(
                    &self.store,
                    &request.render_id,
                    request.chunk_index,
                    Bytes::from(vec![0u8; frames as usize]),
                )
                .await?;
                write_timing_record(&self.store, &request.render_id, request.chunk_index, 100, 200)
                    .await?;
                Ok(body(OK))
            }
            Reply::Fail(document) => Ok(body(document)),
            Reply::Vanish => Ok(body(r#"{"onProgress":0.5}"#)),
            Reply::Hang => Ok(futures::stream::pending().boxed()),
        }
    }
}

/// Stitcher that writes the output object.
struct FakeStitcher {
    store: MemoryStore,
}

#[async_trait]
impl Stitcher for FakeStitcher {
    async fn stitch(&self, request: &StitchRequest) -> CoordinatorResult<StitchOutput> {
        let mut size = 0u64;
        for key in &request.chunk_keys {
            size += self.store.get(key).await?.len() as u64;
        }
        self.store
            .put(&request.output_key, Bytes::from(vec![1u8; size as usize]), "video/mp4")
            .await?;
        Ok(StitchOutput {
            output_key: request.output_key.clone(),
            output_size: size,
        })
    }
}

#[derive(Default)]
struct RecordingHook {
    completed: AtomicU32,
    failed: AtomicU32,
    timed_out: AtomicU32,
}

#[async_trait]
impl CompletionHook for RecordingHook {
    async fn on_complete(&self, _data: &PostRenderData) -> CoordinatorResult<()> {
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_failure(&self, _render_id: &RenderId, _errors: &[ErrorRecord]) -> CoordinatorResult<()> {
        self.failed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_timeout(&self, _render_id: &RenderId) -> CoordinatorResult<()> {
        self.timed_out.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn config() -> CoordinatorConfig {
    CoordinatorConfig {
        crash_grace: Duration::from_millis(20),
        chunk_timeout: Duration::from_secs(5),
        poll_interval: Duration::from_millis(10),
        ..Default::default()
    }
}

fn dispatcher(config: CoordinatorConfig, store: &MemoryStore, worker: FakeWorker) -> RenderDispatcher {
    RenderDispatcher::new(
        config,
        Arc::new(store.clone()),
        Arc::new(worker),
        Arc::new(FakeStitcher {
            store: store.clone(),
        }),
        FailureClassifier::default(),
    )
}

fn request(duration_in_frames: u32, frames_per_chunk: u32) -> RenderRequest {
    RenderRequest {
        duration_in_frames,
        frames_per_chunk: Some(frames_per_chunk),
        every_nth_frame: 1,
        output_extension: "mp4".to_string(),
        ..Default::default()
    }
}

/// A clean render completes and its status reports done.
#[tokio::test]
async fn test_full_render_completes() {
    let store = MemoryStore::new();
    let hook = Arc::new(RecordingHook::default());
    let dispatcher = dispatcher(config(), &store, FakeWorker::new(&store)).with_hook(hook.clone());

    let handle = dispatcher
        .launch(&request(61, 8))
        .await
        .expect("Failed to launch render");
    let render_id = handle.render_id.clone();
    assert_eq!(handle.chunk_count, 8);

    let data = match handle.wait().await.expect("Render task failed") {
        RenderOutcome::Completed(data) => data,
        other => panic!("Expected completion, got {:?}", other),
    };
    assert_eq!(data.chunk_count, 8);
    assert_eq!(data.output_size, 61);
    assert_eq!(data.lambdas_invoked, 8);
    assert!(data.retries.is_empty());
    assert_eq!(data.timings.len(), 8);
    assert_eq!(hook.completed.load(Ordering::SeqCst), 1);

    let status = dispatcher
        .aggregator()
        .status(&render_id)
        .await
        .expect("Failed to read status");
    assert!(status.done);
    assert!(!status.fatal_error_encountered);
    assert_eq!(status.chunks, 8);
    assert_eq!(status.overall_progress, 1.0);
    assert_eq!(status.output_file.as_deref(), Some(data.output_file.as_str()));
}

/// A flaky failure is retried once and shows up in the retry history.
#[tokio::test]
async fn test_flaky_failure_is_retried() {
    let store = MemoryStore::new();
    let worker = FakeWorker::new(&store).script(2, vec![Reply::Fail(FLAKY)]);
    let dispatcher = dispatcher(config(), &store, worker);

    let handle = dispatcher.launch(&request(40, 8)).await.expect("Failed to launch render");
    let render_id = handle.render_id.clone();

    let data = match handle.wait().await.expect("Render task failed") {
        RenderOutcome::Completed(data) => data,
        other => panic!("Expected completion, got {:?}", other),
    };
    assert_eq!(data.lambdas_invoked, 5);
    assert_eq!(data.retries.len(), 1);
    assert_eq!(data.retries[0].chunk, 2);
    assert_eq!(data.retries[0].attempt, 2);

    let status = dispatcher.aggregator().status(&render_id).await.expect("Failed to read status");
    assert!(status.done);
    assert!(!status.fatal_error_encountered);
    assert_eq!(status.errors.len(), 1);
    assert!(status.errors[0].will_retry);
}

/// A non-flaky failure stops every chunk that has not started yet.
#[tokio::test]
async fn test_fatal_failure_fails_fast() {
    let store = MemoryStore::new();
    let worker = FakeWorker::new(&store).script(0, vec![Reply::Fail(FATAL)]);
    let hook = Arc::new(RecordingHook::default());
    let config = CoordinatorConfig {
        max_parallel: 1,
        ..config()
    };
    let dispatcher = dispatcher(config, &store, worker).with_hook(hook.clone());

    let handle = dispatcher.launch(&request(80, 8)).await.expect("Failed to launch render");
    let render_id = handle.render_id.clone();

    let errors = match handle.wait().await.expect("Render task failed") {
        RenderOutcome::Failed(errors) => errors,
        other => panic!("Expected failure, got {:?}", other),
    };
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].chunk, Some(0));
    assert!(errors[0].is_fatal);
    assert_eq!(hook.failed.load(Ordering::SeqCst), 1);
    assert_eq!(hook.completed.load(Ordering::SeqCst), 0);

    let status = dispatcher.aggregator().status(&render_id).await.expect("Failed to read status");
    assert_eq!(status.lambdas_invoked, 1);
    assert!(status.fatal_error_encountered);
    assert!(!status.done);
}

/// A worker that vanishes without rendering fails the render after the grace period.
#[tokio::test]
async fn test_single_chunk_crash_is_fatal() {
    let store = MemoryStore::new();
    let worker = FakeWorker::new(&store).script(0, vec![Reply::Vanish]);
    let dispatcher = dispatcher(config(), &store, worker);

    let handle = dispatcher.launch(&request(8, 8)).await.expect("Failed to launch render");
    let render_id = handle.render_id.clone();
    assert_eq!(handle.chunk_count, 1);

    let errors = match handle.wait().await.expect("Render task failed") {
        RenderOutcome::Failed(errors) => errors,
        other => panic!("Expected failure, got {:?}", other),
    };
    assert_eq!(errors[0].source, ErrorSource::Crash);

    let status = dispatcher.aggregator().status(&render_id).await.expect("Failed to read status");
    assert!(!status.done);
    assert!(status.fatal_error_encountered);
    assert_eq!(status.retries.len(), 0);
}

/// Cleanup after completion leaves only retained keys behind.
#[tokio::test]
async fn test_cleanup_after_completion() {
    let store = MemoryStore::new();
    let dispatcher = dispatcher(config(), &store, FakeWorker::new(&store));

    let handle = dispatcher.launch(&request(30, 8)).await.expect("Failed to launch render");
    let render_id = handle.render_id.clone();
    let chunk_count = handle.chunk_count;
    assert!(matches!(
        handle.wait().await.expect("Render task failed"),
        RenderOutcome::Completed(_)
    ));

    let jobs = plan_cleanup(&render_id, chunk_count);
    assert_eq!(jobs.len(), 2 * chunk_count as usize + 2);
    let report = sweep(&store, &jobs).await.expect("Failed to sweep");
    // A marker, a payload and a timing record per chunk, plus encoding progress.
    assert_eq!(report.deleted, 3 * chunk_count + 1);

    for key in store.keys() {
        let decoded = ObjectKey::decode(&key).expect("Unexpected key in bucket");
        assert_eq!(decoded.lifetime(), KeyLifetime::Retained, "{key} survived cleanup");
    }

    let status = dispatcher.aggregator().status(&render_id).await.expect("Failed to read status");
    assert!(status.done);
}

/// Cancelling stops new invocations.
#[tokio::test]
async fn test_cancel_stops_dispatch() {
    let store = MemoryStore::new();
    let worker = FakeWorker::new(&store).delay(Duration::from_millis(50));
    let config = CoordinatorConfig {
        max_parallel: 1,
        ..config()
    };
    let dispatcher = dispatcher(config, &store, worker);

    let handle = dispatcher.launch(&request(64, 8)).await.expect("Failed to launch render");
    let render_id = handle.render_id.clone();
    handle.cancel();

    assert_eq!(
        handle.wait().await.expect("Render task failed"),
        RenderOutcome::Cancelled
    );
    let status = dispatcher.aggregator().status(&render_id).await.expect("Failed to read status");
    assert!(status.lambdas_invoked < 8);
    assert!(!status.done);
}

/// A render that outlives its deadline reports a timeout without writing a failure.
#[tokio::test]
async fn test_render_timeout() {
    let store = MemoryStore::new();
    let worker = FakeWorker::new(&store).script(0, vec![Reply::Hang]);
    let hook = Arc::new(RecordingHook::default());
    let config = CoordinatorConfig {
        render_timeout: Duration::from_millis(100),
        ..config()
    };
    let dispatcher = dispatcher(config, &store, worker).with_hook(hook.clone());

    let handle = dispatcher.launch(&request(16, 8)).await.expect("Failed to launch render");
    let render_id = handle.render_id.clone();

    assert_eq!(
        handle.wait().await.expect("Render task failed"),
        RenderOutcome::TimedOut
    );
    assert_eq!(hook.timed_out.load(Ordering::SeqCst), 1);

    let status = dispatcher.aggregator().status(&render_id).await.expect("Failed to read status");
    assert!(!status.done);
    assert!(!status.fatal_error_encountered);
    assert_eq!(status.chunks, 1);
}
