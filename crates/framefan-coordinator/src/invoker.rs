//! Chunk invocation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use framefan_models::{ChunkRequest, WorkerError};
use framefan_storage::operations::write_initialization_marker;
use framefan_storage::ObjectStore;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::metrics;
use crate::retry::{retry_storage, RetryConfig};
use crate::stream::{CrashReport, ResponseStreamDecoder, StreamEvent};

/// Bytes a worker streams back.
pub type WorkerStream = BoxStream<'static, CoordinatorResult<Bytes>>;

/// Something that can run one chunk attempt.
#[async_trait]
pub trait WorkerTransport: Send + Sync + 'static {
    /// Start the attempt and return its response stream.
    async fn invoke(&self, request: &ChunkRequest) -> CoordinatorResult<WorkerStream>;
}

/// Worker reached over HTTP: the request is POSTed as JSON and the response
/// body is read as a stream.
#[derive(Clone)]
pub struct HttpWorker {
    http: reqwest::Client,
    url: String,
}

impl HttpWorker {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl WorkerTransport for HttpWorker {
    async fn invoke(&self, request: &ChunkRequest) -> CoordinatorResult<WorkerStream> {
        let response = self
            .http
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| CoordinatorError::invocation(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CoordinatorError::invocation(format!(
                "worker returned {}: {}",
                status, body
            )));
        }

        Ok(response
            .bytes_stream()
            .map_err(|e| CoordinatorError::invocation(e.to_string()))
            .boxed())
    }
}

/// How one attempt ended.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Succeeded(Value),
    Failed(WorkerError),
    Crashed(CrashReport),
}

/// Writes the initialization marker and runs one attempt against a worker.
#[derive(Clone)]
pub struct Invoker {
    store: Arc<dyn ObjectStore>,
    transport: Arc<dyn WorkerTransport>,
    chunk_timeout: Duration,
    storage_retry: RetryConfig,
}

impl Invoker {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        transport: Arc<dyn WorkerTransport>,
        chunk_timeout: Duration,
    ) -> Self {
        Self {
            store,
            transport,
            chunk_timeout,
            storage_retry: RetryConfig::new("write_initialization_marker"),
        }
    }

    pub fn with_storage_retry(mut self, config: RetryConfig) -> Self {
        self.storage_retry = config;
        self
    }

    /// Run `request.attempt` of `request.chunk_index`.
    ///
    /// Transport errors are reported as `Failed` so the classifier can judge
    /// them; a stream that stops or stalls without a terminal message is
    /// `Crashed`. Only a marker that cannot be written is an `Err`.
    pub async fn invoke(&self, request: &ChunkRequest) -> CoordinatorResult<AttemptOutcome> {
        let store = self.store.as_ref();
        retry_storage(&self.storage_retry, || {
            write_initialization_marker(
                store,
                &request.render_id,
                request.chunk_index,
                request.attempt,
            )
        })
        .await?;
        metrics::record_invocation(request.attempt);

        let deadline = Instant::now() + self.chunk_timeout;
        let mut decoder = ResponseStreamDecoder::new(Some(self.chunk_timeout));

        let mut stream = match tokio::time::timeout_at(deadline, self.transport.invoke(request)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!(
                    render_id = %request.render_id,
                    chunk = request.chunk_index,
                    attempt = request.attempt,
                    error = %e,
                    "Worker invocation failed"
                );
                return Ok(AttemptOutcome::Failed(WorkerError::new(e.to_string())));
            }
            Err(_) => return Ok(crashed(decoder)),
        };

        loop {
            let next = match tokio::time::timeout_at(deadline, stream.next()).await {
                Ok(next) => next,
                Err(_) => {
                    warn!(
                        render_id = %request.render_id,
                        chunk = request.chunk_index,
                        attempt = request.attempt,
                        "Chunk attempt hit the invocation timeout"
                    );
                    break;
                }
            };

            let fragment = match next {
                Some(Ok(fragment)) => fragment,
                Some(Err(e)) => {
                    warn!(chunk = request.chunk_index, error = %e, "Worker stream broke");
                    break;
                }
                None => break,
            };

            for event in decoder.push(&fragment) {
                match event {
                    StreamEvent::Progress(p) => {
                        debug!(chunk = request.chunk_index, progress = p, "Chunk progress")
                    }
                    StreamEvent::Response(value) => return Ok(AttemptOutcome::Succeeded(value)),
                    StreamEvent::Error(error) => return Ok(AttemptOutcome::Failed(error)),
                    StreamEvent::Crash(report) => return Ok(AttemptOutcome::Crashed(report)),
                }
            }
        }

        Ok(crashed(decoder))
    }
}

fn crashed(decoder: ResponseStreamDecoder) -> AttemptOutcome {
    match decoder.finish() {
        Some(StreamEvent::Crash(report)) => {
            metrics::record_crash(report.likely_timed_out);
            AttemptOutcome::Crashed(report)
        }
        // finish() only yields a crash, and only if nothing terminal was seen.
        _ => AttemptOutcome::Failed(WorkerError::new("worker stream ended unexpectedly")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framefan_models::{FrameRange, RenderId};
    use framefan_storage::{KeyKind, MemoryStore};
    use framefan_storage::operations::{list_render_objects, of_kind};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> ChunkRequest {
        ChunkRequest {
            render_id: RenderId::parse("abcdef").unwrap(),
            chunk_index: 0,
            attempt: 1,
            frame_range: FrameRange::new(0, 7),
            opaque_config: serde_json::json!({}),
        }
    }

    async fn invoke_against(server: &MockServer, store: &MemoryStore) -> AttemptOutcome {
        let invoker = Invoker::new(
            Arc::new(store.clone()),
            Arc::new(HttpWorker::new(format!("{}/render", server.uri()))),
            Duration::from_secs(5),
        );
        invoker.invoke(&request()).await.unwrap()
    }

    #[tokio::test]
    async fn test_http_worker_success_stream() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/render"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"onProgress":0.5}{"response":{"chunk":0}}"#,
            ))
            .mount(&server)
            .await;

        let store = MemoryStore::new();
        let outcome = invoke_against(&server, &store).await;
        assert_eq!(outcome, AttemptOutcome::Succeeded(serde_json::json!({"chunk": 0})));

        let objects = list_render_objects(&store, &request().render_id).await.unwrap();
        assert_eq!(of_kind(&objects, KeyKind::InitializationMarker).count(), 1);
    }

    #[tokio::test]
    async fn test_http_worker_response_after_stray_output() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/render"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"onProgress":0.5}{partial}{"type":"success","output":"x"}"#,
            ))
            .mount(&server)
            .await;

        let outcome = invoke_against(&server, &MemoryStore::new()).await;
        assert!(matches!(outcome, AttemptOutcome::Succeeded(v) if v["output"] == "x"));
    }

    #[tokio::test]
    async fn test_http_worker_error_document() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"type":"error","message":"Compositor panicked","name":"Error","stack":""}"#,
            ))
            .mount(&server)
            .await;

        let outcome = invoke_against(&server, &MemoryStore::new()).await;
        assert!(matches!(outcome, AttemptOutcome::Failed(e) if e.message == "Compositor panicked"));
    }

    #[tokio::test]
    async fn test_http_worker_without_response_crashes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"onProgress":0.2}"#))
            .mount(&server)
            .await;

        let outcome = invoke_against(&server, &MemoryStore::new()).await;
        assert!(matches!(outcome, AttemptOutcome::Crashed(_)));
    }

    #[tokio::test]
    async fn test_http_error_status_is_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let outcome = invoke_against(&server, &MemoryStore::new()).await;
        assert!(matches!(outcome, AttemptOutcome::Failed(e) if e.message.contains("503")));
    }

    #[tokio::test]
    async fn test_marker_write_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"type":"success"}"#))
            .mount(&server)
            .await;

        let store = MemoryStore::new();
        store.fail_next_writes(2);
        let invoker = Invoker::new(
            Arc::new(store.clone()),
            Arc::new(HttpWorker::new(server.uri())),
            Duration::from_secs(5),
        )
        .with_storage_retry(RetryConfig::new("test").with_base_delay(Duration::from_millis(1)));

        let outcome = invoker.invoke(&request()).await.unwrap();
        assert!(matches!(outcome, AttemptOutcome::Succeeded(_)));
        assert_eq!(store.write_count(), 1);
    }
}
