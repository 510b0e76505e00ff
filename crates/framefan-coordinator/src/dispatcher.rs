//! Render dispatch.
//!
//! A launch validates the plan, persists the render metadata and then runs
//! every chunk in the background, bounded by a semaphore. The first permanent
//! chunk failure raises the fatal flag: chunks that have not started yet are
//! never invoked, chunks already in flight run to completion.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use framefan_models::{
    ErrorRecord, ErrorSource, PostRenderData, RenderId, RenderJob, RenderMetadata, RenderRequest,
};
use framefan_storage::operations::{read_error_records, write_render_metadata};
use framefan_storage::{ObjectKey, ObjectStore};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, warn, Instrument};

use crate::attempts::{ChunkOutcome, RenderContext, RetryCoordinator, StopSignal};
use crate::config::CoordinatorConfig;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::finalizer::{CompletionHook, Finalizer, HttpStitcher, Stitcher};
use crate::flaky::FailureClassifier;
use crate::invoker::{HttpWorker, Invoker, WorkerTransport};
use crate::metrics;
use crate::plan::ChunkPlan;
use crate::progress::ProgressAggregator;
use crate::retry::{retry_async, retry_storage, RetryConfig};

/// How a render ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderOutcome {
    Completed(PostRenderData),
    /// Every error record persisted for the render.
    Failed(Vec<ErrorRecord>),
    Cancelled,
    TimedOut,
}

/// A render running in the background.
pub struct RenderHandle {
    pub render_id: RenderId,
    pub chunk_count: u32,
    cancel: StopSignal,
    join: JoinHandle<CoordinatorResult<RenderOutcome>>,
}

impl RenderHandle {
    /// Stop issuing invocations. Attempts already in flight still finish.
    pub fn cancel(&self) {
        self.cancel.raise();
    }

    pub async fn wait(self) -> CoordinatorResult<RenderOutcome> {
        self.join
            .await
            .map_err(|e| CoordinatorError::Cancelled(format!("render task ended: {e}")))?
    }
}

#[derive(Clone)]
pub struct RenderDispatcher {
    config: CoordinatorConfig,
    store: Arc<dyn ObjectStore>,
    chunks: RetryCoordinator,
    finalizer: Finalizer,
    aggregator: ProgressAggregator,
}

impl RenderDispatcher {
    pub fn new(
        config: CoordinatorConfig,
        store: Arc<dyn ObjectStore>,
        transport: Arc<dyn WorkerTransport>,
        stitcher: Arc<dyn Stitcher>,
        classifier: FailureClassifier,
    ) -> Self {
        let invoker = Invoker::new(Arc::clone(&store), transport, config.chunk_timeout);
        let chunks = RetryCoordinator::new(
            Arc::clone(&store),
            invoker,
            Arc::new(classifier),
            config.max_retries,
            config.crash_grace,
        );
        Self {
            finalizer: Finalizer::new(Arc::clone(&store), stitcher),
            aggregator: ProgressAggregator::new(Arc::clone(&store)),
            config,
            store,
            chunks,
        }
    }

    /// Build a dispatcher with HTTP workers from configuration.
    pub fn from_config(
        config: CoordinatorConfig,
        store: Arc<dyn ObjectStore>,
    ) -> CoordinatorResult<Self> {
        let worker_url = config
            .worker_url
            .clone()
            .ok_or_else(|| CoordinatorError::config_error("FRAMEFAN_WORKER_URL is required"))?;
        let stitcher_url = config
            .stitcher_endpoint()
            .ok_or_else(|| CoordinatorError::config_error("FRAMEFAN_STITCHER_URL is required"))?;

        let classifier = match &config.flaky_rules_file {
            Some(path) => FailureClassifier::from_file(path)?,
            None => FailureClassifier::default(),
        };

        Ok(Self::new(
            config,
            store,
            Arc::new(HttpWorker::new(worker_url)),
            Arc::new(HttpStitcher::new(stitcher_url)),
            classifier,
        ))
    }

    pub fn with_hook(mut self, hook: Arc<dyn CompletionHook>) -> Self {
        self.finalizer = self.finalizer.with_hook(hook);
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn aggregator(&self) -> &ProgressAggregator {
        &self.aggregator
    }

    pub fn finalizer(&self) -> &Finalizer {
        &self.finalizer
    }

    /// Validate a request and plan its chunks. Nothing is written.
    pub fn prepare(&self, request: &RenderRequest) -> CoordinatorResult<(RenderJob, ChunkPlan)> {
        if request.output_extension.is_empty()
            || !request
                .output_extension
                .chars()
                .all(|c| c.is_ascii_alphanumeric())
        {
            return Err(CoordinatorError::validation(format!(
                "invalid output extension '{}'",
                request.output_extension
            )));
        }

        let plan = ChunkPlan::compute_with(
            self.config.plan_limits(),
            request.duration_in_frames,
            request.frame_range,
            request.frames_per_chunk,
            request.every_nth_frame,
        )?;

        let render_id = match request.expiry {
            Some(expiry) => RenderId::with_expiry(expiry),
            None => RenderId::new(),
        };
        let job = RenderJob {
            render_id,
            chunk_count: plan.chunk_count(),
            frames_per_chunk: plan.frames_per_chunk,
            frame_range: plan.frame_range,
            every_nth_frame: plan.every_nth_frame,
            output_extension: request.output_extension.clone(),
            output_settings: request.output_settings.clone(),
            created_at: Utc::now(),
        };
        Ok((job, plan))
    }

    /// Persist the render metadata and start dispatching in the background.
    ///
    /// Returns once the metadata is stored. Validation errors are returned
    /// before anything is written.
    pub async fn launch(&self, request: &RenderRequest) -> CoordinatorResult<RenderHandle> {
        let (job, plan) = self.prepare(request)?;

        let metadata = RenderMetadata {
            render_id: job.render_id.clone(),
            start_date: job.start_ms(),
            total_chunks: job.chunk_count,
            frame_range: job.frame_range,
            frames_per_chunk: job.frames_per_chunk,
            every_nth_frame: job.every_nth_frame,
            chunks: plan.chunks.clone(),
            output_key: ObjectKey::Output {
                render_id: job.render_id.clone(),
                extension: job.output_extension.clone(),
            }
            .encode(),
            output_settings: job.output_settings.clone(),
        };
        let store = self.store.as_ref();
        retry_storage(&RetryConfig::new("write_render_metadata"), || {
            write_render_metadata(store, &metadata)
        })
        .await?;
        metrics::record_render_launched();

        let ctx = RenderContext::new(job.render_id.clone(), job.output_settings.clone());
        ctx.logger.log_start(&format!(
            "{} chunks of {} frames",
            job.chunk_count, job.frames_per_chunk
        ));
        let span = ctx.logger.create_span();
        let cancel = ctx.cancel.clone();
        let this = self.clone();
        let join = tokio::spawn(async move { this.run(ctx, plan).await }.instrument(span));

        Ok(RenderHandle {
            render_id: job.render_id,
            chunk_count: job.chunk_count,
            cancel,
            join,
        })
    }

    /// Dispatch every chunk, then finalize or report the failure.
    async fn run(&self, ctx: RenderContext, plan: ChunkPlan) -> CoordinatorResult<RenderOutcome> {
        let render_id = ctx.render_id.clone();
        let outcome =
            match tokio::time::timeout(self.config.render_timeout, self.dispatch(&ctx, plan)).await
            {
                Ok(outcome) => outcome?,
                Err(_) => {
                    // Dropping the dispatch future stops waiting on in-flight
                    // attempts; the workers themselves keep going.
                    ctx.cancel.raise();
                    ctx.logger.log_error(&format!(
                        "Render did not finish within {:?}",
                        self.config.render_timeout
                    ));
                    metrics::record_render_failed("timeout");
                    if let Some(hook) = self.finalizer.hook() {
                        if let Err(e) = hook.on_timeout(&render_id).await {
                            warn!(render_id = %render_id, error = %e, "Timeout hook failed");
                        }
                    }
                    RenderOutcome::TimedOut
                }
            };
        Ok(outcome)
    }

    async fn dispatch(
        &self,
        ctx: &RenderContext,
        plan: ChunkPlan,
    ) -> CoordinatorResult<RenderOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel.max(1)));
        let mut tasks = JoinSet::new();

        for chunk in plan.chunks {
            let permit = tokio::select! {
                permit = Arc::clone(&semaphore).acquire_owned() => permit
                    .map_err(|_| CoordinatorError::Cancelled("dispatch semaphore closed".into()))?,
                _ = ctx.fatal.raised() => break,
                _ = ctx.cancel.raised() => break,
            };
            if ctx.stopped() {
                break;
            }

            let chunks = self.chunks.clone();
            let ctx = ctx.clone();
            tasks.spawn(async move {
                let _permit = permit;
                chunks.run_chunk(&ctx, chunk).await
            });
        }

        let mut infrastructure_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(ChunkOutcome::Abandoned { chunk, state })) => {
                    ctx.logger
                        .log_warning(&format!("Chunk {chunk} abandoned in state {:?}", state.status()));
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    // Storage is failing underneath us; stop issuing work.
                    error!(render_id = %ctx.render_id, error = %e, "Chunk bookkeeping failed");
                    ctx.fatal.raise();
                    infrastructure_error.get_or_insert(e);
                }
                Err(e) => {
                    error!(render_id = %ctx.render_id, error = %e, "Chunk task panicked");
                    ctx.fatal.raise();
                    infrastructure_error
                        .get_or_insert(CoordinatorError::invocation(format!("chunk task: {e}")));
                }
            }
        }

        if ctx.cancel.is_raised() && !ctx.fatal.is_raised() {
            ctx.logger.log_warning("Render cancelled");
            metrics::record_render_failed("cancelled");
            return Ok(RenderOutcome::Cancelled);
        }

        if ctx.fatal.is_raised() {
            let errors = read_error_records(self.store.as_ref(), &ctx.render_id).await?;
            if errors.is_empty() {
                if let Some(e) = infrastructure_error {
                    return Err(e);
                }
            }
            metrics::record_render_failed("chunk");
            self.notify_failure(&ctx.render_id, &errors).await;
            return Ok(RenderOutcome::Failed(errors));
        }

        self.finish(ctx).await
    }

    /// Finalize, tolerating timing records that are not yet visible.
    ///
    /// A render whose chunks never all report in is recorded as failed, so
    /// its status does not stay undecided.
    async fn finish(&self, ctx: &RenderContext) -> CoordinatorResult<RenderOutcome> {
        let retry = RetryConfig::new("finalize")
            .with_max_retries(5)
            .with_base_delay(self.config.poll_interval.min(Duration::from_secs(1)));
        let finalized = retry_async(
            &retry,
            |e: &CoordinatorError| matches!(e, CoordinatorError::NotReady(_)),
            || self.finalizer.finalize(&ctx.render_id),
        )
        .await;

        match finalized {
            Ok(data) => Ok(RenderOutcome::Completed(data)),
            Err(CoordinatorError::FatalWorker(message)) => {
                // The finalizer already recorded the failure and told the hook.
                ctx.logger.log_error(&message);
                let errors = read_error_records(self.store.as_ref(), &ctx.render_id).await?;
                Ok(RenderOutcome::Failed(errors))
            }
            Err(CoordinatorError::NotReady(message)) => {
                let message = format!("Render never became complete: {message}");
                ctx.logger.log_error(&message);
                let previous = read_error_records(self.store.as_ref(), &ctx.render_id).await?;
                self.finalizer
                    .record_render_failure(
                        &ctx.render_id,
                        &previous,
                        ErrorSource::Renderer,
                        "IncompleteRender",
                        &message,
                    )
                    .await?;
                let errors = read_error_records(self.store.as_ref(), &ctx.render_id).await?;
                Ok(RenderOutcome::Failed(errors))
            }
            Err(e) => Err(e),
        }
    }

    async fn notify_failure(&self, render_id: &RenderId, errors: &[ErrorRecord]) {
        if let Some(hook) = self.finalizer.hook() {
            if let Err(e) = hook.on_failure(render_id, errors).await {
                warn!(render_id = %render_id, error = %e, "Failure hook failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::WorkerStream;
    use async_trait::async_trait;
    use bytes::Bytes;
    use framefan_models::{ChunkRequest, FrameRange, StitchOutput, StitchRequest};
    use framefan_storage::operations::{read_render_metadata, write_timing_record};
    use framefan_storage::MemoryStore;
    use futures::StreamExt;

    struct RenderingWorker {
        store: MemoryStore,
    }

    #[async_trait]
    impl WorkerTransport for RenderingWorker {
        async fn invoke(&self, request: &ChunkRequest) -> CoordinatorResult<WorkerStream> {
            write_timing_record(&self.store, &request.render_id, request.chunk_index, 1, 2)
                .await?;
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
                output_size: request.chunk_keys.len() as u64,
            })
        }
    }

    /// Replies with success without ever writing a timing record.
    struct SilentWorker;

    #[async_trait]
    impl WorkerTransport for SilentWorker {
        async fn invoke(&self, _request: &ChunkRequest) -> CoordinatorResult<WorkerStream> {
            let body: Vec<CoordinatorResult<Bytes>> =
                vec![Ok(Bytes::from_static(br#"{"type":"success"}"#))];
            Ok(futures::stream::iter(body).boxed())
        }
    }

    struct BrokenStitcher;

    #[async_trait]
    impl Stitcher for BrokenStitcher {
        async fn stitch(&self, _request: &StitchRequest) -> CoordinatorResult<StitchOutput> {
            Err(CoordinatorError::invocation("connection reset"))
        }
    }

    fn dispatcher(store: &MemoryStore) -> RenderDispatcher {
        RenderDispatcher::new(
            CoordinatorConfig::default(),
            Arc::new(store.clone()),
            Arc::new(RenderingWorker {
                store: store.clone(),
            }),
            Arc::new(EchoStitcher),
            FailureClassifier::default(),
        )
    }

    fn small_request() -> RenderRequest {
        RenderRequest {
            duration_in_frames: 16,
            frames_per_chunk: Some(8),
            every_nth_frame: 1,
            output_extension: "mp4".into(),
            ..Default::default()
        }
    }

    fn fast_config() -> CoordinatorConfig {
        CoordinatorConfig {
            poll_interval: Duration::from_millis(1),
            ..Default::default()
        }
    }

    #[test]
    fn test_prepare_rejects_small_chunks() {
        let store = MemoryStore::new();
        let request = RenderRequest {
            duration_in_frames: 100,
            frames_per_chunk: Some(2),
            every_nth_frame: 1,
            output_extension: "mp4".into(),
            ..Default::default()
        };
        let err = dispatcher(&store).prepare(&request).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_prepare_rejects_bad_extension() {
        let store = MemoryStore::new();
        let request = RenderRequest {
            duration_in_frames: 100,
            every_nth_frame: 1,
            output_extension: "../mp4".into(),
            ..Default::default()
        };
        assert!(dispatcher(&store).prepare(&request).unwrap_err().is_validation());
    }

    #[tokio::test]
    async fn test_validation_error_writes_nothing() {
        let store = MemoryStore::new();
        let request = RenderRequest {
            duration_in_frames: 100,
            every_nth_frame: 0,
            output_extension: "mp4".into(),
            ..Default::default()
        };
        assert!(dispatcher(&store).launch(&request).await.is_err());
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_launch_persists_metadata_and_completes() {
        let store = MemoryStore::new();
        let request = RenderRequest {
            duration_in_frames: 61,
            frames_per_chunk: Some(8),
            every_nth_frame: 1,
            output_extension: "mp4".into(),
            ..Default::default()
        };
        let handle = dispatcher(&store).launch(&request).await.unwrap();
        assert_eq!(handle.chunk_count, 8);

        let render_id = handle.render_id.clone();
        let metadata = read_render_metadata(&store, &render_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(metadata.total_chunks, 8);
        assert_eq!(metadata.frame_range, FrameRange::new(0, 60));
        assert_eq!(metadata.output_key, format!("renders/{render_id}/out.mp4"));

        match handle.wait().await.unwrap() {
            RenderOutcome::Completed(data) => {
                assert_eq!(data.chunk_count, 8);
                assert_eq!(data.lambdas_invoked, 8);
                assert_eq!(data.output_size, 8);
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_timing_records_fail_the_render() {
        let store = MemoryStore::new();
        let dispatcher = RenderDispatcher::new(
            fast_config(),
            Arc::new(store.clone()),
            Arc::new(SilentWorker),
            Arc::new(EchoStitcher),
            FailureClassifier::default(),
        );

        let handle = dispatcher.launch(&small_request()).await.unwrap();
        let render_id = handle.render_id.clone();
        match handle.wait().await.unwrap() {
            RenderOutcome::Failed(errors) => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].source, ErrorSource::Renderer);
                assert!(errors[0].is_render_level());
            }
            other => panic!("expected failure, got {other:?}"),
        }

        let status = dispatcher.aggregator().status(&render_id).await.unwrap();
        assert!(status.fatal_error_encountered);
        assert!(!status.done);
    }

    #[tokio::test]
    async fn test_stitch_transport_error_fails_the_render() {
        let store = MemoryStore::new();
        let dispatcher = RenderDispatcher::new(
            fast_config(),
            Arc::new(store.clone()),
            Arc::new(RenderingWorker {
                store: store.clone(),
            }),
            Arc::new(BrokenStitcher),
            FailureClassifier::default(),
        );

        let handle = dispatcher.launch(&small_request()).await.unwrap();
        match handle.wait().await.unwrap() {
            RenderOutcome::Failed(errors) => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].source, ErrorSource::Stitcher);
                assert!(errors[0].message.contains("connection reset"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
