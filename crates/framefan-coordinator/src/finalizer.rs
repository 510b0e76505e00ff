//! Completion of a render once every chunk has rendered.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use framefan_models::{
    ChunkTiming, EncodingProgress, ErrorRecord, ErrorSource, PostRenderData, RenderId,
    StitchOutput, StitchRequest,
};
use framefan_storage::operations::{
    list_render_objects, read_post_render_data, read_render_metadata, write_encoding_progress,
    write_error_record, write_post_render_data_once,
};
use framefan_storage::{ObjectKey, ObjectStore};
use tracing::{info, warn};

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::logging::RenderLogger;
use crate::metrics;
use crate::progress::ProgressAggregator;
use crate::retry::{retry_storage, RetryConfig};

/// Combines rendered chunks into the final output.
#[async_trait]
pub trait Stitcher: Send + Sync + 'static {
    async fn stitch(&self, request: &StitchRequest) -> CoordinatorResult<StitchOutput>;
}

/// Notified when a render reaches a terminal state.
#[async_trait]
pub trait CompletionHook: Send + Sync + 'static {
    async fn on_complete(&self, data: &PostRenderData) -> CoordinatorResult<()>;

    async fn on_failure(&self, render_id: &RenderId, errors: &[ErrorRecord])
        -> CoordinatorResult<()>;

    async fn on_timeout(&self, _render_id: &RenderId) -> CoordinatorResult<()> {
        Ok(())
    }
}

/// Stitcher reached over HTTP.
#[derive(Clone)]
pub struct HttpStitcher {
    http: reqwest::Client,
    url: String,
}

impl HttpStitcher {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Stitcher for HttpStitcher {
    async fn stitch(&self, request: &StitchRequest) -> CoordinatorResult<StitchOutput> {
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
            return Err(CoordinatorError::fatal_worker(format!(
                "stitcher returned {}: {}",
                status, body
            )));
        }

        response
            .json::<StitchOutput>()
            .await
            .map_err(|e| CoordinatorError::invocation(e.to_string()))
    }
}

#[derive(Clone)]
pub struct Finalizer {
    store: Arc<dyn ObjectStore>,
    stitcher: Arc<dyn Stitcher>,
    hook: Option<Arc<dyn CompletionHook>>,
    aggregator: ProgressAggregator,
    storage_retry: RetryConfig,
}

impl Finalizer {
    pub fn new(store: Arc<dyn ObjectStore>, stitcher: Arc<dyn Stitcher>) -> Self {
        Self {
            aggregator: ProgressAggregator::new(Arc::clone(&store)),
            store,
            stitcher,
            hook: None,
            storage_retry: RetryConfig::new("finalize"),
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn CompletionHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn hook(&self) -> Option<&Arc<dyn CompletionHook>> {
        self.hook.as_ref()
    }

    /// Stitch the render and write its completion record.
    ///
    /// If the completion record already exists it is returned untouched and
    /// nothing is written. Fails with `NotReady` while chunks are missing
    /// and with `FatalWorker` once a fatal error has been recorded. A failed
    /// stitch is recorded and surfaces as `FatalWorker` too.
    pub async fn finalize(&self, render_id: &RenderId) -> CoordinatorResult<PostRenderData> {
        let store = self.store.as_ref();
        if let Some(existing) = read_post_render_data(store, render_id).await? {
            return Ok(existing);
        }

        let logger = RenderLogger::new(render_id, "finalize");
        let metadata = read_render_metadata(store, render_id)
            .await?
            .ok_or_else(|| CoordinatorError::not_ready(format!("no metadata for {render_id}")))?;

        let status = self.aggregator.status(render_id).await?;
        if status.fatal_error_encountered {
            return Err(CoordinatorError::fatal_worker(format!(
                "render {render_id} has a fatal error"
            )));
        }

        let timings = self.chunk_timings(render_id).await?;
        let missing: Vec<u32> = (0..metadata.total_chunks)
            .filter(|chunk| !timings.contains_key(chunk))
            .collect();
        if !missing.is_empty() {
            return Err(CoordinatorError::not_ready(format!(
                "{} of {} chunks have not rendered yet",
                missing.len(),
                metadata.total_chunks
            )));
        }

        logger.log_progress("All chunks rendered, stitching");
        self.write_progress(render_id, &EncodingProgress::default())
            .await?;

        let request = StitchRequest {
            render_id: render_id.clone(),
            chunk_keys: (0..metadata.total_chunks)
                .map(|chunk| {
                    ObjectKey::ChunkPayload {
                        render_id: render_id.clone(),
                        chunk,
                    }
                    .encode()
                })
                .collect(),
            output_key: metadata.output_key.clone(),
            opaque_config: metadata.output_settings.clone(),
        };
        let stitch_started = Utc::now().timestamp_millis();
        let output = match self.stitcher.stitch(&request).await {
            Ok(output) => output,
            Err(e) => {
                let message = format!("Stitching failed: {e}");
                logger.log_error(&message);
                self.record_render_failure(
                    render_id,
                    &status.errors,
                    ErrorSource::Stitcher,
                    "StitchError",
                    &message,
                )
                .await?;
                return Err(CoordinatorError::fatal_worker(message));
            }
        };

        let frames = metadata
            .frame_range
            .effective_len(metadata.every_nth_frame);
        let end_time = Utc::now().timestamp_millis();
        self.write_progress(
            render_id,
            &EncodingProgress {
                frames_encoded: frames,
                combined_frames: frames,
                time_to_combine: u64::try_from(end_time - stitch_started).ok(),
            },
        )
        .await?;

        let data = PostRenderData {
            render_id: render_id.clone(),
            output_file: output.output_key,
            output_size: output.output_size,
            start_time: metadata.start_date,
            end_time,
            time_to_finish: end_time - metadata.start_date,
            chunk_count: metadata.total_chunks,
            lambdas_invoked: status.lambdas_invoked,
            retries: status.retries,
            timings: timings.into_values().collect(),
        };

        let written = retry_storage(&self.storage_retry, || {
            write_post_render_data_once(store, &data)
        })
        .await?;
        if !written {
            // Another finalizer won the race; its record is the record.
            return read_post_render_data(store, render_id)
                .await?
                .ok_or_else(|| CoordinatorError::not_ready("completion record vanished"));
        }

        metrics::record_render_finalized();
        logger.log_completion(&format!(
            "{} ({} bytes) in {}ms",
            data.output_file, data.output_size, data.time_to_finish
        ));

        if let Some(hook) = &self.hook {
            if let Err(e) = hook.on_complete(&data).await {
                warn!(render_id = %render_id, error = %e, "Completion hook failed");
            }
        }
        Ok(data)
    }

    /// The earliest-finishing timing record of each chunk.
    async fn chunk_timings(
        &self,
        render_id: &RenderId,
    ) -> CoordinatorResult<BTreeMap<u32, ChunkTiming>> {
        let mut timings: BTreeMap<u32, ChunkTiming> = BTreeMap::new();
        for object in list_render_objects(self.store.as_ref(), render_id).await? {
            if let ObjectKey::TimingRecord {
                chunk,
                start,
                rendered,
                ..
            } = object.key
            {
                let timing = ChunkTiming {
                    chunk,
                    start,
                    rendered,
                };
                timings
                    .entry(chunk)
                    .and_modify(|t| {
                        if rendered < t.rendered {
                            *t = timing;
                        }
                    })
                    .or_insert(timing);
            }
        }
        Ok(timings)
    }

    async fn write_progress(
        &self,
        render_id: &RenderId,
        progress: &EncodingProgress,
    ) -> CoordinatorResult<()> {
        let store = self.store.as_ref();
        retry_storage(&self.storage_retry, || {
            write_encoding_progress(store, render_id, progress)
        })
        .await?;
        Ok(())
    }

    /// Persist a fatal render-level error and tell the hook.
    pub(crate) async fn record_render_failure(
        &self,
        render_id: &RenderId,
        previous: &[ErrorRecord],
        source: ErrorSource,
        name: &str,
        message: &str,
    ) -> CoordinatorResult<()> {
        let attempt = previous.iter().filter(|e| e.is_render_level()).count() as u32 + 1;
        let record = ErrorRecord {
            source,
            name: name.to_string(),
            message: message.to_string(),
            stack: String::new(),
            chunk: None,
            attempt,
            total_attempts: attempt,
            will_retry: false,
            is_fatal: true,
            timestamp: Utc::now().timestamp_millis(),
        };
        let store = self.store.as_ref();
        retry_storage(&self.storage_retry, || {
            write_error_record(store, render_id, &record)
        })
        .await?;
        metrics::record_render_failed(source.as_str());

        if let Some(hook) = &self.hook {
            if let Err(e) = hook.on_failure(render_id, std::slice::from_ref(&record)).await {
                warn!(render_id = %render_id, error = %e, "Failure hook failed");
            }
        }
        info!(
            render_id = %render_id,
            attempt,
            source = source.as_str(),
            "Recorded render failure"
        );
        Ok(())
    }
}
