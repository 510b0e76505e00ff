//! Per-chunk retry bookkeeping.
//!
//! A chunk is invoked, and on failure either re-invoked with the next attempt
//! number or failed permanently. A permanent failure raises the render's
//! fatal flag, which stops new invocations but leaves running ones alone.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use framefan_models::{ChunkRange, ChunkRequest, ChunkState, ErrorRecord, ErrorSource, RenderId, WorkerError};
use framefan_storage::keys::chunk_timings_prefix;
use framefan_storage::operations::write_error_record;
use framefan_storage::ObjectStore;
use tokio::sync::watch;

use crate::error::CoordinatorResult;
use crate::flaky::FailureClassifier;
use crate::invoker::{AttemptOutcome, Invoker};
use crate::logging::RenderLogger;
use crate::metrics;
use crate::retry::{retry_storage, RetryConfig};
use crate::stream::CrashReport;

/// A one-way switch shared by every task of a render.
///
/// Used both for the fatal flag and for cancellation.
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn raise(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_raised(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the signal is raised.
    pub async fn raised(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in self, so wait_for cannot see a closed channel.
        let _ = rx.wait_for(|raised| *raised).await;
    }
}

/// How a chunk ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkOutcome {
    Completed { chunk: u32, attempt: u32 },
    Failed { chunk: u32, record: ErrorRecord },
    /// Not (re)invoked because the render was stopped first.
    Abandoned { chunk: u32, state: ChunkState },
}

impl ChunkOutcome {
    pub fn chunk(&self) -> u32 {
        match self {
            ChunkOutcome::Completed { chunk, .. }
            | ChunkOutcome::Failed { chunk, .. }
            | ChunkOutcome::Abandoned { chunk, .. } => *chunk,
        }
    }
}

/// Drives one chunk through its attempts.
#[derive(Clone)]
pub struct RetryCoordinator {
    store: Arc<dyn ObjectStore>,
    invoker: Invoker,
    classifier: Arc<FailureClassifier>,
    max_retries: u32,
    crash_grace: Duration,
    storage_retry: RetryConfig,
}

/// Render-wide context handed to each chunk.
#[derive(Clone)]
pub struct RenderContext {
    pub render_id: RenderId,
    pub opaque_config: serde_json::Value,
    pub fatal: StopSignal,
    pub cancel: StopSignal,
    pub logger: RenderLogger,
}

impl RenderContext {
    pub fn new(render_id: RenderId, opaque_config: serde_json::Value) -> Self {
        let logger = RenderLogger::new(&render_id, "dispatch");
        Self {
            render_id,
            opaque_config,
            fatal: StopSignal::new(),
            cancel: StopSignal::new(),
            logger,
        }
    }

    pub fn stopped(&self) -> bool {
        self.fatal.is_raised() || self.cancel.is_raised()
    }
}

impl RetryCoordinator {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        invoker: Invoker,
        classifier: Arc<FailureClassifier>,
        max_retries: u32,
        crash_grace: Duration,
    ) -> Self {
        Self {
            store,
            invoker,
            classifier,
            max_retries,
            crash_grace,
            storage_retry: RetryConfig::new("write_error_record"),
        }
    }

    pub fn with_storage_retry(mut self, config: RetryConfig) -> Self {
        self.storage_retry = config;
        self
    }

    /// Total attempts allowed per chunk.
    pub fn total_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Run a chunk until it completes, fails permanently, or the render stops.
    pub async fn run_chunk(
        &self,
        ctx: &RenderContext,
        chunk: ChunkRange,
    ) -> CoordinatorResult<ChunkOutcome> {
        let mut state = ChunkState::NotStarted;

        loop {
            if ctx.stopped() {
                return Ok(ChunkOutcome::Abandoned {
                    chunk: chunk.index,
                    state,
                });
            }

            let attempt = state.next_attempt()?;
            state = state.invoke(attempt)?;
            ctx.logger.log_chunk(chunk.index, attempt, "Invoking chunk");

            let request = ChunkRequest {
                render_id: ctx.render_id.clone(),
                chunk_index: chunk.index,
                attempt,
                frame_range: chunk.frame_range(),
                opaque_config: ctx.opaque_config.clone(),
            };
            let started = std::time::Instant::now();

            match self.invoker.invoke(&request).await? {
                AttemptOutcome::Succeeded(_) => {
                    metrics::record_chunk_duration(started.elapsed().as_secs_f64());
                    state = state.complete()?;
                    ctx.logger.log_chunk(chunk.index, attempt, "Chunk completed");
                    return Ok(ChunkOutcome::Completed {
                        chunk: chunk.index,
                        attempt: state.attempt(),
                    });
                }
                AttemptOutcome::Failed(error) => {
                    let will_retry =
                        self.classifier.is_flaky(&error) && attempt < self.total_attempts();
                    let record = self.error_record(
                        FailureClassifier::source_of(&error),
                        &error,
                        chunk.index,
                        attempt,
                        will_retry,
                    );
                    self.persist(ctx, &record).await?;

                    if will_retry {
                        metrics::record_retry();
                        ctx.logger.log_chunk(
                            chunk.index,
                            attempt,
                            &format!("Flaky failure, retrying: {}", error.message),
                        );
                        state = state.retry()?;
                        continue;
                    }

                    metrics::record_chunk_failure(record.source.as_str());
                    ctx.logger.log_error(&format!(
                        "Chunk {} failed on attempt {}: {}",
                        chunk.index, attempt, error.message
                    ));
                    ctx.fatal.raise();
                    return Ok(ChunkOutcome::Failed {
                        chunk: chunk.index,
                        record,
                    });
                }
                AttemptOutcome::Crashed(report) => {
                    return self.settle_crash(ctx, chunk.index, attempt, state, report).await;
                }
            }
        }
    }

    /// A crashed worker may still have finished rendering. Wait out the grace
    /// period, then either accept a late timing record or fail the chunk.
    async fn settle_crash(
        &self,
        ctx: &RenderContext,
        chunk: u32,
        attempt: u32,
        state: ChunkState,
        report: CrashReport,
    ) -> CoordinatorResult<ChunkOutcome> {
        ctx.logger.log_chunk(
            chunk,
            attempt,
            &format!(
                "Worker ended without a response after {:.1}s, waiting for late timing record",
                report.elapsed_seconds
            ),
        );
        tokio::time::sleep(self.crash_grace).await;

        let prefix = chunk_timings_prefix(&ctx.render_id, chunk);
        if !self.store.list(&prefix).await?.is_empty() {
            let state = state.complete()?;
            ctx.logger.log_chunk(chunk, attempt, "Late timing record found, chunk completed");
            return Ok(ChunkOutcome::Completed {
                chunk,
                attempt: state.attempt(),
            });
        }

        let message = if report.likely_timed_out {
            format!(
                "Chunk worker did not respond within {:.1}s and most likely hit its timeout",
                report.elapsed_seconds
            )
        } else {
            format!(
                "Chunk worker exited after {:.1}s without a response",
                report.elapsed_seconds
            )
        };
        let error = WorkerError {
            message,
            name: "CrashWithoutResponse".to_string(),
            stack: String::new(),
        };
        let record = self.error_record(ErrorSource::Crash, &error, chunk, attempt, false);
        self.persist(ctx, &record).await?;
        state.fail()?;

        metrics::record_chunk_failure(ErrorSource::Crash.as_str());
        ctx.logger.log_error(&format!("Chunk {} crashed: {}", chunk, error.message));
        ctx.fatal.raise();
        Ok(ChunkOutcome::Failed { chunk, record })
    }

    fn error_record(
        &self,
        source: ErrorSource,
        error: &WorkerError,
        chunk: u32,
        attempt: u32,
        will_retry: bool,
    ) -> ErrorRecord {
        ErrorRecord {
            source,
            name: error.name.clone(),
            message: error.message.clone(),
            stack: error.stack.clone(),
            chunk: Some(chunk),
            attempt,
            total_attempts: self.total_attempts(),
            will_retry,
            is_fatal: !will_retry,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    async fn persist(&self, ctx: &RenderContext, record: &ErrorRecord) -> CoordinatorResult<()> {
        let store = self.store.as_ref();
        retry_storage(&self.storage_retry, || {
            write_error_record(store, &ctx.render_id, record)
        })
        .await?;
        Ok(())
    }
}
