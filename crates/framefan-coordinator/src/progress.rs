//! Render status, reconstructed by listing storage.
//!
//! Nothing here writes. Every figure is derived from which keys exist, so the
//! aggregator can run anywhere, any number of times, while workers are still
//! writing.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use framefan_models::{
    overall_progress, ChunkRetry, ChunkState, ChunkStateEntry, ErrorRecord, RenderId,
    RenderStatus,
};
use framefan_storage::operations::{
    list_render_objects, read_encoding_progress, read_error_records, read_post_render_data,
    read_render_metadata,
};
use framefan_storage::{ObjectKey, ObjectStore};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::retry::FailureTracker;

#[derive(Clone)]
pub struct ProgressAggregator {
    store: Arc<dyn ObjectStore>,
}

/// What the marker keys say about invocations.
#[derive(Debug, Default)]
struct MarkerSummary {
    first_attempts: BTreeSet<u32>,
    highest_attempt: BTreeMap<u32, u32>,
    retries: Vec<ChunkRetry>,
}

impl ProgressAggregator {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Current status of a render.
    ///
    /// An unknown render reports zero of everything rather than an error.
    pub async fn status(&self, render_id: &RenderId) -> CoordinatorResult<RenderStatus> {
        let store = self.store.as_ref();
        let metadata = read_render_metadata(store, render_id).await?;
        let objects = list_render_objects(store, render_id).await?;

        let mut markers = MarkerSummary::default();
        let mut rendered = BTreeSet::new();
        for object in &objects {
            match object.key {
                ObjectKey::InitializationMarker { chunk, attempt, .. } => {
                    if attempt == 1 {
                        markers.first_attempts.insert(chunk);
                    } else {
                        markers.retries.push(ChunkRetry {
                            chunk,
                            attempt,
                            time: object.info.last_modified,
                        });
                    }
                    let highest = markers.highest_attempt.entry(chunk).or_insert(attempt);
                    *highest = (*highest).max(attempt);
                }
                ObjectKey::TimingRecord { chunk, .. } => {
                    rendered.insert(chunk);
                }
                _ => {}
            }
        }
        markers.retries.sort_by_key(|r| (r.chunk, r.attempt));

        let errors = read_error_records(store, render_id).await?;
        let fatal_error_encountered = errors.iter().any(|e| e.is_fatal || e.is_render_level());

        let post = read_post_render_data(store, render_id).await?;
        let done = post.is_some();

        let total_chunks = metadata.as_ref().map(|m| m.total_chunks).unwrap_or(0);
        let combined = match (&metadata, read_encoding_progress(store, render_id).await?) {
            (Some(meta), Some(encoding)) => {
                let frames = meta.frame_range.effective_len(meta.every_nth_frame);
                if frames == 0 {
                    0.0
                } else {
                    f64::from(encoding.combined_frames) / f64::from(frames)
                }
            }
            _ => 0.0,
        };
        let chunk_states = (0..total_chunks)
            .map(|chunk| ChunkStateEntry {
                chunk,
                state: observe_chunk(chunk, &markers, &rendered, &errors),
            })
            .collect();

        let lambdas_invoked = markers.first_attempts.len() as u32;
        let chunks = rendered.len() as u32;

        debug!(
            render_id = %render_id,
            lambdas_invoked,
            chunks,
            total_chunks,
            done,
            "Aggregated render status"
        );

        Ok(RenderStatus {
            render_id: render_id.clone(),
            lambdas_invoked,
            chunks,
            total_chunks,
            retries: markers.retries,
            overall_progress: overall_progress(
                lambdas_invoked,
                chunks,
                total_chunks,
                combined,
                done,
            ),
            done,
            fatal_error_encountered,
            output_file: post.as_ref().map(|p| p.output_file.clone()),
            output_size: post.as_ref().map(|p| p.output_size),
            errors,
            chunk_states,
            timed_out: false,
        })
    }

    /// Poll until the render is done or has failed, or `timeout` elapses.
    ///
    /// On timeout the last status is returned with `timed_out` set; nothing
    /// is written.
    pub async fn poll_until_done(
        &self,
        render_id: &RenderId,
        interval: Duration,
        timeout: Duration,
    ) -> CoordinatorResult<RenderStatus> {
        let deadline = Instant::now() + timeout;
        let mut tracker = FailureTracker::new(3);
        let mut last: Option<RenderStatus> = None;

        loop {
            match self.status(render_id).await {
                Ok(status) if status.done || status.fatal_error_encountered => return Ok(status),
                Ok(status) => {
                    tracker.record_success();
                    last = Some(status);
                }
                Err(e) => {
                    if tracker.record_failure() {
                        warn!(render_id = %render_id, error = %e, "Status poll failed");
                    }
                }
            }

            if Instant::now() + interval > deadline {
                return match last {
                    Some(mut status) => {
                        status.timed_out = true;
                        Ok(status)
                    }
                    None => Err(CoordinatorError::Timeout(format!(
                        "no status for render {} within {:?}",
                        render_id, timeout
                    ))),
                };
            }
            tokio::time::sleep(interval).await;
        }
    }
}

fn observe_chunk(
    chunk: u32,
    markers: &MarkerSummary,
    rendered: &BTreeSet<u32>,
    errors: &[ErrorRecord],
) -> ChunkState {
    let highest = markers.highest_attempt.get(&chunk).copied();
    let chunk_errors: Vec<&ErrorRecord> =
        errors.iter().filter(|e| e.chunk == Some(chunk)).collect();
    let failed = chunk_errors.iter().any(|e| e.is_fatal);
    let retrying = highest.is_some_and(|attempt| {
        chunk_errors
            .iter()
            .any(|e| e.will_retry && e.attempt == attempt)
    });
    ChunkState::observe(highest, rendered.contains(&chunk), failed, retrying)
}
