//! Render status as reconstructed from storage.

use serde::{Deserialize, Serialize};

use crate::chunk::ChunkStateEntry;
use crate::error_record::ErrorRecord;
use crate::records::ChunkRetry;
use crate::render_id::RenderId;

/// Weight of each render phase in `overall_progress`.
pub const INVOKE_WEIGHT: f64 = 0.1;
pub const RENDER_WEIGHT: f64 = 0.8;
pub const FINALIZE_WEIGHT: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderStatus {
    pub render_id: RenderId,
    /// Distinct chunks with a first-attempt marker.
    pub lambdas_invoked: u32,
    /// Distinct chunks with a timing record.
    pub chunks: u32,
    pub total_chunks: u32,
    pub retries: Vec<ChunkRetry>,
    pub overall_progress: f64,
    pub done: bool,
    pub fatal_error_encountered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_size: Option<u64>,
    pub errors: Vec<ErrorRecord>,
    pub chunk_states: Vec<ChunkStateEntry>,
    /// True if the caller's polling deadline elapsed before completion.
    #[serde(default)]
    pub timed_out: bool,
}

/// Blend per-phase progress into a single 0..=1 figure.
///
/// `combined` is the fraction of frames the stitcher has combined so far.
pub fn overall_progress(
    invoked: u32,
    rendered: u32,
    total_chunks: u32,
    combined: f64,
    done: bool,
) -> f64 {
    if done {
        return 1.0;
    }
    if total_chunks == 0 {
        return 0.0;
    }
    let total = f64::from(total_chunks);
    let invoke = (f64::from(invoked) / total).min(1.0);
    let render = (f64::from(rendered) / total).min(1.0);
    invoke * INVOKE_WEIGHT + render * RENDER_WEIGHT + combined.clamp(0.0, 1.0) * FINALIZE_WEIGHT
}
