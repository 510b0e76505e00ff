//! Render job definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::frame::FrameRange;
use crate::render_id::RenderId;

/// A render job as launched by a caller.
///
/// The chunk count is fixed at creation and never changes for the job's
/// lifetime; everything else about chunk layout is derived from it together
/// with `frames_per_chunk` and `frame_range`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderJob {
    pub render_id: RenderId,
    pub chunk_count: u32,
    pub frames_per_chunk: u32,
    pub frame_range: FrameRange,
    pub every_nth_frame: u32,
    /// Output extension, e.g. `mp4`. Decides the `out.{ext}` key.
    pub output_extension: String,
    /// Renderer settings passed through to workers untouched.
    #[serde(default)]
    pub output_settings: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl RenderJob {
    /// Epoch milliseconds of `created_at`.
    pub fn start_ms(&self) -> i64 {
        self.created_at.timestamp_millis()
    }
}

/// What a caller submits to start a render.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderRequest {
    /// Total composition length in frames.
    pub duration_in_frames: u32,
    /// Optional inclusive sub-range; the whole composition when absent.
    #[serde(default)]
    pub frame_range: Option<FrameRange>,
    /// Frames per chunk; a default is chosen from the frame count when absent.
    #[serde(default)]
    pub frames_per_chunk: Option<u32>,
    #[serde(default = "default_every_nth_frame")]
    pub every_nth_frame: u32,
    #[serde(default = "default_output_extension")]
    pub output_extension: String,
    #[serde(default)]
    pub output_settings: serde_json::Value,
    /// Lifecycle prefix for the render folder.
    #[serde(default)]
    pub expiry: Option<crate::RenderExpiryDays>,
}

fn default_every_nth_frame() -> u32 {
    1
}

fn default_output_extension() -> String {
    "mp4".to_string()
}
