//! JSON records persisted under a render's storage prefix.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::frame::{ChunkRange, FrameRange};
use crate::render_id::RenderId;

/// Immutable description of a render, written once before any chunk is dispatched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderMetadata {
    pub render_id: RenderId,
    /// Milliseconds since epoch when the render was launched.
    pub start_date: i64,
    pub total_chunks: u32,
    pub frame_range: FrameRange,
    pub frames_per_chunk: u32,
    pub every_nth_frame: u32,
    pub chunks: Vec<ChunkRange>,
    /// Bucket-relative key the stitched output will be written to.
    pub output_key: String,
    /// Renderer settings; opaque to coordination.
    #[serde(default)]
    pub output_settings: serde_json::Value,
}

/// Stitching progress, overwritten while chunks are being combined.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodingProgress {
    pub frames_encoded: u32,
    pub combined_frames: u32,
    pub time_to_combine: Option<u64>,
}

/// When one chunk started and finished its rendering phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkTiming {
    pub chunk: u32,
    /// Milliseconds since epoch.
    pub start: i64,
    /// Milliseconds since epoch.
    pub rendered: i64,
}

impl ChunkTiming {
    pub fn duration_ms(&self) -> i64 {
        self.rendered - self.start
    }
}

/// A retry observed from an initialization marker with `attempt > 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRetry {
    pub chunk: u32,
    pub attempt: u32,
    /// Write time of the marker, milliseconds since epoch.
    pub time: Option<i64>,
}

/// The permanent completion record, written exactly once per render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRenderData {
    pub render_id: RenderId,
    pub output_file: String,
    pub output_size: u64,
    pub start_time: i64,
    pub end_time: i64,
    pub time_to_finish: i64,
    pub chunk_count: u32,
    pub lambdas_invoked: u32,
    pub retries: Vec<ChunkRetry>,
    pub timings: Vec<ChunkTiming>,
}

impl PostRenderData {
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.end_time)
    }

    /// The slowest chunk's render duration, if any timing was recorded.
    pub fn slowest_chunk_ms(&self) -> Option<i64> {
        self.timings.iter().map(ChunkTiming::duration_ms).max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_wire_format_is_camel_case() {
        let meta = RenderMetadata {
            render_id: RenderId::parse("abcdef").unwrap(),
            start_date: 1,
            total_chunks: 1,
            frame_range: FrameRange::new(0, 9),
            frames_per_chunk: 10,
            every_nth_frame: 1,
            chunks: vec![ChunkRange {
                index: 0,
                start_frame: 0,
                end_frame: 9,
            }],
            output_key: "renders/abcdef/out.mp4".into(),
            output_settings: serde_json::json!({"codec": "h264"}),
        };

        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["renderId"], "abcdef");
        assert_eq!(json["totalChunks"], 1);
        assert_eq!(json["chunks"][0]["endFrame"], 9);

        let back: RenderMetadata = serde_json::from_value(json).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn test_slowest_chunk() {
        let data = PostRenderData {
            render_id: RenderId::parse("abcdef").unwrap(),
            output_file: "renders/abcdef/out.mp4".into(),
            output_size: 10,
            start_time: 0,
            end_time: 100,
            time_to_finish: 100,
            chunk_count: 2,
            lambdas_invoked: 2,
            retries: vec![],
            timings: vec![
                ChunkTiming { chunk: 0, start: 0, rendered: 40 },
                ChunkTiming { chunk: 1, start: 5, rendered: 70 },
            ],
        };
        assert_eq!(data.slowest_chunk_ms(), Some(65));
        assert!(data.completed_at().is_some());
    }
}
