//! Worker invocation payloads.

use serde::{Deserialize, Serialize};

use crate::frame::FrameRange;
use crate::render_id::RenderId;

/// Request body sent to a chunk worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRequest {
    pub render_id: RenderId,
    pub chunk_index: u32,
    pub attempt: u32,
    pub frame_range: FrameRange,
    #[serde(default)]
    pub opaque_config: serde_json::Value,
}

/// Request body sent to the stitcher once every chunk has rendered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StitchRequest {
    pub render_id: RenderId,
    pub chunk_keys: Vec<String>,
    pub output_key: String,
    #[serde(default)]
    pub opaque_config: serde_json::Value,
}

/// Stitcher reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StitchOutput {
    pub output_key: String,
    pub output_size: u64,
}

/// Error payload a worker reports, either inline or in a stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerError {
    pub message: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub stack: String,
}

impl WorkerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            name: "Error".to_string(),
            stack: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_request_wire_format() {
        let req = ChunkRequest {
            render_id: RenderId::parse("abcdef").unwrap(),
            chunk_index: 2,
            attempt: 1,
            frame_range: FrameRange::new(16, 23),
            opaque_config: serde_json::json!({"codec": "h264"}),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["chunkIndex"], 2);
        assert_eq!(json["frameRange"]["start"], 16);
        assert_eq!(json["opaqueConfig"]["codec"], "h264");
    }

    #[test]
    fn test_worker_error_defaults() {
        let err: WorkerError = serde_json::from_str(r#"{"message":"x"}"#).unwrap();
        assert_eq!(err.message, "x");
        assert!(err.stack.is_empty());
    }
}
