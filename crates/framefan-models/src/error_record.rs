//! Persisted error records.

use serde::{Deserialize, Serialize};

/// Which collaborator raised an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSource {
    Renderer,
    Browser,
    Stitcher,
    /// The worker went away without a terminal message.
    Crash,
}

impl ErrorSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSource::Renderer => "renderer",
            ErrorSource::Browser => "browser",
            ErrorSource::Stitcher => "stitcher",
            ErrorSource::Crash => "crash",
        }
    }
}

/// A failure persisted under `errors/`.
///
/// Written both for failures that will be retried (`will_retry`) and for
/// failures that end the render (`is_fatal`). A record with `chunk == None`
/// concerns the render as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    #[serde(rename = "type")]
    pub source: ErrorSource,
    pub name: String,
    pub message: String,
    #[serde(default)]
    pub stack: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk: Option<u32>,
    pub attempt: u32,
    pub total_attempts: u32,
    pub will_retry: bool,
    pub is_fatal: bool,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

impl ErrorRecord {
    /// Render-level errors are always fatal.
    pub fn is_render_level(&self) -> bool {
        self.chunk.is_none()
    }
}
