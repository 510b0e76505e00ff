//! Shared data models for framefan render coordination.
//!
//! This crate provides Serde-serializable types for:
//! - Render IDs, jobs and launch requests
//! - Frame ranges and per-chunk state
//! - Records persisted in object storage (metadata, timings, errors)
//! - Status reports and cleanup jobs
//! - Worker invocation payloads

pub mod chunk;
pub mod cleanup;
pub mod error_record;
pub mod frame;
pub mod job;
pub mod records;
pub mod render_id;
pub mod status;
pub mod worker;

// Re-export common types
pub use chunk::{ChunkState, ChunkStateEntry, ChunkStatus, TransitionError};
pub use cleanup::{CleanupJob, CleanupKind};
pub use error_record::{ErrorRecord, ErrorSource};
pub use frame::{ChunkRange, FrameRange};
pub use job::{RenderJob, RenderRequest};
pub use records::{ChunkRetry, ChunkTiming, EncodingProgress, PostRenderData, RenderMetadata};
pub use render_id::{RenderExpiryDays, RenderId, RenderIdError};
pub use status::{overall_progress, RenderStatus};
pub use worker::{ChunkRequest, StitchOutput, StitchRequest, WorkerError};
