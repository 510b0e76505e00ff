//! Render coordination for framefan.
//!
//! This crate provides:
//! - Chunk planning and validation
//! - Worker invocation with streamed response decoding
//! - Flaky-error classification and per-chunk retries
//! - Background dispatch with fail-fast and cancellation
//! - Status aggregation and finalization from object storage alone

pub mod attempts;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod finalizer;
pub mod flaky;
pub mod invoker;
pub mod logging;
pub mod metrics;
pub mod plan;
pub mod progress;
pub mod retry;
pub mod stream;

pub use attempts::{ChunkOutcome, RenderContext, RetryCoordinator, StopSignal};
pub use config::CoordinatorConfig;
pub use dispatcher::{RenderDispatcher, RenderHandle, RenderOutcome};
pub use error::{CoordinatorError, CoordinatorResult};
pub use finalizer::{CompletionHook, Finalizer, HttpStitcher, Stitcher};
pub use flaky::{baseline_rules, FailureClassifier, FlakyRule};
pub use invoker::{AttemptOutcome, HttpWorker, Invoker, WorkerStream, WorkerTransport};
pub use logging::RenderLogger;
pub use plan::{default_frames_per_chunk, ChunkPlan, PlanLimits};
pub use progress::ProgressAggregator;
pub use retry::{retry_async, FailureTracker, RetryConfig};
pub use stream::{CrashReport, ResponseStreamDecoder, StreamEvent};
