//! Coordinator error types.

use framefan_models::TransitionError;
use framefan_storage::{KeyParseError, StorageError};
use thiserror::Error;

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Bad plan parameters. Raised before anything is dispatched.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A flaky failure that is worth retrying.
    #[error("Transient infrastructure error: {0}")]
    TransientInfrastructure(String),

    /// A non-flaky worker failure; ends the render.
    #[error("Fatal worker error: {0}")]
    FatalWorker(String),

    #[error("Chunk {chunk} crashed without a response after {elapsed_seconds:.1}s")]
    CrashWithoutResponse { chunk: u32, elapsed_seconds: f64 },

    #[error("Invocation failed: {0}")]
    Invocation(String),

    #[error("Render not ready for finalization: {0}")]
    NotReady(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Key parse error: {0}")]
    KeyParse(#[from] KeyParseError),

    #[error("Invalid chunk transition: {0}")]
    Transition(#[from] TransitionError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoordinatorError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn fatal_worker(msg: impl Into<String>) -> Self {
        Self::FatalWorker(msg.into())
    }

    pub fn invocation(msg: impl Into<String>) -> Self {
        Self::Invocation(msg.into())
    }

    pub fn not_ready(msg: impl Into<String>) -> Self {
        Self::NotReady(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            CoordinatorError::TransientInfrastructure(_) | CoordinatorError::Invocation(_) => true,
            CoordinatorError::Storage(e) => e.is_retryable(),
            _ => false,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, CoordinatorError::Validation(_))
    }
}
