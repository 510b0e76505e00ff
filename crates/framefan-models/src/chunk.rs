//! Per-chunk state machine.
//!
//! ```text
//! NotStarted -> Invoked(1) -> Completed(n)
//!                  |  ^
//!                  v  |
//!              Retrying(n) -> Invoked(n + 1)
//!                  |
//! Invoked(n) -> Failed(n)
//! ```
//!
//! Attempt numbers only grow. A late timing record from an attempt that was
//! already being retried still completes the chunk.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("chunk cannot go from {from:?} via {event}")]
pub struct TransitionError {
    pub from: ChunkState,
    pub event: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ChunkState {
    #[default]
    NotStarted,
    Invoked { attempt: u32 },
    /// Attempt `attempt` failed transiently; `attempt + 1` is due.
    Retrying { attempt: u32 },
    Completed { attempt: u32 },
    Failed { attempt: u32 },
}

/// Coarse status reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    NotStarted,
    Invoked,
    Completed,
    Failed,
}

impl ChunkState {
    /// Latest attempt number seen, 0 before the first invocation.
    pub fn attempt(&self) -> u32 {
        match *self {
            ChunkState::NotStarted => 0,
            ChunkState::Invoked { attempt }
            | ChunkState::Retrying { attempt }
            | ChunkState::Completed { attempt }
            | ChunkState::Failed { attempt } => attempt,
        }
    }

    pub fn status(&self) -> ChunkStatus {
        match self {
            ChunkState::NotStarted => ChunkStatus::NotStarted,
            ChunkState::Invoked { .. } | ChunkState::Retrying { .. } => ChunkStatus::Invoked,
            ChunkState::Completed { .. } => ChunkStatus::Completed,
            ChunkState::Failed { .. } => ChunkStatus::Failed,
        }
    }

    /// The attempt number the next invocation must use.
    pub fn next_attempt(&self) -> Result<u32, TransitionError> {
        match *self {
            ChunkState::NotStarted => Ok(1),
            ChunkState::Retrying { attempt } => Ok(attempt + 1),
            other => Err(TransitionError {
                from: other,
                event: "invoke",
            }),
        }
    }

    /// Record that `attempt` has been dispatched.
    pub fn invoke(self, attempt: u32) -> Result<Self, TransitionError> {
        if self.next_attempt()? != attempt {
            return Err(TransitionError {
                from: self,
                event: "invoke",
            });
        }
        Ok(ChunkState::Invoked { attempt })
    }

    pub fn complete(self) -> Result<Self, TransitionError> {
        match self {
            ChunkState::Invoked { attempt } | ChunkState::Retrying { attempt } => {
                Ok(ChunkState::Completed { attempt })
            }
            done @ ChunkState::Completed { .. } => Ok(done),
            from => Err(TransitionError {
                from,
                event: "complete",
            }),
        }
    }

    pub fn retry(self) -> Result<Self, TransitionError> {
        match self {
            ChunkState::Invoked { attempt } => Ok(ChunkState::Retrying { attempt }),
            from => Err(TransitionError { from, event: "retry" }),
        }
    }

    pub fn fail(self) -> Result<Self, TransitionError> {
        match self {
            ChunkState::Invoked { attempt } | ChunkState::Retrying { attempt } => {
                Ok(ChunkState::Failed { attempt })
            }
            from => Err(TransitionError { from, event: "fail" }),
        }
    }

    /// Rebuild a chunk's state from what is visible in storage.
    ///
    /// `highest_attempt` is the largest marker attempt; `completed` means a
    /// timing record exists; `failed` means a fatal error record exists for
    /// the chunk; `retrying` means a non-fatal error record exists for
    /// `highest_attempt`.
    pub fn observe(
        highest_attempt: Option<u32>,
        completed: bool,
        failed: bool,
        retrying: bool,
    ) -> Self {
        let attempt = highest_attempt.unwrap_or(0);
        if completed {
            return ChunkState::Completed {
                attempt: attempt.max(1),
            };
        }
        if attempt == 0 {
            return ChunkState::NotStarted;
        }
        if failed {
            ChunkState::Failed { attempt }
        } else if retrying {
            ChunkState::Retrying { attempt }
        } else {
            ChunkState::Invoked { attempt }
        }
    }
}

/// A chunk index together with its state, as reported in status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkStateEntry {
    pub chunk: u32,
    #[serde(flatten)]
    pub state: ChunkState,
}
