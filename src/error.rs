//! Error types for lockstep-core
//!
//! Covers configuration, step-contract, infeed, and task lifecycle errors.

use thiserror::Error;

/// Primary error type for all lockstep operations
#[derive(Debug, Error)]
pub enum LockstepError {
    // ========== Configuration Errors ==========

    /// Run configuration rejected at construction
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Global step counter was already created in this training context
    #[error("Global step already exists in training context")]
    GlobalStepExists,

    // ========== Contract Violations ==========

    /// Model function requested lifecycle hooks, which cannot run device-side
    #[error("{kind} returned by the step spec are not supported in sharded execution")]
    UnsupportedHooks { kind: String },

    /// Only training is executed on shards
    #[error("Mode {mode} is not supported by the sharded execution path")]
    UnsupportedMode { mode: String },

    /// Loss read back from a shard was NaN or infinite
    #[error("Non-finite loss {value} on shard {shard}")]
    NonFiniteLoss { shard: usize, value: f32 },

    // ========== Infeed Errors ==========

    /// Enqueued/dequeued tuple disagrees with the batch descriptor
    #[error("Infeed tuple mismatch at position {index}: expected {expected}, got {actual}")]
    TupleMismatch {
        index: usize,
        expected: String,
        actual: String,
    },

    /// Batch tensors cannot be partitioned across shards
    #[error("Shard split failed: {reason}")]
    ShardSplit { reason: String },

    /// Checksum mismatch on a dequeued tensor
    #[error("Checksum mismatch on shard {shard}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        shard: usize,
        expected: u32,
        actual: u32,
    },

    /// Infeed channel closed by the other side
    #[error("Infeed channel closed")]
    InfeedClosed,

    // ========== Lifecycle Errors ==========

    /// Lifecycle callback arrived in the wrong phase
    #[error("Controller not running (phase: {phase})")]
    NotRunning { phase: String },

    /// Feeder task terminated abnormally
    #[error("Infeed feeder dead: {reason}")]
    FeederDead { reason: String },

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl LockstepError {
    /// Returns true if this error is a step-contract violation
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            LockstepError::UnsupportedHooks { .. }
                | LockstepError::UnsupportedMode { .. }
                | LockstepError::NonFiniteLoss { .. }
        )
    }

    /// Returns true if this error originated on the infeed path
    pub fn is_infeed(&self) -> bool {
        matches!(
            self,
            LockstepError::TupleMismatch { .. }
                | LockstepError::ShardSplit { .. }
                | LockstepError::ChecksumMismatch { .. }
                | LockstepError::InfeedClosed
        )
    }
}

/// Result type alias for lockstep operations
pub type Result<T> = std::result::Result<T, LockstepError>;
