//! Error taxonomy for stage execution and pipeline orchestration.
//!
//! Audit write failures have their own type but are never returned to a
//! pipeline caller; the audit writer logs and drops them.

use std::time::Duration;

use thiserror::Error;

use crate::core::hashing::HashError;
use crate::domain::{StageKind, StageRun};

/// Why a single stage invocation failed
#[derive(Debug, Clone, Error)]
pub enum StageError {
    #[error("Invalid input for stage '{stage}'")]
    InvalidInput { stage: StageKind },

    #[error("Stage '{stage}' is disabled")]
    StageDisabled { stage: StageKind },

    #[error("Stage '{stage}' timed out after {}ms", .timeout.as_millis())]
    Timeout { stage: StageKind, timeout: Duration },

    #[error("Stage '{stage}' failed: {message}")]
    Execution { stage: StageKind, message: String },
}

impl StageError {
    /// Whether the orchestrator may try the stage again
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Execution { .. })
    }

    pub fn stage(&self) -> StageKind {
        match self {
            Self::InvalidInput { stage }
            | Self::StageDisabled { stage }
            | Self::Timeout { stage, .. }
            | Self::Execution { stage, .. } => *stage,
        }
    }
}

/// A failed stage invocation together with its audited run record
#[derive(Debug, Clone, Error)]
#[error("{error}")]
pub struct StageFailure {
    pub error: StageError,

    /// The finalized run (carries `duration_ms` when execution started)
    pub run: StageRun,
}

impl StageFailure {
    pub fn execution_time_ms(&self) -> Option<u64> {
        self.run.duration_ms
    }
}

/// Pipeline-level failures outside a stage's own logic
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to persist artifact '{id}': {message}")]
    Persistence { id: String, message: String },

    #[error("Integrity mismatch for artifact '{id}': expected {expected}, found {actual}")]
    IntegrityMismatch {
        id: String,
        expected: String,
        actual: String,
    },

    #[error("Persisted artifact '{id}' was not found on reload")]
    Missing { id: String },

    #[error("Artifact serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Hash(#[from] HashError),
}

/// Failure writing to the audit sink (logged, never propagated)
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Audit IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Audit serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Hash(#[from] HashError),

    #[error("Audit sink unavailable: {0}")]
    Unavailable(String),
}
