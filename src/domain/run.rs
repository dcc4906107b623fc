//! Stage runs: the per-invocation record of one stage execution.
//!
//! A `StageRun` is created when a stage is invoked, finalized when it ends,
//! and handed to the audit writer exactly once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The four pipeline stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Generator,
    DomainConflict,
    Governance,
    Integrity,
}

impl StageKind {
    pub const ALL: [StageKind; 4] = [
        StageKind::Generator,
        StageKind::DomainConflict,
        StageKind::Governance,
        StageKind::Integrity,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Generator => "generator",
            Self::DomainConflict => "domain_conflict",
            Self::Governance => "governance",
            Self::Integrity => "integrity",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome status of a stage run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Error,
    Pending,
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::Pending
    }
}

/// Record of a single stage invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageRun {
    pub id: Uuid,
    pub stage_name: String,
    pub input_snapshot: serde_json::Value,
    pub output_snapshot: Option<serde_json::Value>,
    pub started_at: DateTime<Utc>,
    pub status: RunStatus,
    pub error_message: Option<String>,
    pub duration_ms: Option<u64>,
}

impl StageRun {
    /// Start a pending run for a stage
    pub fn start(stage: StageKind, input_snapshot: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            stage_name: stage.name().to_string(),
            input_snapshot,
            output_snapshot: None,
            started_at: Utc::now(),
            status: RunStatus::Pending,
            error_message: None,
            duration_ms: None,
        }
    }

    /// Finalize as successful
    pub fn succeed(mut self, output_snapshot: serde_json::Value, duration_ms: u64) -> Self {
        self.status = RunStatus::Success;
        self.output_snapshot = Some(output_snapshot);
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Finalize as failed
    pub fn fail(mut self, error: impl Into<String>, duration_ms: Option<u64>) -> Self {
        self.status = RunStatus::Error;
        self.error_message = Some(error.into());
        self.duration_ms = duration_ms;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}
