//! Integrity stage: structural checks and hash determinism.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::core::hashing::canonical_hash_value;
use crate::core::runtime::Stage;
use crate::domain::{AuditResult, StageKind, WorkArtifact};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IntegrityInput {
    /// Any JSON value, optionally checked against a known digest
    Data {
        data: Value,
        #[serde(default, rename = "expectedHash")]
        expected_hash: Option<String>,
    },

    /// A work artifact, checked structurally and against its own stored hash
    Artifact {
        artifact: Box<WorkArtifact>,
        #[serde(default, rename = "expectedHash")]
        expected_hash: Option<String>,
    },
}

impl IntegrityInput {
    pub fn artifact(artifact: WorkArtifact, expected_hash: Option<String>) -> Self {
        Self::Artifact {
            artifact: Box::new(artifact),
            expected_hash,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    pub valid: bool,
    pub current_hash: String,
    pub expected_hash: Option<String>,
    pub issues: Vec<String>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IntegrityStage;

#[async_trait]
impl Stage for IntegrityStage {
    type Input = IntegrityInput;
    type Output = IntegrityReport;

    fn kind(&self) -> StageKind {
        StageKind::Integrity
    }

    fn validate(&self, input: &IntegrityInput) -> bool {
        match input {
            IntegrityInput::Data { data, .. } => !data.is_null(),
            IntegrityInput::Artifact { .. } => true,
        }
    }

    async fn execute(&self, input: &IntegrityInput, _cancel: CancellationToken) -> Result<IntegrityReport> {
        let report = match input {
            IntegrityInput::Data { data, expected_hash } => check_data(data, expected_hash.as_deref()),
            IntegrityInput::Artifact {
                artifact,
                expected_hash,
            } => check_artifact(artifact, expected_hash.as_deref())?,
        };

        if !report.valid {
            warn!(issues = ?report.issues, "Integrity check found issues");
        }
        Ok(report)
    }

    fn audit_result(&self, output: &IntegrityReport) -> AuditResult {
        if output.valid {
            AuditResult::Success
        } else {
            AuditResult::Warning
        }
    }
}

fn finish(current_hash: String, expected_hash: Option<&str>, mut issues: Vec<String>) -> IntegrityReport {
    if let Some(expected) = expected_hash {
        if expected != current_hash {
            issues.push("Hash mismatch: data integrity compromised".to_string());
        }
    }

    IntegrityReport {
        valid: issues.is_empty(),
        current_hash,
        expected_hash: expected_hash.map(str::to_string),
        issues,
    }
}

pub fn check_data(data: &Value, expected_hash: Option<&str>) -> IntegrityReport {
    let mut issues = Vec::new();
    if !(data.is_object() || data.is_array()) {
        issues.push("Invalid data structure".to_string());
    }
    finish(canonical_hash_value(data), expected_hash, issues)
}

pub fn check_artifact(artifact: &WorkArtifact, expected_hash: Option<&str>) -> Result<IntegrityReport> {
    let mut issues = Vec::new();

    if artifact.id.as_deref().map_or(true, str::is_empty) {
        issues.push("Missing artifact id".to_string());
    }
    if artifact.subject_id.trim().is_empty() {
        issues.push("Missing subject id".to_string());
    }
    if artifact.title.trim().is_empty() {
        issues.push("Missing title".to_string());
    }
    if artifact.rationale.trim().is_empty() {
        issues.push("Missing clinical rationale".to_string());
    }
    if artifact.content.sections.is_empty() {
        issues.push("Artifact content has no sections".to_string());
    }

    match &artifact.insight_bundle {
        None => issues.push("Missing insight bundle".to_string()),
        Some(insight) => {
            if insight.summary.trim().is_empty() {
                issues.push("Insight bundle is missing a summary".to_string());
            }
            if !(0..=100).contains(&insight.confidence) {
                issues.push(format!("Invalid insight confidence: {}", insight.confidence));
            }
        }
    }

    let current_hash = artifact.compute_hash()?;

    // Never-sealed artifacts are unhashed, not tampered
    if let Some(stored) = &artifact.hash {
        if *stored != current_hash {
            issues.push("Artifact hash mismatch: content may have been tampered with".to_string());
        }
    }

    Ok(finish(current_hash, expected_hash, issues))
}
