//! Work artifacts produced by the pipeline.
//!
//! A `WorkArtifact` is the clinical-protocol document the Generator stage drafts
//! and the downstream stages validate. Its `hash` is a canonical digest over
//! every other field; recomputing and comparing it is the tamper check.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::subject::{ExamRequest, Medication};
use crate::core::hashing::{canonical_hash_value, HashError};

/// Protocol module a document belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleType {
    HormoneTherapy,
    Laboratory,
    Pharmacology,
    Governance,
    Personalized,
    Biometric,
    Lifestyle,
}

impl ModuleType {
    /// Stable tag used in artifact tags and stored records
    pub fn tag(&self) -> &'static str {
        match self {
            Self::HormoneTherapy => "hormone_therapy",
            Self::Laboratory => "laboratory",
            Self::Pharmacology => "pharmacology",
            Self::Governance => "governance",
            Self::Personalized => "personalized",
            Self::Biometric => "biometric",
            Self::Lifestyle => "lifestyle",
        }
    }

    /// Human-readable name used in artifact titles
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::HormoneTherapy => "Hormone Therapy",
            Self::Laboratory => "Laboratory Analysis",
            Self::Pharmacology => "Pharmacological Protocol",
            Self::Governance => "Governance Protocol",
            Self::Personalized => "Personalized Protocol",
            Self::Biometric => "Biometric Assessment",
            Self::Lifestyle => "Lifestyle Protocol",
        }
    }
}

impl std::fmt::Display for ModuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Lifecycle status of an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    Draft,
    PendingApproval,
    Approved,
    Active,
    Completed,
    Cancelled,
    Archived,
}

impl Default for ArtifactStatus {
    fn default() -> Self {
        Self::Draft
    }
}

/// One ordered section of an artifact body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub title: String,
    pub content: String,
    pub order: u32,
}

/// Body of an artifact: sections plus the items it references
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactContent {
    pub sections: Vec<Section>,

    #[serde(default)]
    pub medications: Vec<Medication>,

    #[serde(default)]
    pub exams: Vec<ExamRequest>,

    #[serde(default)]
    pub instructions: Vec<String>,
}

/// Structured insight bundle attached to an artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightBundle {
    pub summary: String,
    pub key_points: Vec<String>,
    pub risks: Vec<String>,
    pub recommendations: Vec<String>,

    /// 0-100; stored wide so out-of-range values survive a reload and get flagged
    pub confidence: i64,

    pub reasoning: String,
    pub generated_at: DateTime<Utc>,
    pub model_version: String,
}

/// The generated work product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkArtifact {
    /// Assigned by the orchestrator once generation succeeds
    pub id: Option<String>,

    pub subject_id: String,
    pub subject_name: String,
    pub title: String,
    pub module: ModuleType,
    pub objective: String,
    pub rationale: String,
    pub content: ArtifactContent,
    pub insight_bundle: Option<InsightBundle>,
    pub status: ArtifactStatus,

    /// Always within 0..=100
    pub confidence: u8,

    /// Set-like: no duplicates, insertion order kept
    pub tags: Vec<String>,

    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub approved_by: Option<String>,

    /// Canonical digest of every other field
    pub hash: Option<String>,
}

impl WorkArtifact {
    /// Compute the canonical digest over every field except `hash`
    pub fn compute_hash(&self) -> Result<String, HashError> {
        let mut value = serde_json::to_value(self)?;
        if let Some(object) = value.as_object_mut() {
            object.remove("hash");
        }
        Ok(canonical_hash_value(&value))
    }

    /// Recompute and store the digest
    pub fn seal(&mut self) -> Result<&str, HashError> {
        let hash = self.compute_hash()?;
        Ok(self.hash.insert(hash).as_str())
    }

    /// True when a stored hash is present and matches the content
    pub fn is_sealed_intact(&self) -> bool {
        match (&self.hash, self.compute_hash()) {
            (Some(stored), Ok(current)) => *stored == current,
            _ => false,
        }
    }

    /// Add a tag unless it is already present
    pub fn add_tag(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
    }

    /// Whether the artifact references any domain items
    pub fn has_medications(&self) -> bool {
        !self.content.medications.is_empty()
    }
}
