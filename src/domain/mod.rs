//! Domain types for the protocol pipeline.
//!
//! This module contains the core data structures:
//! - Artifact: the generated work product and its content
//! - Subject: who the artifact is for, and the items it references
//! - Run: per-stage execution records
//! - Audit: hash-chained audit entries

pub mod artifact;
pub mod audit;
pub mod run;
pub mod subject;

// Re-export commonly used types
pub use artifact::{ArtifactContent, ArtifactStatus, InsightBundle, ModuleType, Section, WorkArtifact};
pub use audit::{AuditEntry, AuditResult};
pub use run::{RunStatus, StageKind, StageRun};
pub use subject::{
    ExamKind, ExamRequest, ExamStatus, Gender, HistoryEntry, HistoryKind, Medication, Route,
    Subject,
};
