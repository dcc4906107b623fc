//! The four pipeline stages.
//!
//! - `generator`: drafts a work artifact from a request
//! - `domain_conflict`: availability, interaction and dosage checks
//! - `governance`: compliance verdict, risks, confidence, approval
//! - `integrity`: structural and hash checks

pub mod domain_conflict;
pub mod generator;
pub mod governance;
pub mod integrity;

pub use domain_conflict::{ConflictAction, ConflictCheck, ConflictReport, DomainConflictStage};
pub use generator::{GenerationOutput, GenerationRequest, GeneratorStage, FALLBACK_MODEL};
pub use governance::{
    approval_decision, ExplainMode, GovernanceAction, GovernancePolicy, GovernanceReport,
    GovernanceRequest, GovernanceStage, GovernanceVerdict, LockStatus, PolicyUpdate,
};
pub use integrity::{IntegrityInput, IntegrityReport, IntegrityStage};
