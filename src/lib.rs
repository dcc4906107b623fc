//! protoguard - Staged, audited protocol-generation pipeline
//!
//! Turns a request into a validated, tamper-evident work artifact by running
//! it through a fixed sequence of stages, each with input validation, a
//! timeout, and an append-only audit record.
//!
//! # Architecture
//!
//! - Every stage runs through the same lifecycle: validate, check enablement,
//!   execute under a timeout, then audit
//! - Audit entries are hash-chained; any retroactive edit breaks the chain
//! - Artifacts carry a canonical hash over every other field, re-checked
//!   after they are persisted
//!
//! # Modules
//!
//! - `adapters`: External collaborators (document store, text generator, stock)
//! - `core`: Hashing, audit, stage runtime, orchestration
//! - `domain`: Data structures (WorkArtifact, Subject, StageRun, AuditEntry)
//! - `stages`: Generator, Domain-Conflict, Governance, Integrity
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run the pipeline
//! protoguard generate request.yaml --actor dr-house
//!
//! # Inspect a stored artifact
//! protoguard show <artifact-id>
//!
//! # Check the audit chain
//! protoguard verify-audit
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod error;
pub mod stages;

// Re-export main types at crate root for convenience
pub use core::{Orchestrator, PipelineOutcome, StageSet};
pub use domain::{AuditEntry, StageKind, StageRun, WorkArtifact};
pub use error::{PipelineError, StageError, StageFailure};
