//! Core orchestration logic.
//!
//! This module contains:
//! - Hashing: canonical digests and hash-chain verification
//! - Audit: hash-chained audit sinks and the async audit writer
//! - Runtime: the stage lifecycle (validate, timeout, audit)
//! - Pipeline: the stage set and retry policy
//! - Orchestrator: Main execution engine

pub mod audit;
pub mod hashing;
pub mod orchestrator;
pub mod pipeline;
pub mod runtime;

// Re-export commonly used types
pub use audit::{verify_sink, AuditDraft, AuditHandle, AuditSink, ChainReport, JsonlAuditSink, MemoryAuditSink};
pub use hashing::{canonical_hash, chain_hash, verify_chain, verify_hash, CHAIN_SENTINEL};
pub use orchestrator::{Orchestrator, PipelineOutcome};
pub use pipeline::{RetryPolicy, StageSet};
pub use runtime::{Stage, StageConfig, StageReport, StageRunner};
