//! Audit entries: append-only, hash-chained records of stage runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::hashing::{chain_hash, ChainLink, HashError};

/// Outcome recorded in an audit entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    Success,
    Failure,
    Warning,
}

/// A single link of the audit chain.
///
/// `hash` is the canonical digest of every other field, with `previousHash`
/// set to the stored hash of the preceding entry (or the chain sentinel).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: String,
    pub stage_name: String,
    pub actor_id: String,
    pub timestamp: DateTime<Utc>,
    pub result: AuditResult,

    /// Opaque payload (input/output snapshots, error, timing)
    pub details: serde_json::Value,

    pub previous_hash: String,
    pub hash: String,
}

impl AuditEntry {
    /// Build an entry linked to `previous_hash`, stamping the current time
    pub fn chained(
        stage_name: impl Into<String>,
        actor_id: impl Into<String>,
        result: AuditResult,
        details: serde_json::Value,
        previous_hash: impl Into<String>,
    ) -> Result<Self, HashError> {
        let mut entry = Self {
            id: Uuid::new_v4().to_string(),
            stage_name: stage_name.into(),
            actor_id: actor_id.into(),
            timestamp: Utc::now(),
            result,
            details,
            previous_hash: previous_hash.into(),
            hash: String::new(),
        };
        entry.hash = chain_hash(&entry, &entry.previous_hash)?;
        Ok(entry)
    }
}

impl ChainLink for AuditEntry {
    fn link_id(&self) -> &str {
        &self.id
    }

    fn stored_hash(&self) -> &str {
        &self.hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hashing::CHAIN_SENTINEL;

    #[test]
    fn test_chained_entry_hash_matches_recomputation() {
        let entry = AuditEntry::chained(
            "generator",
            "dr-house",
            AuditResult::Success,
            serde_json::json!({"executionTime": 10}),
            CHAIN_SENTINEL,
        )
        .unwrap();

        assert_eq!(entry.previous_hash, "0");
        assert_eq!(chain_hash(&entry, CHAIN_SENTINEL).unwrap(), entry.hash);
    }

    #[test]
    fn test_entry_serializes_camel_case() {
        let entry = AuditEntry::chained(
            "integrity",
            "system",
            AuditResult::Warning,
            serde_json::Value::Null,
            CHAIN_SENTINEL,
        )
        .unwrap();

        let json = serde_json::to_value(&entry).unwrap();
        assert!(json.get("previousHash").is_some());
        assert!(json.get("stageName").is_some());
        assert_eq!(json["result"], "warning");
    }
}
