//! Pipeline definition: the fixed stage set and its retry policy.
//!
//! Stages are constructed once at process start and handed to the
//! orchestrator as one explicitly owned `StageSet`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::audit::AuditHandle;
use super::runtime::{StageConfig, StageRunner};
use crate::domain::StageKind;
use crate::stages::{DomainConflictStage, GeneratorStage, GovernanceStage, IntegrityStage};

/// The four stage runners, in pipeline order
pub struct StageSet {
    pub generator: StageRunner<GeneratorStage>,
    pub domain_conflict: StageRunner<DomainConflictStage>,
    pub governance: StageRunner<GovernanceStage>,
    pub integrity: StageRunner<IntegrityStage>,
}

impl StageSet {
    /// Wrap each stage in a runner configured by `config`
    pub fn new(
        generator: GeneratorStage,
        domain_conflict: DomainConflictStage,
        governance: GovernanceStage,
        integrity: IntegrityStage,
        config: impl Fn(StageKind) -> StageConfig,
        audit: AuditHandle,
    ) -> Self {
        Self {
            generator: StageRunner::new(generator, config(StageKind::Generator), audit.clone()),
            domain_conflict: StageRunner::new(
                domain_conflict,
                config(StageKind::DomainConflict),
                audit.clone(),
            ),
            governance: StageRunner::new(governance, config(StageKind::Governance), audit.clone()),
            integrity: StageRunner::new(integrity, config(StageKind::Integrity), audit),
        }
    }

    /// Template-only stages with built-in configuration
    pub fn with_defaults(audit: AuditHandle) -> Self {
        Self::new(
            GeneratorStage::new(),
            DomainConflictStage::default(),
            GovernanceStage::default(),
            IntegrityStage,
            StageConfig::defaults_for,
            audit,
        )
    }

    /// Current configuration of every stage, in pipeline order
    pub async fn configs(&self) -> Vec<StageConfig> {
        vec![
            self.generator.config().await,
            self.domain_conflict.config().await,
            self.governance.config().await,
            self.integrity.config().await,
        ]
    }

    pub async fn set_enabled(&self, kind: StageKind, enabled: bool) {
        match kind {
            StageKind::Generator => self.generator.set_enabled(enabled).await,
            StageKind::DomainConflict => self.domain_conflict.set_enabled(enabled).await,
            StageKind::Governance => self.governance.set_enabled(enabled).await,
            StageKind::Integrity => self.integrity.set_enabled(enabled).await,
        }
    }
}

/// Backoff between attempts of a retryable stage failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay before the second attempt in milliseconds
    pub initial_delay_ms: u64,

    /// Maximum delay between attempts in milliseconds
    pub max_delay_ms: u64,

    /// Backoff multiplier (delay *= multiplier after each retry)
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 250,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts
    pub fn immediate() -> Self {
        Self {
            initial_delay_ms: 0,
            max_delay_ms: 0,
            backoff_multiplier: 1.0,
        }
    }

    /// Calculate delay after a failed attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(self.initial_delay_ms.min(self.max_delay_ms));
        }

        let delay = self.initial_delay_ms as f64
            * self.backoff_multiplier.powi((attempt - 1) as i32);

        let capped = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(capped)
    }

    /// Whether another attempt fits within `max_attempts` total attempts
    pub fn should_retry(&self, attempt: u32, max_attempts: u32) -> bool {
        attempt < max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audit::MemoryAuditSink;
    use std::sync::Arc;

    #[test]
    fn test_retry_policy_delays() {
        let policy = RetryPolicy {
            initial_delay_ms: 1000,
            backoff_multiplier: 2.0,
            max_delay_ms: 10000,
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(4000));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(8000));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(10000)); // Capped
    }

    #[test]
    fn test_should_retry_counts_total_attempts() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(1, 3));
        assert!(policy.should_retry(2, 3));
        assert!(!policy.should_retry(3, 3));
        assert!(!policy.should_retry(1, 1));
    }

    #[test]
    fn test_partial_retry_yaml_keeps_defaults() {
        let policy: RetryPolicy = serde_yaml::from_str("max_delay_ms: 100").unwrap();
        assert_eq!(policy.max_delay_ms, 100);
        assert_eq!(policy.initial_delay_ms, 250);
    }

    #[tokio::test]
    async fn test_stage_set_toggles_by_kind() {
        let (audit, _task) = AuditHandle::spawn(Arc::new(MemoryAuditSink::new()));
        let stages = StageSet::with_defaults(audit);

        stages.set_enabled(StageKind::Governance, false).await;
        let configs = stages.configs().await;

        let names: Vec<_> = configs.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["generator", "domain_conflict", "governance", "integrity"]);
        assert!(!configs[2].enabled);
        assert!(configs[0].enabled);
    }
}
