//! Stage lifecycle runtime.
//!
//! Every stage runs through the same lifecycle:
//! validate → enablement check → timeout-bounded execute → audit → result.
//!
//! The timer drives cancellation: when it fires, the stage's
//! [`CancellationToken`] is cancelled and the in-flight future is dropped, so
//! nothing outlives the reported `Timeout`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::audit::{AuditHandle, AuditRecord};
use crate::domain::{AuditResult, StageKind, StageRun};
use crate::error::{StageError, StageFailure};

/// A pipeline stage with typed input and output
#[async_trait]
pub trait Stage: Send + Sync {
    type Input: Serialize + Send + Sync;
    type Output: Serialize + Send + Sync;

    fn kind(&self) -> StageKind;

    /// Boundary check; a `false` result fails the run before execution
    fn validate(&self, input: &Self::Input) -> bool;

    /// Do the stage's work.
    ///
    /// Implementations should check `cancel` between collaborator calls.
    async fn execute(&self, input: &Self::Input, cancel: CancellationToken)
        -> anyhow::Result<Self::Output>;

    /// Audit result for a successful run
    fn audit_result(&self, _output: &Self::Output) -> AuditResult {
        AuditResult::Success
    }
}

/// Per-stage runtime settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    pub name: String,
    pub enabled: bool,
    pub priority: u8,
    pub timeout_ms: u64,

    /// Total attempts the orchestrator may make for retryable failures
    pub retry_attempts: u32,
}

impl StageConfig {
    /// Built-in defaults for a stage
    pub fn defaults_for(kind: StageKind) -> Self {
        let (priority, timeout_ms) = match kind {
            StageKind::Generator => (8, 60_000),
            StageKind::DomainConflict => (7, 30_000),
            StageKind::Governance => (10, 45_000),
            StageKind::Integrity => (9, 15_000),
        };

        Self {
            name: kind.name().to_string(),
            enabled: true,
            priority,
            timeout_ms,
            retry_attempts: 3,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Output of a successful stage run, with its audited run record
#[derive(Debug, Clone)]
pub struct StageReport<T> {
    pub run: StageRun,
    pub output: T,
}

/// Owns a stage, its configuration, and a handle to the audit writer
pub struct StageRunner<S: Stage> {
    stage: S,
    config: RwLock<StageConfig>,
    audit: AuditHandle,
}

impl<S: Stage> StageRunner<S> {
    pub fn new(stage: S, config: StageConfig, audit: AuditHandle) -> Self {
        Self {
            stage,
            config: RwLock::new(config),
            audit,
        }
    }

    pub fn kind(&self) -> StageKind {
        self.stage.kind()
    }

    pub fn stage(&self) -> &S {
        &self.stage
    }

    /// Snapshot of the current configuration
    pub async fn config(&self) -> StageConfig {
        self.config.read().await.clone()
    }

    pub async fn set_enabled(&self, enabled: bool) {
        let mut config = self.config.write().await;
        if config.enabled != enabled {
            info!(stage = %self.kind(), enabled, "Stage enablement changed");
        }
        config.enabled = enabled;
    }

    /// Run the full lifecycle for one input
    #[instrument(skip_all, fields(stage = %self.kind(), actor = actor_id))]
    pub async fn run(
        &self,
        input: &S::Input,
        actor_id: &str,
    ) -> Result<StageReport<S::Output>, StageFailure> {
        let kind = self.kind();
        let run = StageRun::start(kind, snapshot(input, "input"));

        if !self.stage.validate(input) {
            return Err(self
                .fail(run, StageError::InvalidInput { stage: kind }, None, actor_id)
                .await);
        }

        let config = self.config().await;
        if !config.enabled {
            return Err(self
                .fail(run, StageError::StageDisabled { stage: kind }, None, actor_id)
                .await);
        }

        let timeout = config.timeout();
        let cancel = CancellationToken::new();
        let started = Instant::now();
        debug!(run_id = %run.id, timeout_ms = config.timeout_ms, "Executing stage");

        let outcome = tokio::select! {
            result = self.stage.execute(input, cancel.clone()) => Some(result),
            _ = tokio::time::sleep(timeout) => {
                cancel.cancel();
                None
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Some(Ok(output)) => {
                let result = self.stage.audit_result(&output);
                let run = run.succeed(snapshot(&output, "output"), duration_ms);

                info!(run_id = %run.id, duration_ms, "Stage completed");
                self.audit
                    .record(AuditRecord {
                        run: run.clone(),
                        actor_id: actor_id.to_string(),
                        result,
                    })
                    .await;

                Ok(StageReport { run, output })
            }
            Some(Err(e)) => {
                let error = StageError::Execution {
                    stage: kind,
                    message: format!("{:#}", e),
                };
                Err(self.fail(run, error, Some(duration_ms), actor_id).await)
            }
            None => {
                let error = StageError::Timeout { stage: kind, timeout };
                Err(self.fail(run, error, Some(duration_ms), actor_id).await)
            }
        }
    }

    async fn fail(
        &self,
        run: StageRun,
        error: StageError,
        duration_ms: Option<u64>,
        actor_id: &str,
    ) -> StageFailure {
        let run = run.fail(error.to_string(), duration_ms);
        warn!(run_id = %run.id, error = %error, "Stage failed");

        self.audit
            .record(AuditRecord {
                run: run.clone(),
                actor_id: actor_id.to_string(),
                result: AuditResult::Failure,
            })
            .await;

        StageFailure { error, run }
    }
}

/// JSON snapshot for the run record; `null` (with a warning) if it cannot be serialized
fn snapshot<T: Serialize + ?Sized>(value: &T, what: &str) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to snapshot stage {}; recording null", what);
        serde_json::Value::Null
    })
}
