//! Main orchestrator for pipeline execution.
//!
//! Sequences the stages, gates on fatal failures, aggregates warnings,
//! persists the artifact, and re-checks it after persistence.
//!
//! Generator → Domain-Conflict (only with medications) → Governance →
//! Integrity → persist → reload → Integrity (against the sealed hash).

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::pipeline::{RetryPolicy, StageSet};
use super::runtime::{Stage, StageRunner};
use crate::adapters::{DocumentStore, Filter, ARTIFACTS};
use crate::domain::{ArtifactStatus, StageRun, WorkArtifact};
use crate::error::{PipelineError, StageFailure};
use crate::stages::{
    ConflictAction, ConflictCheck, GenerationRequest, GovernanceAction, GovernanceRequest,
    IntegrityInput,
};

/// Structured pipeline result; never an `Err`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineOutcome {
    /// True when no errors were recorded
    pub success: bool,

    /// The artifact as far as it was built
    pub artifact: Option<WorkArtifact>,

    pub errors: Vec<String>,
    pub warnings: Vec<String>,

    /// Every stage run in execution order, retries included
    pub runs: Vec<StageRun>,
}

/// Accumulates results while a pipeline runs
#[derive(Default)]
struct PipelineState {
    errors: Vec<String>,
    warnings: Vec<String>,
    runs: Vec<StageRun>,
}

impl PipelineState {
    fn finish(self, artifact: Option<WorkArtifact>) -> PipelineOutcome {
        PipelineOutcome {
            success: self.errors.is_empty(),
            artifact,
            errors: self.errors,
            warnings: self.warnings,
            runs: self.runs,
        }
    }
}

/// Main pipeline orchestrator
pub struct Orchestrator {
    stages: Arc<StageSet>,
    store: Arc<dyn DocumentStore>,
    retry: RetryPolicy,
}

impl Orchestrator {
    pub fn new(stages: Arc<StageSet>, store: Arc<dyn DocumentStore>) -> Self {
        Self {
            stages,
            store,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn stages(&self) -> &StageSet {
        &self.stages
    }

    /// Execute the pipeline for one request on behalf of `actor_id`
    #[instrument(skip_all, fields(subject = %request.subject.id, module = %request.module))]
    pub async fn run_pipeline(&self, request: &GenerationRequest, actor_id: &str) -> PipelineOutcome {
        info!("Starting pipeline execution");
        let mut state = PipelineState::default();

        let generated = match self
            .run_with_retry(&self.stages.generator, request, actor_id, &mut state)
            .await
        {
            Ok(output) => output,
            Err(failure) => {
                error!(error = %failure.error, "Generation failed, aborting pipeline");
                state.errors.push(format!("Generation failed: {}", failure.error));
                return state.finish(None);
            }
        };

        let mut artifact = generated.artifact;
        let id = new_artifact_id();
        artifact.id = Some(id.clone());
        artifact.created_by = Some(actor_id.to_string());
        if let Err(e) = artifact.seal() {
            state.errors.push(PipelineError::from(e).to_string());
            return state.finish(Some(artifact));
        }
        debug!(artifact_id = %id, "Artifact drafted and sealed");

        if artifact.has_medications() {
            self.check_conflicts(&artifact, actor_id, &mut state).await;
        }

        if let Err(failure) = self.govern(&mut artifact, actor_id, &mut state).await {
            error!(artifact_id = %id, error = %failure.error, "Governance failed, aborting pipeline");
            state
                .errors
                .push(format!("Governance validation failed: {}", failure.error));
            return state.finish(Some(artifact));
        }

        match self
            .run_with_retry(
                &self.stages.integrity,
                &IntegrityInput::artifact(artifact.clone(), None),
                actor_id,
                &mut state,
            )
            .await
        {
            Ok(report) => state.warnings.extend(report.issues),
            Err(failure) => state
                .warnings
                .push(format!("Integrity check failed: {}", failure.error)),
        }

        if let Err(e) = self.persist(&id, &artifact).await {
            error!(artifact_id = %id, error = %e, "Persistence failed");
            state.errors.push(e.to_string());
            return state.finish(Some(artifact));
        }

        self.verify_persisted(&id, &artifact, actor_id, &mut state).await;

        info!(
            artifact_id = %id,
            success = state.errors.is_empty(),
            warnings = state.warnings.len(),
            "Pipeline finished"
        );
        state.finish(Some(artifact))
    }

    /// Load a stored artifact
    pub async fn get_artifact(&self, id: &str) -> Result<Option<WorkArtifact>> {
        match self.store.get(ARTIFACTS, id).await? {
            Some(record) => Ok(Some(serde_json::from_value(record)?)),
            None => Ok(None),
        }
    }

    /// Stored artifacts, optionally filtered by status
    pub async fn list_artifacts(&self, status: Option<ArtifactStatus>) -> Result<Vec<WorkArtifact>> {
        let mut filters = Vec::new();
        if let Some(status) = status {
            filters.push(Filter::eq("status", serde_json::to_value(status)?));
        }

        self.store
            .query(ARTIFACTS, &filters)
            .await?
            .into_iter()
            .map(|record| serde_json::from_value(record).map_err(anyhow::Error::from))
            .collect()
    }

    /// Run a stage, retrying timeouts and execution errors with backoff
    async fn run_with_retry<S: Stage>(
        &self,
        runner: &StageRunner<S>,
        input: &S::Input,
        actor_id: &str,
        state: &mut PipelineState,
    ) -> Result<S::Output, StageFailure> {
        let max_attempts = runner.config().await.retry_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            match runner.run(input, actor_id).await {
                Ok(report) => {
                    state.runs.push(report.run);
                    return Ok(report.output);
                }
                Err(failure) => {
                    state.runs.push(failure.run.clone());

                    if failure.error.is_retryable() && self.retry.should_retry(attempt, max_attempts) {
                        let delay = self.retry.delay_for_attempt(attempt);
                        warn!(
                            stage = %runner.kind(),
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %failure.error,
                            "Stage failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    return Err(failure);
                }
            }
        }
    }

    async fn check_conflicts(&self, artifact: &WorkArtifact, actor_id: &str, state: &mut PipelineState) {
        let check = ConflictCheck {
            medications: artifact.content.medications.clone(),
            action: ConflictAction::Validate,
        };

        match self
            .run_with_retry(&self.stages.domain_conflict, &check, actor_id, state)
            .await
        {
            Ok(report) if !report.valid => {
                state.warnings.extend(report.warnings);
                state.warnings.extend(report.conflicts);
            }
            Ok(_) => {}
            Err(failure) => {
                warn!(error = %failure.error, "Medication validation failed");
                state
                    .warnings
                    .push(format!("Medication validation failed: {}", failure.error));
            }
        }
    }

    /// Governance review; a compliant verdict moves the artifact to pending approval
    async fn govern(
        &self,
        artifact: &mut WorkArtifact,
        actor_id: &str,
        state: &mut PipelineState,
    ) -> Result<(), StageFailure> {
        let request = GovernanceRequest {
            artifact: artifact.clone(),
            action: GovernanceAction::Validate,
            actor_id: actor_id.to_string(),
            reason: None,
        };

        let report = self
            .run_with_retry(&self.stages.governance, &request, actor_id, state)
            .await?;

        state
            .warnings
            .extend(report.verdict.issues.iter().map(|i| format!("Governance: {}", i)));
        state.warnings.extend(report.risks);

        if report.verdict.compliant {
            artifact.status = ArtifactStatus::PendingApproval;
            if let Err(e) = artifact.seal() {
                state.errors.push(PipelineError::from(e).to_string());
            }
        }
        Ok(())
    }

    async fn persist(&self, id: &str, artifact: &WorkArtifact) -> Result<(), PipelineError> {
        let record = serde_json::to_value(artifact)?;
        self.store
            .put(ARTIFACTS, id, record, false)
            .await
            .map_err(|e| PipelineError::Persistence {
                id: id.to_string(),
                message: format!("{:#}", e),
            })?;
        debug!(artifact_id = %id, "Artifact persisted");
        Ok(())
    }

    /// Reload the stored copy and check it against the sealed hash
    async fn verify_persisted(
        &self,
        id: &str,
        artifact: &WorkArtifact,
        actor_id: &str,
        state: &mut PipelineState,
    ) {
        let expected = artifact.hash.clone().unwrap_or_default();

        let reloaded = match self.get_artifact(id).await {
            Ok(Some(reloaded)) => reloaded,
            Ok(None) => {
                state
                    .errors
                    .push(PipelineError::Missing { id: id.to_string() }.to_string());
                return;
            }
            Err(e) => {
                state.errors.push(format!("Failed to reload artifact '{}': {:#}", id, e));
                return;
            }
        };

        let input = IntegrityInput::artifact(reloaded, Some(expected.clone()));
        match self
            .run_with_retry(&self.stages.integrity, &input, actor_id, state)
            .await
        {
            Ok(report) if report.current_hash != expected => {
                error!(artifact_id = %id, "Persisted artifact does not match its sealed hash");
                state.errors.push(
                    PipelineError::IntegrityMismatch {
                        id: id.to_string(),
                        expected,
                        actual: report.current_hash,
                    }
                    .to_string(),
                );
            }
            Ok(report) if !report.valid => {
                state.errors.push(format!(
                    "Post-persistence integrity check failed: {}",
                    report.issues.join("; ")
                ));
            }
            Ok(_) => debug!(artifact_id = %id, "Persisted artifact verified"),
            Err(failure) => state.warnings.push(format!(
                "Post-persistence integrity check failed to run: {}",
                failure.error
            )),
        }
    }
}

fn new_artifact_id() -> String {
    format!("proto_{}", Uuid::new_v4().simple())
}
