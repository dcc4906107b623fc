//! Governance stage: compliance verdict, risk list, recommendations, its own
//! confidence score, and the approval decision.
//!
//! Scoring and approval are pure functions over the artifact; the stage only
//! adds the policy lookup around them.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::runtime::Stage;
use crate::domain::{ModuleType, StageKind, WorkArtifact};

const MIN_ARTIFACT_CONFIDENCE: u8 = 70;
const REVIEW_CONFIDENCE: u8 = 85;
const MAX_MEDICATIONS: usize = 5;
const MIN_RATIONALE_CHARS: usize = 50;

const APPROVE_MAX_RISKS: usize = 3;
const APPROVE_MIN_CONFIDENCE: u8 = 75;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GovernanceAction {
    Validate,
    Approve,
    Reject,
    Review,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockStatus {
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplainMode {
    Active,
    Passive,
}

/// Process-wide governance knobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernancePolicy {
    pub lock_status: LockStatus,
    pub explain_mode: ExplainMode,
    pub audit_logging: bool,

    /// Require a stored hash for compliance
    pub determinism_check: bool,
}

impl Default for GovernancePolicy {
    fn default() -> Self {
        Self {
            lock_status: LockStatus::Enabled,
            explain_mode: ExplainMode::Active,
            audit_logging: true,
            determinism_check: true,
        }
    }
}

/// Partial policy change; `None` fields are left alone
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyUpdate {
    pub lock_status: Option<LockStatus>,
    pub explain_mode: Option<ExplainMode>,
    pub audit_logging: Option<bool>,
    pub determinism_check: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernanceRequest {
    pub artifact: WorkArtifact,
    pub action: GovernanceAction,
    pub actor_id: String,

    /// Required for `reject`
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceVerdict {
    pub compliant: bool,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernanceReport {
    pub action: GovernanceAction,
    pub verdict: GovernanceVerdict,
    pub risks: Vec<String>,
    pub recommendations: Vec<String>,
    pub confidence: u8,
    pub approved: bool,
}

#[derive(Default)]
pub struct GovernanceStage {
    policy: RwLock<GovernancePolicy>,
}

impl GovernanceStage {
    pub fn new(policy: GovernancePolicy) -> Self {
        Self {
            policy: RwLock::new(policy),
        }
    }

    pub async fn policy(&self) -> GovernancePolicy {
        self.policy.read().await.clone()
    }

    /// Apply a partial update and return the resulting policy
    pub async fn update_policy(&self, update: PolicyUpdate) -> GovernancePolicy {
        let mut policy = self.policy.write().await;
        if let Some(lock_status) = update.lock_status {
            policy.lock_status = lock_status;
        }
        if let Some(explain_mode) = update.explain_mode {
            policy.explain_mode = explain_mode;
        }
        if let Some(audit_logging) = update.audit_logging {
            policy.audit_logging = audit_logging;
        }
        if let Some(determinism_check) = update.determinism_check {
            policy.determinism_check = determinism_check;
        }
        info!(?policy, "Governance policy updated");
        policy.clone()
    }
}

#[async_trait]
impl Stage for GovernanceStage {
    type Input = GovernanceRequest;
    type Output = GovernanceReport;

    fn kind(&self) -> StageKind {
        StageKind::Governance
    }

    fn validate(&self, input: &GovernanceRequest) -> bool {
        let reason_ok = match input.action {
            GovernanceAction::Reject => input
                .reason
                .as_deref()
                .is_some_and(|r| !r.trim().is_empty()),
            _ => true,
        };
        reason_ok && !input.actor_id.trim().is_empty()
    }

    async fn execute(&self, input: &GovernanceRequest, _cancel: CancellationToken) -> Result<GovernanceReport> {
        let policy = self.policy().await;
        let artifact = &input.artifact;

        let verdict = assess_verdict(artifact, policy.determinism_check);
        let risks = assess_risks(artifact);
        let recommendations = recommendations(artifact, &risks);
        let confidence = governance_confidence(artifact, risks.len());
        let approved = approval_decision(input.action, &verdict, &risks, confidence);

        debug!(
            action = ?input.action,
            compliant = verdict.compliant,
            risks = risks.len(),
            confidence,
            approved,
            "Governance assessment"
        );

        Ok(GovernanceReport {
            action: input.action,
            verdict,
            risks,
            recommendations,
            confidence,
            approved,
        })
    }
}

/// Compliance issues; compliant when there are none
pub fn assess_verdict(artifact: &WorkArtifact, determinism_check: bool) -> GovernanceVerdict {
    let mut issues = Vec::new();

    if artifact.subject_id.trim().is_empty() {
        issues.push("Missing subject id".to_string());
    }
    if artifact.title.trim().is_empty() {
        issues.push("Missing title".to_string());
    }
    if artifact.rationale.trim().is_empty() {
        issues.push("Missing clinical rationale".to_string());
    }
    if artifact.created_by.as_deref().map_or(true, |c| c.trim().is_empty()) {
        issues.push("Missing creator".to_string());
    }
    if determinism_check && artifact.hash.is_none() {
        issues.push("Missing deterministic hash".to_string());
    }
    if artifact.confidence < MIN_ARTIFACT_CONFIDENCE {
        issues.push(format!(
            "Confidence {} is below the minimum of {}",
            artifact.confidence, MIN_ARTIFACT_CONFIDENCE
        ));
    }

    GovernanceVerdict {
        compliant: issues.is_empty(),
        issues,
    }
}

pub fn assess_risks(artifact: &WorkArtifact) -> Vec<String> {
    let mut risks = Vec::new();

    if artifact.content.medications.len() > MAX_MEDICATIONS {
        risks.push("Multiple medications: interaction review required".to_string());
    }
    if artifact.objective.trim().is_empty() {
        risks.push("Protocol objective is not clearly defined".to_string());
    }
    if artifact.module == ModuleType::HormoneTherapy && artifact.content.exams.is_empty() {
        risks.push("Hormonal therapy without recent lab work".to_string());
    }

    risks
}

pub fn recommendations(artifact: &WorkArtifact, risks: &[String]) -> Vec<String> {
    let mut out = Vec::new();

    if !risks.is_empty() {
        out.push("Review and address identified risks before approval".to_string());
    }

    match artifact.module {
        ModuleType::HormoneTherapy => {
            out.push("Confirm baseline hormone panel before the first dose".to_string());
            out.push("Schedule laboratory monitoring every 4-6 weeks".to_string());
        }
        ModuleType::Pharmacology => {
            out.push("Verify drug interactions against the current medication list".to_string());
            out.push("Confirm stock availability for every prescribed item".to_string());
        }
        _ => {}
    }

    if artifact.confidence < REVIEW_CONFIDENCE {
        out.push("Consider additional review: confidence is below 85".to_string());
    }

    out.push("Document informed consent".to_string());
    out.push("Schedule follow-up".to_string());
    out
}

/// Governance's own confidence, always within 0..=100
pub fn governance_confidence(artifact: &WorkArtifact, risk_count: usize) -> u8 {
    let mut score = 100.0 - 10.0 * risk_count as f64;

    if artifact.rationale.chars().count() < MIN_RATIONALE_CHARS {
        score -= 15.0;
    }
    if artifact.content.sections.is_empty() {
        score -= 20.0;
    }
    if let Some(insight) = &artifact.insight_bundle {
        score = (score + insight.confidence as f64) / 2.0;
    }

    score.round().clamp(0.0, 100.0) as u8
}

/// Approval rule per action; only `approve` and `validate` can approve
pub fn approval_decision(
    action: GovernanceAction,
    verdict: &GovernanceVerdict,
    risks: &[String],
    confidence: u8,
) -> bool {
    match action {
        GovernanceAction::Approve => {
            verdict.compliant && risks.len() <= APPROVE_MAX_RISKS && confidence >= APPROVE_MIN_CONFIDENCE
        }
        GovernanceAction::Validate => verdict.compliant && risks.is_empty(),
        GovernanceAction::Reject | GovernanceAction::Review => false,
    }
}
