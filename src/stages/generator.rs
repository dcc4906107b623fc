//! Generator stage: drafts a work artifact from a request.
//!
//! Prose comes from the text generator when one is configured. When it is
//! absent or fails, fixed templates are used instead; the only run-to-run
//! variation in that path is the embedded timestamps.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::adapters::{PromptPurpose, PromptSpec, TextGenerator};
use crate::core::runtime::Stage;
use crate::domain::{
    ArtifactContent, ArtifactStatus, ExamRequest, InsightBundle, Medication, ModuleType, Section,
    StageKind, Subject, WorkArtifact,
};

/// Model version recorded on template-built insight bundles
pub const FALLBACK_MODEL: &str = "fallback-v1";

const TITLE_OBJECTIVE_CHARS: usize = 50;
const BASE_CONFIDENCE: f64 = 80.0;
const COMPLETENESS_BONUS: f64 = 5.0;
const RISK_PENALTY: f64 = 3.0;
const PARSED_INSIGHT_CONFIDENCE: i64 = 85;

/// Objective keywords (any of) and the tag they add
const KEYWORD_TAGS: &[(&[&str], &str)] = &[
    (&["hormonal", "hormone"], "hormonal"),
    (&["testosterone"], "testosterone"),
    (&["estradiol"], "estradiol"),
    (&["thyroid"], "thyroid"),
    (&["weight loss"], "weight-management"),
];

const MARKER_TAGS: [&str; 2] = ["ai-generated", "deterministic"];

const RISK_KEYWORDS: &[&str] = &["risk", "caution", "warning", "contraindication", "adverse effect"];

const INSTRUCTIONS: [&str; 4] = [
    "Follow the medical guidance strictly",
    "Keep a record of symptoms and effects",
    "Attend every follow-up appointment",
    "Complete laboratory exams as requested",
];

/// What to generate
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub subject: Subject,
    pub module: ModuleType,
    pub objective: String,

    #[serde(default)]
    pub context: Option<String>,

    /// Items carried into the artifact content
    #[serde(default)]
    pub medications: Vec<Medication>,

    #[serde(default)]
    pub exams: Vec<ExamRequest>,
}

/// Draft artifact plus the insight and confidence it was scored with
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOutput {
    pub artifact: WorkArtifact,
    pub insight: InsightBundle,
    pub confidence: u8,
}

/// Drafts artifacts, delegating prose to an optional text generator
#[derive(Clone, Default)]
pub struct GeneratorStage {
    text: Option<Arc<dyn TextGenerator>>,
}

impl GeneratorStage {
    /// Template-only generator
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text_generator(text: Arc<dyn TextGenerator>) -> Self {
        Self { text: Some(text) }
    }

    /// Ask the text generator for prose.
    ///
    /// `Ok(None)` means "use the template": no generator, or it failed.
    async fn ask(
        &self,
        request: &GenerationRequest,
        purpose: PromptPurpose,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        let Some(text) = &self.text else {
            return Ok(None);
        };

        let prompt = PromptSpec {
            subject: request.subject.clone(),
            module: request.module,
            objective: request.objective.clone(),
            context: request.context.clone(),
            purpose,
        };

        let reply = tokio::select! {
            reply = text.generate(&prompt) => reply,
            _ = cancel.cancelled() => anyhow::bail!("Generation cancelled"),
        };

        match reply {
            Ok(prose) => Ok(Some(prose)),
            Err(e) => {
                warn!(generator = text.name(), ?purpose, error = %e, "Text generation failed, using template");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl Stage for GeneratorStage {
    type Input = GenerationRequest;
    type Output = GenerationOutput;

    fn kind(&self) -> StageKind {
        StageKind::Generator
    }

    fn validate(&self, input: &GenerationRequest) -> bool {
        !input.subject.id.trim().is_empty() && !input.subject.name.trim().is_empty()
    }

    async fn execute(
        &self,
        input: &GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<GenerationOutput> {
        let title = artifact_title(input.module, &input.objective);

        let rationale = match self.ask(input, PromptPurpose::Rationale, &cancel).await? {
            Some(prose) => prose,
            None => fallback_rationale(input),
        };

        if cancel.is_cancelled() {
            anyhow::bail!("Generation cancelled");
        }

        let sections = build_sections(input, &rationale);

        let insight = match self.ask(input, PromptPurpose::Insight, &cancel).await? {
            Some(prose) => {
                let model = self.text.as_ref().map(|t| t.name()).unwrap_or(FALLBACK_MODEL);
                parse_insight(&prose, model)
            }
            None => fallback_insight(input),
        };

        let confidence = generation_confidence(&input.subject, sections.len(), &insight);
        debug!(confidence, sections = sections.len(), model = %insight.model_version, "Draft assembled");

        let artifact = WorkArtifact {
            id: None,
            subject_id: input.subject.id.clone(),
            subject_name: input.subject.name.clone(),
            title,
            module: input.module,
            objective: input.objective.clone(),
            rationale,
            content: ArtifactContent {
                sections,
                medications: input.medications.clone(),
                exams: input.exams.clone(),
                instructions: INSTRUCTIONS.iter().map(|s| s.to_string()).collect(),
            },
            insight_bundle: Some(insight.clone()),
            status: ArtifactStatus::Draft,
            confidence,
            tags: artifact_tags(input.module, &input.objective),
            created_by: None,
            created_at: Utc::now(),
            approved_by: None,
            hash: None,
        };

        Ok(GenerationOutput {
            artifact,
            insight,
            confidence,
        })
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// `"<module display name>: <objective, at most 50 chars>"`
pub fn artifact_title(module: ModuleType, objective: &str) -> String {
    format!(
        "{}: {}",
        module.display_name(),
        truncate(objective, TITLE_OBJECTIVE_CHARS)
    )
}

/// Module tag, keyword tags found in the objective, then the fixed markers
pub fn artifact_tags(module: ModuleType, objective: &str) -> Vec<String> {
    let lower = objective.to_lowercase();
    let mut tags = vec![module.tag().to_string()];

    for (keywords, tag) in KEYWORD_TAGS {
        if keywords.iter().any(|k| lower.contains(k)) {
            tags.push(tag.to_string());
        }
    }

    for marker in MARKER_TAGS {
        if !tags.iter().any(|t| t == marker) {
            tags.push(marker.to_string());
        }
    }
    tags
}

fn fallback_rationale(request: &GenerationRequest) -> String {
    let subject = &request.subject;
    let mut rationale = format!(
        "This protocol was prepared for {}, {}, with the objective to {}.\n\n",
        subject.name,
        subject.descriptor(),
        request.objective.to_lowercase()
    );

    let module_paragraph = match request.module {
        ModuleType::HormoneTherapy => Some(
            "The proposed hormone therapy accounts for the subject's physiological parameters, \
             age, clinical history and recent laboratory results. It is designed to optimize \
             hormone levels safely and gradually.",
        ),
        ModuleType::Laboratory => Some(
            "The proposed laboratory analysis evaluates the biochemical and hormonal markers \
             relevant to the subject's clinical profile, supporting evidence-based decisions.",
        ),
        ModuleType::Pharmacology => Some(
            "The pharmacological protocol accounts for drug interactions, bioavailability and \
             a pharmacokinetic profile suited to the subject.",
        ),
        _ => None,
    };
    if let Some(paragraph) = module_paragraph {
        rationale.push_str(paragraph);
        rationale.push_str("\n\n");
    }

    if let Some(context) = &request.context {
        rationale.push_str(&format!("Additional context: {}\n\n", context));
    }

    rationale.push_str(
        "This protocol must be reviewed and approved by the responsible physician before implementation.",
    );
    rationale
}

fn build_sections(request: &GenerationRequest, rationale: &str) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();
    let mut push = |title: &str, content: String| {
        let order = sections.len() as u32 + 1;
        sections.push(Section {
            title: title.to_string(),
            content,
            order,
        });
    };

    push(
        "Introduction",
        format!(
            "Personalized protocol for {}, aimed at {}.",
            request.subject.name,
            request.objective.to_lowercase()
        ),
    );
    push("Clinical Rationale", rationale.to_string());

    match request.module {
        ModuleType::HormoneTherapy => {
            push(
                "Administration",
                "Dosage, frequency and route will be set after reviewing laboratory results."
                    .to_string(),
            );
            push(
                "Monitoring",
                "Laboratory follow-up every 4-6 weeks for the first 3 months, then quarterly."
                    .to_string(),
            );
        }
        ModuleType::Pharmacology => {
            let plan = if request.medications.is_empty() {
                "Medication selection will be confirmed after interaction and availability checks."
                    .to_string()
            } else {
                let names: Vec<&str> = request.medications.iter().map(|m| m.name.as_str()).collect();
                format!("Planned medications: {}.", names.join(", "))
            };
            push("Medication Plan", plan);
        }
        ModuleType::Laboratory => {
            push(
                "Panel Selection",
                "Biochemical and hormonal markers are selected for the subject's clinical profile."
                    .to_string(),
            );
        }
        _ => {}
    }

    push(
        "Safety Considerations",
        "Monitor for adverse effects. Any unusual symptom must be reported immediately."
            .to_string(),
    );
    push(
        "Follow-up",
        "Follow-up visits are scheduled as clinically needed; the protocol is adjusted to the therapeutic response."
            .to_string(),
    );

    sections
}

fn is_numbered(line: &str) -> bool {
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    digits > 0 && line[digits..].starts_with('.')
}

/// Mine generated prose for an insight bundle
pub fn parse_insight(text: &str, model_version: &str) -> InsightBundle {
    let summary = truncate(text.lines().next().unwrap_or_default(), 200);

    let mut key_points = Vec::new();
    for line in text.lines() {
        if !(line.contains('•') || line.contains('-') || is_numbered(line)) {
            continue;
        }
        let cleaned = line
            .trim_start_matches(|c: char| c == '•' || c == '-' || c == '.' || c.is_ascii_digit() || c.is_whitespace())
            .trim();
        let cleaned = truncate(cleaned, 150);
        if cleaned.chars().count() > 10 {
            key_points.push(cleaned);
            if key_points.len() >= 5 {
                break;
            }
        }
    }
    if key_points.is_empty() {
        key_points.push("Personalized protocol drafted from model analysis".to_string());
    }

    let lower = text.to_lowercase();
    let risks = RISK_KEYWORDS
        .iter()
        .filter(|k| lower.contains(*k))
        .map(|k| format!("Check {}", k))
        .take(3)
        .collect();

    InsightBundle {
        summary,
        key_points,
        risks,
        recommendations: vec![
            "Regular medical follow-up".to_string(),
            "Periodic laboratory monitoring".to_string(),
            "Document the subject's progress".to_string(),
        ],
        confidence: PARSED_INSIGHT_CONFIDENCE,
        reasoning: truncate(text, 500),
        generated_at: Utc::now(),
        model_version: model_version.to_string(),
    }
}

fn fallback_insight(request: &GenerationRequest) -> InsightBundle {
    let subject = &request.subject;

    let mut risks = Vec::new();
    if subject.age > 60 {
        risks.push("Advanced age requires more frequent monitoring".to_string());
    }
    if subject.history.len() > 5 {
        risks.push("Extensive clinical history: review interactions".to_string());
    }

    InsightBundle {
        summary: format!(
            "{} protocol focused on {}",
            request.module.display_name(),
            request.objective
        ),
        key_points: vec![
            format!("Personalized protocol for a {}", subject.descriptor()),
            format!("Module: {}", request.module.display_name()),
            format!("Objective: {}", request.objective),
            "Deterministic protocol with full traceability".to_string(),
        ],
        risks,
        recommendations: vec![
            "Run a laboratory evaluation before starting the protocol".to_string(),
            "Establish a monitoring baseline".to_string(),
            "Document the subject's informed consent".to_string(),
            "Schedule a follow-up appointment".to_string(),
        ],
        confidence: PARSED_INSIGHT_CONFIDENCE,
        reasoning: format!(
            "Profile analysed by age ({} years), gender ({}), clinical history and objective. \
             The protocol follows evidence-based guidelines and is structured to maximize \
             efficacy while minimizing risk.",
            subject.age,
            subject.gender.adjective()
        ),
        generated_at: Utc::now(),
        model_version: FALLBACK_MODEL.to_string(),
    }
}

/// Score a draft: completeness bonuses, averaged with the insight, minus risks.
///
/// Always within 0..=100.
pub fn generation_confidence(subject: &Subject, section_count: usize, insight: &InsightBundle) -> u8 {
    let mut score = BASE_CONFIDENCE;
    if !subject.history.is_empty() {
        score += COMPLETENESS_BONUS;
    }
    if subject.current_medications.is_some() {
        score += COMPLETENESS_BONUS;
    }
    if section_count >= 4 {
        score += COMPLETENESS_BONUS;
    }

    score = (score + insight.confidence as f64) / 2.0;
    score -= insight.risks.len() as f64 * RISK_PENALTY;

    score.round().clamp(0.0, 100.0) as u8
}
