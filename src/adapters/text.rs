//! Generative-text collaborator.
//!
//! The core treats generated text as opaque prose. The HTTP client posts a
//! rendered prompt to a configured endpoint and expects `{"text": "..."}` back.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{ModuleType, Subject};

/// What the generated text will be used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptPurpose {
    /// Clinical rationale paragraph
    Rationale,

    /// Free-form analysis that is mined for key points and risk hints
    Insight,
}

/// Everything a text generator is told about a request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptSpec {
    pub subject: Subject,
    pub module: ModuleType,
    pub objective: String,
    pub context: Option<String>,
    pub purpose: PromptPurpose,
}

impl PromptSpec {
    /// Render the prompt text sent to the model
    pub fn render(&self) -> String {
        let mut prompt = format!(
            "You are assisting with a clinical protocol.\n\nMODULE: {}\nOBJECTIVE: {}\nSUBJECT: {}\n",
            self.module.display_name(),
            self.objective,
            self.subject.descriptor(),
        );

        if !self.subject.history.is_empty() {
            prompt.push_str(&format!("HISTORY: {} entries\n", self.subject.history.len()));
        }
        if let Some(context) = &self.context {
            prompt.push_str(&format!("ADDITIONAL CONTEXT: {}\n", context));
        }

        match self.purpose {
            PromptPurpose::Rationale => prompt.push_str(
                "\nWrite an evidence-based clinical rationale of 200-400 words covering \
                 clinical context, scientific basis, subject-specific considerations and \
                 expected outcomes. Reply with the rationale only.\n",
            ),
            PromptPurpose::Insight => prompt.push_str(
                "\nAnalyse the protocol. Start with a one-line summary, then list key points \
                 as bullet lines, and call out any risk, caution or contraindication.\n",
            ),
        }

        prompt
    }
}

/// A service that turns prompts into prose
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Name recorded as the insight model version
    fn name(&self) -> &str;

    /// Generate text for a prompt
    async fn generate(&self, prompt: &PromptSpec) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    purpose: PromptPurpose,
    prompt: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    text: String,
}

/// Text generator backed by an HTTP endpoint
pub struct HttpTextGenerator {
    endpoint: String,
    model: String,
    client: reqwest::Client,
}

impl HttpTextGenerator {
    /// Create a client with a per-request timeout
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            endpoint: endpoint.into(),
            model: model.into(),
            client,
        })
    }
}

#[async_trait]
impl TextGenerator for HttpTextGenerator {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &PromptSpec) -> Result<String> {
        let request = GenerateRequest {
            model: &self.model,
            purpose: prompt.purpose,
            prompt: prompt.render(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to reach text generator at {}", self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Text generator returned {}: {}", status, body.trim());
        }

        let body: GenerateResponse = response
            .json()
            .await
            .context("Failed to parse text generator response")?;

        if body.text.trim().is_empty() {
            anyhow::bail!("Text generator returned empty text");
        }

        Ok(body.text)
    }
}
