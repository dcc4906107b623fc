//! Command-line interface for protoguard.
//!
//! Provides commands for running the pipeline, inspecting stored artifacts,
//! verifying the audit chain, and showing stage and path configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use crate::adapters::{DocumentStore, FileDocumentStore, HttpTextGenerator, StoreAvailability};
use crate::config::{self, ResolvedConfig};
use crate::core::audit::{verify_sink, AuditHandle, JsonlAuditSink};
use crate::core::{Orchestrator, StageSet};
use crate::domain::ArtifactStatus;
use crate::stages::{
    DomainConflictStage, GenerationRequest, GeneratorStage, GovernanceStage, IntegrityStage,
};

/// protoguard - staged, audited protocol generation
#[derive(Parser, Debug)]
#[command(name = "protoguard")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the pipeline for a request file (YAML or JSON)
    Generate {
        /// Request file
        request: PathBuf,

        /// Actor recorded as creator and in the audit trail
        #[arg(short, long, default_value = "cli")]
        actor: String,

        /// Print the full outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show a stored artifact
    Show {
        /// Artifact ID
        id: String,
    },

    /// List stored artifacts
    List {
        /// Filter by status
        #[arg(short, long, value_enum)]
        status: Option<StatusArg>,
    },

    /// Walk the audit chain and report the first broken entry
    VerifyAudit,

    /// Show stage configuration
    Stages,

    /// Show resolved configuration (debug)
    Config,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StatusArg {
    Draft,
    PendingApproval,
    Approved,
    Active,
    Completed,
    Cancelled,
    Archived,
}

impl From<StatusArg> for ArtifactStatus {
    fn from(s: StatusArg) -> Self {
        match s {
            StatusArg::Draft => ArtifactStatus::Draft,
            StatusArg::PendingApproval => ArtifactStatus::PendingApproval,
            StatusArg::Approved => ArtifactStatus::Approved,
            StatusArg::Active => ArtifactStatus::Active,
            StatusArg::Completed => ArtifactStatus::Completed,
            StatusArg::Cancelled => ArtifactStatus::Cancelled,
            StatusArg::Archived => ArtifactStatus::Archived,
        }
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Generate { request, actor, json } => generate(&request, &actor, json).await,
            Commands::Show { id } => show_artifact(&id).await,
            Commands::List { status } => list_artifacts(status.map(Into::into)).await,
            Commands::VerifyAudit => verify_audit().await,
            Commands::Stages => show_stages().await,
            Commands::Config => show_config().await,
        }
    }
}

/// Wire stages, store and audit writer from the resolved configuration
async fn build_orchestrator(cfg: &ResolvedConfig) -> Result<Orchestrator> {
    let store: Arc<dyn DocumentStore> = Arc::new(FileDocumentStore::open(cfg.store_dir()).await?);
    let (audit, _writer) = AuditHandle::spawn(Arc::new(JsonlAuditSink::new(cfg.audit_log_path())));

    let generator = match &cfg.text_generator.endpoint {
        Some(endpoint) => GeneratorStage::with_text_generator(Arc::new(HttpTextGenerator::new(
            endpoint.clone(),
            cfg.text_generator.model.clone(),
            Duration::from_millis(cfg.text_generator.timeout_ms),
        )?)),
        None => GeneratorStage::new(),
    };

    let stages = StageSet::new(
        generator,
        DomainConflictStage::new(Arc::new(StoreAvailability::new(store.clone()))),
        GovernanceStage::new(cfg.governance.clone()),
        IntegrityStage,
        |kind| cfg.stage(kind),
        audit,
    );

    Ok(Orchestrator::new(Arc::new(stages), store).with_retry_policy(cfg.retry.clone()))
}

fn load_request(path: &Path) -> Result<GenerationRequest> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read request file: {}", path.display()))?;

    // YAML is a superset of JSON, so one parser covers both
    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse request file: {}", path.display()))
}

/// Run the pipeline and print the outcome
async fn generate(request_path: &Path, actor: &str, json: bool) -> Result<()> {
    let request = load_request(request_path)?;
    let orchestrator = build_orchestrator(config::config()?).await?;

    let outcome = orchestrator.run_pipeline(&request, actor).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        if let Some(artifact) = &outcome.artifact {
            println!("Artifact:   {}", artifact.id.as_deref().unwrap_or("(unassigned)"));
            println!("Title:      {}", artifact.title);
            println!("Status:     {:?}", artifact.status);
            println!("Confidence: {}", artifact.confidence);
            println!("Hash:       {}", artifact.hash.as_deref().unwrap_or("(none)"));
        }
        for warning in &outcome.warnings {
            eprintln!("warning: {}", warning);
        }
        for error in &outcome.errors {
            eprintln!("error: {}", error);
        }
    }

    if !outcome.success {
        eprintln!("\n[Pipeline failed with {} error(s)]", outcome.errors.len());
        std::process::exit(1);
    }
    eprintln!("\n[Pipeline completed with {} warning(s)]", outcome.warnings.len());
    Ok(())
}

/// Show a stored artifact as JSON
async fn show_artifact(id: &str) -> Result<()> {
    let orchestrator = build_orchestrator(config::config()?).await?;

    match orchestrator.get_artifact(id).await? {
        Some(artifact) => {
            println!("{}", serde_json::to_string_pretty(&artifact)?);
            if !artifact.is_sealed_intact() {
                eprintln!("\n[Warning: stored hash does not match content]");
            }
            Ok(())
        }
        None => anyhow::bail!("Artifact not found: {}", id),
    }
}

async fn list_artifacts(status: Option<ArtifactStatus>) -> Result<()> {
    let orchestrator = build_orchestrator(config::config()?).await?;
    let artifacts = orchestrator.list_artifacts(status).await?;

    if artifacts.is_empty() {
        println!("No artifacts found");
        return Ok(());
    }

    println!("{:<40} {:<18} {:<5} {}", "ID", "STATUS", "CONF", "TITLE");
    println!("{}", "-".repeat(90));

    for artifact in artifacts {
        let status = serde_json::to_value(artifact.status)?;
        println!(
            "{:<40} {:<18} {:<5} {}",
            artifact.id.as_deref().unwrap_or("-"),
            status.as_str().unwrap_or("-"),
            artifact.confidence,
            artifact.title
        );
    }

    Ok(())
}

/// Verify the audit chain end to end
async fn verify_audit() -> Result<()> {
    let sink = JsonlAuditSink::open_default()?;
    let report = verify_sink(&sink).await?;

    println!("Audit log: {}", sink.path().display());
    println!("Entries:   {}", report.entries);

    match report.broken_at {
        None => {
            println!("Chain:     intact");
            Ok(())
        }
        Some((index, id)) => {
            eprintln!("Chain:     BROKEN at entry {} (id {})", index, id);
            std::process::exit(1);
        }
    }
}

/// Effective stage configuration, as the runners hold it
async fn show_stages() -> Result<()> {
    let orchestrator = build_orchestrator(config::config()?).await?;

    println!(
        "{:<18} {:<8} {:<9} {:<10} {}",
        "STAGE", "ENABLED", "PRIORITY", "TIMEOUT", "ATTEMPTS"
    );
    println!("{}", "-".repeat(58));

    for stage in orchestrator.stages().configs().await {
        println!(
            "{:<18} {:<8} {:<9} {:<10} {}",
            stage.name,
            stage.enabled,
            stage.priority,
            format!("{}ms", stage.timeout_ms),
            stage.retry_attempts
        );
    }

    Ok(())
}

/// Show the resolved configuration (for debugging)
async fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("protoguard configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:      {}", cfg.home.display());
    println!("  Store:     {}", cfg.store_dir().display());
    println!("  Audit log: {}", cfg.audit_log_path().display());
    println!();
    println!("Text generator:");
    match &cfg.text_generator.endpoint {
        Some(endpoint) => {
            println!("  Endpoint: {}", endpoint);
            println!("  Model:    {}", cfg.text_generator.model);
            println!("  Timeout:  {}ms", cfg.text_generator.timeout_ms);
        }
        None => println!("  (none - template generation)"),
    }
    println!();
    println!("Governance policy:");
    println!("  Lock status:       {:?}", cfg.governance.lock_status);
    println!("  Explain mode:      {:?}", cfg.governance.explain_mode);
    println!("  Audit logging:     {}", cfg.governance.audit_logging);
    println!("  Determinism check: {}", cfg.governance.determinism_check);
    println!();
    println!("Retry:");
    println!("  Initial delay: {}ms", cfg.retry.initial_delay_ms);
    println!("  Max delay:     {}ms", cfg.retry.max_delay_ms);
    println!("  Multiplier:    {}", cfg.retry.backoff_multiplier);

    Ok(())
}
