//! Pipeline Integration Tests
//!
//! End-to-end runs through the orchestrator: stage gating, warning
//! aggregation, persistence and the post-persist integrity check.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use protoguard::adapters::{
    DocumentStore, FileDocumentStore, Filter, MemoryDocumentStore, PromptSpec, TextGenerator,
    ARTIFACTS,
};
use protoguard::core::{
    verify_sink, AuditHandle, AuditSink, JsonlAuditSink, MemoryAuditSink, Orchestrator,
    RetryPolicy, StageConfig, StageSet,
};
use protoguard::domain::{
    ArtifactStatus, Gender, Medication, ModuleType, Route, RunStatus, StageKind, Subject,
    WorkArtifact,
};
use protoguard::stages::{
    DomainConflictStage, GenerationRequest, GeneratorStage, GovernanceStage, IntegrityStage,
};
use serde_json::{json, Value};
use tempfile::TempDir;

fn subject() -> Subject {
    Subject {
        id: "subj-1".to_string(),
        name: "Ana Souza".to_string(),
        gender: Gender::Female,
        age: 52,
        history: Vec::new(),
        allergies: Vec::new(),
        current_medications: None,
    }
}

fn medication(name: &str, ingredient: &str) -> Medication {
    Medication {
        id: format!("med-{}", ingredient),
        name: name.to_string(),
        active_ingredient: ingredient.to_string(),
        dosage: "5 mg".to_string(),
        frequency: "daily".to_string(),
        duration: "30 days".to_string(),
        route: Some(Route::Oral),
        instructions: String::new(),
        in_stock: true,
    }
}

fn request(medications: Vec<Medication>) -> GenerationRequest {
    GenerationRequest {
        subject: subject(),
        module: ModuleType::Pharmacology,
        objective: "Stabilize anticoagulation".to_string(),
        context: None,
        medications,
        exams: Vec::new(),
    }
}

/// Never answers; only a timeout ends the call
struct HangingText;

#[async_trait]
impl TextGenerator for HangingText {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn generate(&self, _prompt: &PromptSpec) -> Result<String> {
        std::future::pending::<()>().await;
        unreachable!()
    }
}

/// Rewrites the title of every artifact it stores
struct TamperingStore {
    inner: MemoryDocumentStore,
}

#[async_trait]
impl DocumentStore for TamperingStore {
    async fn put(&self, collection: &str, id: &str, mut record: Value, merge: bool) -> Result<()> {
        if collection == ARTIFACTS {
            record["title"] = json!("Edited after sealing");
        }
        self.inner.put(collection, id, record, merge).await
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        self.inner.get(collection, id).await
    }

    async fn query(&self, collection: &str, filters: &[Filter]) -> Result<Vec<Value>> {
        self.inner.query(collection, filters).await
    }
}

/// Rejects every write
struct FullDiskStore;

#[async_trait]
impl DocumentStore for FullDiskStore {
    async fn put(&self, _collection: &str, _id: &str, _record: Value, _merge: bool) -> Result<()> {
        anyhow::bail!("disk full")
    }

    async fn get(&self, _collection: &str, _id: &str) -> Result<Option<Value>> {
        Ok(None)
    }

    async fn query(&self, _collection: &str, _filters: &[Filter]) -> Result<Vec<Value>> {
        Ok(Vec::new())
    }
}

fn orchestrator(store: Arc<dyn DocumentStore>, audit: Arc<dyn AuditSink>) -> Orchestrator {
    let (handle, _writer) = AuditHandle::spawn(audit);
    Orchestrator::new(Arc::new(StageSet::with_defaults(handle)), store)
        .with_retry_policy(RetryPolicy::immediate())
}

#[tokio::test]
async fn test_end_to_end_with_file_backends() {
    let temp = TempDir::new().unwrap();
    let store_dir = temp.path().join("store");
    let audit_path = temp.path().join("audit.jsonl");

    let store: Arc<dyn DocumentStore> = Arc::new(FileDocumentStore::open(&store_dir).await.unwrap());
    let orchestrator = orchestrator(store, Arc::new(JsonlAuditSink::new(&audit_path)));

    let outcome = orchestrator
        .run_pipeline(&request(vec![medication("Marevan", "warfarin")]), "dr-house")
        .await;

    assert!(outcome.success, "errors: {:?}", outcome.errors);
    let artifact = outcome.artifact.expect("artifact");
    let id = artifact.id.clone().expect("id assigned");
    assert!(id.starts_with("proto_"));
    assert_eq!(artifact.created_by.as_deref(), Some("dr-house"));
    assert_eq!(artifact.status, ArtifactStatus::PendingApproval);
    assert!(artifact.is_sealed_intact());

    // generator, domain_conflict, governance, integrity, post-persist integrity
    let stages: Vec<&str> = outcome.runs.iter().map(|r| r.stage_name.as_str()).collect();
    assert_eq!(
        stages,
        vec!["generator", "domain_conflict", "governance", "integrity", "integrity"]
    );
    assert!(outcome.runs.iter().all(|r| r.status == RunStatus::Success));

    // A fresh store over the same directory sees the same sealed record
    let reopened = FileDocumentStore::open(&store_dir).await.unwrap();
    let stored: WorkArtifact =
        serde_json::from_value(reopened.get(ARTIFACTS, &id).await.unwrap().unwrap()).unwrap();
    assert_eq!(stored.hash, artifact.hash);
    assert!(stored.is_sealed_intact());

    let report = verify_sink(&JsonlAuditSink::new(&audit_path)).await.unwrap();
    assert_eq!(report.entries, 5);
    assert!(report.is_valid());
}

#[tokio::test]
async fn test_domain_conflict_skipped_without_medications() {
    let store = Arc::new(MemoryDocumentStore::new());
    let audit = Arc::new(MemoryAuditSink::new());
    let orchestrator = orchestrator(store.clone(), audit.clone());

    let outcome = orchestrator.run_pipeline(&request(Vec::new()), "dr-house").await;

    assert!(outcome.success, "errors: {:?}", outcome.errors);
    assert!(outcome
        .runs
        .iter()
        .all(|r| r.stage_name != StageKind::DomainConflict.name()));
    assert_eq!(store.count(ARTIFACTS).await, 1);
    assert_eq!(audit.entries().await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_interaction_conflicts_become_warnings() {
    let store = Arc::new(MemoryDocumentStore::new());
    let orchestrator = orchestrator(store.clone(), Arc::new(MemoryAuditSink::new()));

    let outcome = orchestrator
        .run_pipeline(
            &request(vec![
                medication("Marevan", "warfarin"),
                medication("AAS", "aspirin"),
            ]),
            "dr-house",
        )
        .await;

    assert!(outcome.success);
    let conflicts: Vec<&String> = outcome
        .warnings
        .iter()
        .filter(|w| w.contains("increased bleeding risk"))
        .collect();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(store.count(ARTIFACTS).await, 1);
}

#[tokio::test]
async fn test_invalid_request_aborts_before_anything_else() {
    let store = Arc::new(MemoryDocumentStore::new());
    let audit = Arc::new(MemoryAuditSink::new());
    let orchestrator = orchestrator(store.clone(), audit.clone());

    let mut bad = request(Vec::new());
    bad.subject.id = "  ".to_string();

    let outcome = orchestrator.run_pipeline(&bad, "dr-house").await;

    assert!(!outcome.success);
    assert!(outcome.artifact.is_none());
    assert!(outcome.errors[0].starts_with("Generation failed:"));
    assert_eq!(outcome.runs.len(), 1);
    assert_eq!(outcome.runs[0].stage_name, StageKind::Generator.name());
    assert_eq!(store.count(ARTIFACTS).await, 0);
    assert_eq!(audit.entries().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_generator_timeout_aborts_pipeline() {
    let store = Arc::new(MemoryDocumentStore::new());
    let (handle, _writer) = AuditHandle::spawn(Arc::new(MemoryAuditSink::new()));

    let stages = StageSet::new(
        GeneratorStage::with_text_generator(Arc::new(HangingText)),
        DomainConflictStage::default(),
        GovernanceStage::default(),
        IntegrityStage,
        |kind| {
            let mut config = StageConfig::defaults_for(kind);
            if kind == StageKind::Generator {
                config.timeout_ms = 50;
                config.retry_attempts = 1;
            }
            config
        },
        handle,
    );
    let orchestrator = Orchestrator::new(Arc::new(stages), store.clone());

    let outcome = orchestrator.run_pipeline(&request(Vec::new()), "dr-house").await;

    assert!(!outcome.success);
    assert!(outcome.errors[0].contains("timed out"), "errors: {:?}", outcome.errors);
    assert_eq!(outcome.runs.len(), 1);
    assert_eq!(outcome.runs[0].status, RunStatus::Error);
    assert_eq!(store.count(ARTIFACTS).await, 0);
}

#[tokio::test]
async fn test_generator_retries_until_attempts_exhausted() {
    let store = Arc::new(MemoryDocumentStore::new());
    let (handle, _writer) = AuditHandle::spawn(Arc::new(MemoryAuditSink::new()));

    let stages = StageSet::new(
        GeneratorStage::with_text_generator(Arc::new(HangingText)),
        DomainConflictStage::default(),
        GovernanceStage::default(),
        IntegrityStage,
        |kind| {
            let mut config = StageConfig::defaults_for(kind);
            config.timeout_ms = 20;
            config
        },
        handle,
    );
    let orchestrator =
        Orchestrator::new(Arc::new(stages), store.clone()).with_retry_policy(RetryPolicy::immediate());

    let outcome = orchestrator.run_pipeline(&request(Vec::new()), "dr-house").await;

    assert!(!outcome.success);
    assert_eq!(outcome.runs.len(), 3);
    assert!(outcome
        .runs
        .iter()
        .all(|r| r.stage_name == StageKind::Generator.name()));
    assert_eq!(store.count(ARTIFACTS).await, 0);
}

#[tokio::test]
async fn test_disabled_governance_aborts_without_persisting() {
    let store = Arc::new(MemoryDocumentStore::new());
    let (handle, _writer) = AuditHandle::spawn(Arc::new(MemoryAuditSink::new()));
    let stages = Arc::new(StageSet::with_defaults(handle));
    stages.set_enabled(StageKind::Governance, false).await;

    let orchestrator = Orchestrator::new(stages, store.clone());
    let outcome = orchestrator.run_pipeline(&request(Vec::new()), "dr-house").await;

    assert!(!outcome.success);
    assert!(outcome.errors[0].starts_with("Governance validation failed:"));
    // Built but never persisted
    let artifact = outcome.artifact.expect("artifact");
    assert_eq!(artifact.status, ArtifactStatus::Draft);
    assert_eq!(store.count(ARTIFACTS).await, 0);
}

#[tokio::test]
async fn test_disabled_integrity_is_only_a_warning() {
    let store = Arc::new(MemoryDocumentStore::new());
    let (handle, _writer) = AuditHandle::spawn(Arc::new(MemoryAuditSink::new()));
    let stages = Arc::new(StageSet::with_defaults(handle));
    stages.set_enabled(StageKind::Integrity, false).await;

    let orchestrator = Orchestrator::new(stages, store.clone());
    let outcome = orchestrator.run_pipeline(&request(Vec::new()), "dr-house").await;

    assert!(outcome.success, "errors: {:?}", outcome.errors);
    assert!(outcome
        .warnings
        .iter()
        .any(|w| w.starts_with("Integrity check failed:")));
    assert_eq!(store.count(ARTIFACTS).await, 1);
}

#[tokio::test]
async fn test_list_and_get_artifacts() {
    let store = Arc::new(MemoryDocumentStore::new());
    let orchestrator = orchestrator(store, Arc::new(MemoryAuditSink::new()));

    let first = orchestrator.run_pipeline(&request(Vec::new()), "dr-house").await;
    let second = orchestrator.run_pipeline(&request(Vec::new()), "dr-wilson").await;
    assert!(first.success && second.success);

    let pending = orchestrator
        .list_artifacts(Some(ArtifactStatus::PendingApproval))
        .await
        .unwrap();
    assert_eq!(pending.len(), 2);
    assert!(orchestrator
        .list_artifacts(Some(ArtifactStatus::Approved))
        .await
        .unwrap()
        .is_empty());

    let id = second.artifact.unwrap().id.unwrap();
    let loaded = orchestrator.get_artifact(&id).await.unwrap().unwrap();
    assert_eq!(loaded.created_by.as_deref(), Some("dr-wilson"));
    assert!(orchestrator.get_artifact("proto_missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_persistence_failure_aborts_before_post_check() {
    let orchestrator = orchestrator(Arc::new(FullDiskStore), Arc::new(MemoryAuditSink::new()));

    let outcome = orchestrator.run_pipeline(&request(Vec::new()), "dr-house").await;

    assert!(!outcome.success);
    assert_eq!(outcome.errors.len(), 1);
    assert!(outcome.errors[0].starts_with("Failed to persist artifact"));
    assert!(outcome.errors[0].ends_with("disk full"));
    // generator, governance, integrity; no post-persist check
    assert_eq!(outcome.runs.len(), 3);
    assert!(outcome.artifact.is_some());
}

#[tokio::test]
async fn test_store_side_edit_is_an_integrity_error() {
    let store = Arc::new(TamperingStore {
        inner: MemoryDocumentStore::new(),
    });
    let orchestrator = orchestrator(store, Arc::new(MemoryAuditSink::new()));

    let outcome = orchestrator.run_pipeline(&request(Vec::new()), "dr-house").await;

    assert!(!outcome.success);
    assert_eq!(outcome.errors.len(), 1);
    assert!(
        outcome.errors[0].starts_with("Integrity mismatch for artifact"),
        "errors: {:?}",
        outcome.errors
    );
    let sealed = outcome.artifact.unwrap().hash.unwrap();
    assert!(outcome.errors[0].contains(&sealed));
    // generator, governance, integrity, post-persist integrity
    assert_eq!(outcome.runs.len(), 4);
}
