//! Audit Chain Integration Tests
//!
//! Tests for JSONL persistence of the audit chain and detection of
//! retroactive edits.

use std::sync::Arc;

use protoguard::adapters::MemoryDocumentStore;
use protoguard::core::{
    verify_sink, AuditHandle, AuditSink, JsonlAuditSink, Orchestrator, RetryPolicy, StageSet,
    CHAIN_SENTINEL,
};
use protoguard::domain::{Gender, ModuleType, Subject};
use protoguard::stages::GenerationRequest;
use tempfile::TempDir;

fn request() -> GenerationRequest {
    GenerationRequest {
        subject: Subject {
            id: "subj-2".to_string(),
            name: "Bruno Lima".to_string(),
            gender: Gender::Male,
            age: 41,
            history: Vec::new(),
            allergies: Vec::new(),
            current_medications: Some(Vec::new()),
        },
        module: ModuleType::Lifestyle,
        objective: "Improve sleep quality".to_string(),
        context: Some("Night shift worker".to_string()),
        medications: Vec::new(),
        exams: Vec::new(),
    }
}

async fn run_once(audit_path: &std::path::Path) {
    let (handle, _writer) = AuditHandle::spawn(Arc::new(JsonlAuditSink::new(audit_path)));
    let orchestrator = Orchestrator::new(
        Arc::new(StageSet::with_defaults(handle)),
        Arc::new(MemoryDocumentStore::new()),
    )
    .with_retry_policy(RetryPolicy::immediate());

    let outcome = orchestrator.run_pipeline(&request(), "dr-cuddy").await;
    assert!(outcome.success, "errors: {:?}", outcome.errors);
}

#[tokio::test]
async fn test_chain_continues_across_writers() {
    let temp = TempDir::new().unwrap();
    let audit_path = temp.path().join("audit.jsonl");

    // Two independent writers over the same file, one after the other
    run_once(&audit_path).await;
    run_once(&audit_path).await;

    let sink = JsonlAuditSink::new(&audit_path);
    let entries = sink.entries().await.unwrap();
    assert_eq!(entries.len(), 8);
    assert_eq!(entries[0].previous_hash, CHAIN_SENTINEL);
    for pair in entries.windows(2) {
        assert_eq!(pair[1].previous_hash, pair[0].hash);
    }
    assert!(entries.iter().all(|e| e.actor_id == "dr-cuddy"));

    let report = verify_sink(&sink).await.unwrap();
    assert!(report.is_valid());
    assert_eq!(report.entries, 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_pipelines_keep_one_chain() {
    let temp = TempDir::new().unwrap();
    let audit_path = temp.path().join("audit.jsonl");

    // Three independent writers appending to one log at the same time
    tokio::join!(
        run_once(&audit_path),
        run_once(&audit_path),
        run_once(&audit_path)
    );

    let entries = JsonlAuditSink::new(&audit_path).entries().await.unwrap();
    assert_eq!(entries.len(), 12);
    for pair in entries.windows(2) {
        assert_eq!(pair[1].previous_hash, pair[0].hash);
    }

    let report = verify_sink(&JsonlAuditSink::new(&audit_path)).await.unwrap();
    assert!(report.is_valid(), "chain broken at {:?}", report.broken_at);
}

#[tokio::test]
async fn test_edited_entry_breaks_chain() {
    let temp = TempDir::new().unwrap();
    let audit_path = temp.path().join("audit.jsonl");
    run_once(&audit_path).await;

    let content = std::fs::read_to_string(&audit_path).unwrap();
    let mut lines: Vec<serde_json::Value> = content
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), 4);

    // Rewrite who ran the governance stage, keeping the stored hash
    let tampered_id = lines[1]["id"].as_str().unwrap().to_string();
    lines[1]["actorId"] = serde_json::json!("someone-else");

    let rewritten: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
    std::fs::write(&audit_path, rewritten.join("\n") + "\n").unwrap();

    let report = verify_sink(&JsonlAuditSink::new(&audit_path)).await.unwrap();
    assert!(!report.is_valid());
    assert_eq!(report.broken_at, Some((1, tampered_id)));
}

#[tokio::test]
async fn test_truncated_chain_head_is_detected() {
    let temp = TempDir::new().unwrap();
    let audit_path = temp.path().join("audit.jsonl");
    run_once(&audit_path).await;

    // Dropping the first entry leaves the new head pointing at a missing link
    let content = std::fs::read_to_string(&audit_path).unwrap();
    let remaining: Vec<&str> = content.lines().skip(1).collect();
    std::fs::write(&audit_path, remaining.join("\n") + "\n").unwrap();

    let report = verify_sink(&JsonlAuditSink::new(&audit_path)).await.unwrap();
    assert!(!report.is_valid());
    assert_eq!(report.broken_at.map(|(index, _)| index), Some(0));
}
