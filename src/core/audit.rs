//! Append-only, hash-chained audit trail.
//!
//! Stage runs are handed to a dedicated writer task over a channel. The writer
//! turns each into an [`AuditDraft`]; the sink links the draft to its current
//! chain head and appends it in one step, so writers sharing a log never fork
//! the chain. Sink failures are logged and dropped: a pipeline never fails
//! because its audit trail could not be written.
//!
//! Entries are stored as newline-delimited JSON (JSONL).

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use fs2::FileExt;
use serde::Serialize;
use tokio::fs::{self, File};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::hashing::{find_chain_break, CHAIN_SENTINEL};
use crate::domain::{AuditEntry, AuditResult, StageRun};
use crate::error::AuditError;

/// An audit entry that is not yet linked into a chain
#[derive(Debug, Clone)]
pub struct AuditDraft {
    pub stage_name: String,
    pub actor_id: String,
    pub result: AuditResult,
    pub details: serde_json::Value,
}

impl AuditDraft {
    /// Seal the draft as the successor of `previous_hash`
    pub fn link(self, previous_hash: &str) -> Result<AuditEntry, AuditError> {
        Ok(AuditEntry::chained(
            self.stage_name,
            self.actor_id,
            self.result,
            self.details,
            previous_hash,
        )?)
    }
}

/// Destination for audit entries
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Link `draft` to the stored chain head and append it.
    ///
    /// Reading the head and writing the entry must be one atomic step with
    /// respect to every other writer of the same chain.
    async fn append(&self, draft: AuditDraft) -> Result<AuditEntry, AuditError>;

    /// All entries in insertion order
    async fn entries(&self) -> Result<Vec<AuditEntry>, AuditError>;
}

/// JSONL file sink, locked per append so concurrent processes interleave whole lines
pub struct JsonlAuditSink {
    path: PathBuf,
}

impl JsonlAuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Sink at the configured audit log path
    pub fn open_default() -> anyhow::Result<Self> {
        Ok(Self::new(crate::config::audit_log_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn append(&self, draft: AuditDraft) -> Result<AuditEntry, AuditError> {
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || -> Result<AuditEntry, AuditError> {
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .read(true)
                .append(true)
                .open(&path)?;

            // The head is read under the same lock as the write
            file.lock_exclusive()?;
            let previous = read_chain_head(&file)?;
            let entry = draft.link(&previous)?;

            writeln!(file, "{}", serde_json::to_string(&entry)?)?;
            file.flush()?;

            // Lock is released when file is dropped
            Ok(entry)
        })
        .await
        .map_err(|e| AuditError::Unavailable(e.to_string()))?
    }

    async fn entries(&self) -> Result<Vec<AuditEntry>, AuditError> {
        if !fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path).await?;
        let mut lines = BufReader::new(file).lines();
        let mut entries = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(&line)?);
        }

        Ok(entries)
    }
}

/// Hash of the last stored entry, or the sentinel for an empty log
fn read_chain_head(file: &std::fs::File) -> Result<String, AuditError> {
    use std::io::BufRead;

    let mut last = None;
    for line in std::io::BufReader::new(file).lines() {
        let line = line?;
        if !line.trim().is_empty() {
            last = Some(line);
        }
    }

    match last {
        Some(line) => {
            let value: serde_json::Value = serde_json::from_str(&line)?;
            value
                .get("hash")
                .and_then(|h| h.as_str())
                .map(str::to_string)
                .ok_or_else(|| AuditError::Unavailable("last audit entry has no hash".to_string()))
        }
        None => Ok(CHAIN_SENTINEL.to_string()),
    }
}

/// In-memory sink for tests
#[derive(Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, draft: AuditDraft) -> Result<AuditEntry, AuditError> {
        let mut entries = self.entries.lock().await;
        let previous = entries.last().map_or(CHAIN_SENTINEL, |e| e.hash.as_str());
        let entry = draft.link(previous)?;
        entries.push(entry.clone());
        Ok(entry)
    }

    async fn entries(&self) -> Result<Vec<AuditEntry>, AuditError> {
        Ok(self.entries.lock().await.clone())
    }
}

/// A finished stage run on its way to the audit trail
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub run: StageRun,
    pub actor_id: String,
    pub result: AuditResult,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AuditDetails<'a> {
    action: String,
    run_id: String,
    input: &'a serde_json::Value,
    output: &'a Option<serde_json::Value>,
    error: &'a Option<String>,
    execution_time: Option<u64>,
}

impl AuditRecord {
    fn draft(&self) -> Result<AuditDraft, AuditError> {
        let details = AuditDetails {
            action: format!("{} execution", self.run.stage_name),
            run_id: self.run.id.to_string(),
            input: &self.run.input_snapshot,
            output: &self.run.output_snapshot,
            error: &self.run.error_message,
            execution_time: self.run.duration_ms,
        };
        Ok(AuditDraft {
            stage_name: self.run.stage_name.clone(),
            actor_id: self.actor_id.clone(),
            result: self.result,
            details: serde_json::to_value(details)?,
        })
    }
}

struct AuditRequest {
    record: AuditRecord,
    done: oneshot::Sender<()>,
}

/// Cheap, cloneable handle to the audit writer task
#[derive(Clone)]
pub struct AuditHandle {
    tx: mpsc::UnboundedSender<AuditRequest>,
}

impl AuditHandle {
    /// Start a writer task for `sink`.
    ///
    /// The task ends once every handle has been dropped.
    pub fn spawn(sink: Arc<dyn AuditSink>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_writer(sink, rx));
        (Self { tx }, task)
    }

    /// Submit a record and wait until the write attempt has finished.
    ///
    /// Never fails: a closed writer or a failed write is only logged.
    pub async fn record(&self, record: AuditRecord) {
        let (done, wait) = oneshot::channel();
        let stage = record.run.stage_name.clone();

        if self.tx.send(AuditRequest { record, done }).is_err() {
            warn!(%stage, "Audit writer is not running; audit record dropped");
            return;
        }

        let _ = wait.await;
    }
}

async fn run_writer(sink: Arc<dyn AuditSink>, mut rx: mpsc::UnboundedReceiver<AuditRequest>) {
    while let Some(AuditRequest { record, done }) = rx.recv().await {
        match write_entry(sink.as_ref(), &record).await {
            Ok(entry) => {
                debug!(stage = %record.run.stage_name, hash = %entry.hash, "Audit entry written");
            }
            Err(e) => {
                warn!(
                    stage = %record.run.stage_name,
                    run_id = %record.run.id,
                    error = %e,
                    "Failed to write audit entry"
                );
            }
        }
        let _ = done.send(());
    }

    debug!("Audit writer stopped");
}

async fn write_entry(sink: &dyn AuditSink, record: &AuditRecord) -> Result<AuditEntry, AuditError> {
    sink.append(record.draft()?).await
}

/// Result of walking a stored audit chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainReport {
    pub entries: usize,

    /// Index and id of the first entry that fails verification
    pub broken_at: Option<(usize, String)>,
}

impl ChainReport {
    pub fn is_valid(&self) -> bool {
        self.broken_at.is_none()
    }
}

/// Load every entry from a sink and verify the chain
pub async fn verify_sink(sink: &dyn AuditSink) -> Result<ChainReport, AuditError> {
    let entries = sink.entries().await?;
    let broken_at = find_chain_break(&entries).map(|i| (i, entries[i].id.clone()));

    if let Some((index, id)) = &broken_at {
        warn!(index, entry_id = %id, "Audit chain broken");
    }

    Ok(ChainReport {
        entries: entries.len(),
        broken_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hashing::verify_chain;
    use crate::domain::StageKind;
    use tempfile::TempDir;

    fn record(stage: StageKind) -> AuditRecord {
        let run = StageRun::start(stage, serde_json::json!({ "objective": "x" }))
            .succeed(serde_json::json!({ "ok": true }), 3);
        AuditRecord {
            run,
            actor_id: "tester".to_string(),
            result: AuditResult::Success,
        }
    }

    /// Sink that rejects every write
    struct BrokenSink;

    #[async_trait]
    impl AuditSink for BrokenSink {
        async fn append(&self, _draft: AuditDraft) -> Result<AuditEntry, AuditError> {
            Err(AuditError::Unavailable("disk on fire".to_string()))
        }

        async fn entries(&self) -> Result<Vec<AuditEntry>, AuditError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_writer_builds_valid_chain() {
        let sink = Arc::new(MemoryAuditSink::new());
        let (handle, _task) = AuditHandle::spawn(sink.clone());

        for stage in StageKind::ALL {
            handle.record(record(stage)).await;
        }

        let entries = sink.entries().await.unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].previous_hash, CHAIN_SENTINEL);
        assert_eq!(entries[1].previous_hash, entries[0].hash);
        assert_eq!(entries[0].details["action"], "generator execution");
        assert!(verify_chain(&entries));
    }

    #[tokio::test]
    async fn test_write_failures_are_swallowed() {
        let (handle, _task) = AuditHandle::spawn(Arc::new(BrokenSink));
        // Returns normally even though every append fails
        handle.record(record(StageKind::Generator)).await;
    }

    #[tokio::test]
    async fn test_jsonl_chain_survives_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("audit.jsonl");

        {
            let sink = Arc::new(JsonlAuditSink::new(&path));
            let (handle, task) = AuditHandle::spawn(sink);
            handle.record(record(StageKind::Generator)).await;
            drop(handle);
            task.await.unwrap();
        }

        let sink = Arc::new(JsonlAuditSink::new(&path));
        let (handle, _task) = AuditHandle::spawn(sink.clone());
        handle.record(record(StageKind::Governance)).await;

        let report = verify_sink(sink.as_ref()).await.unwrap();
        assert_eq!(report.entries, 2);
        assert!(report.is_valid());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_writers_share_one_chain() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("audit.jsonl");

        let (first, _a) = AuditHandle::spawn(Arc::new(JsonlAuditSink::new(&path)));
        let (second, _b) = AuditHandle::spawn(Arc::new(JsonlAuditSink::new(&path)));

        let write_all = |handle: AuditHandle| async move {
            for _ in 0..10 {
                for stage in StageKind::ALL {
                    handle.record(record(stage)).await;
                }
            }
        };
        tokio::join!(write_all(first), write_all(second));

        let report = verify_sink(&JsonlAuditSink::new(&path)).await.unwrap();
        assert_eq!(report.entries, 80);
        assert!(report.is_valid(), "chain broken at {:?}", report.broken_at);
    }

    #[tokio::test]
    async fn test_memory_sink_links_to_its_head() {
        let sink = MemoryAuditSink::new();
        let draft = record(StageKind::Generator).draft().unwrap();

        let first = sink.append(draft.clone()).await.unwrap();
        let second = sink.append(draft).await.unwrap();

        assert_eq!(first.previous_hash, CHAIN_SENTINEL);
        assert_eq!(second.previous_hash, first.hash);
    }

    #[tokio::test]
    async fn test_verify_sink_reports_tampered_entry() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("audit.jsonl");
        let sink = Arc::new(JsonlAuditSink::new(&path));
        let (handle, _task) = AuditHandle::spawn(sink.clone());

        for stage in StageKind::ALL {
            handle.record(record(stage)).await;
        }

        let mut entries = sink.entries().await.unwrap();
        entries[2].details["executionTime"] = serde_json::json!(9999);
        let rewritten: String = entries
            .iter()
            .map(|e| format!("{}\n", serde_json::to_string(e).unwrap()))
            .collect();
        std::fs::write(&path, rewritten).unwrap();

        let report = verify_sink(sink.as_ref()).await.unwrap();
        assert_eq!(report.entries, 4);
        assert_eq!(report.broken_at.map(|(i, _)| i), Some(2));
    }
}
