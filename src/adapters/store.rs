//! Document store collaborator.
//!
//! Records are JSON objects grouped into named collections. Every stored
//! record carries its own `id` and an `updatedAt` stamp written by `put`.
//! Writes are whole-record (last write wins); there are no transactions.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::fs;
use tokio::sync::RwLock;

/// Collection holding generated artifacts
pub const ARTIFACTS: &str = "protocols";

/// Collection holding stock records used by availability lookups
pub const STOCK: &str = "stock";

/// Equality filter on a top-level field
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    fn matches(&self, record: &Value) -> bool {
        record.get(&self.field) == Some(&self.value)
    }
}

/// Persistent storage for records
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Write a record, replacing it unless `merge` is set
    async fn put(&self, collection: &str, id: &str, record: Value, merge: bool) -> Result<()>;

    /// Read a record by id
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>>;

    /// All records of a collection matching every filter, ordered by id
    async fn query(&self, collection: &str, filters: &[Filter]) -> Result<Vec<Value>>;
}

/// Shallow-merge `incoming` over `existing` (when merging) and stamp id/updatedAt
fn prepare_record(id: &str, existing: Option<Value>, incoming: Value, merge: bool) -> Result<Value> {
    let Value::Object(incoming) = incoming else {
        anyhow::bail!("Record '{}' must be a JSON object", id);
    };

    let mut record = match existing {
        Some(Value::Object(existing)) if merge => existing,
        _ => serde_json::Map::new(),
    };
    record.extend(incoming);
    record.insert("id".to_string(), Value::String(id.to_string()));
    record.insert(
        "updatedAt".to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );

    Ok(Value::Object(record))
}

/// Reject ids that could escape the collection directory
fn validate_key(kind: &str, key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));

    if !valid {
        anyhow::bail!("Invalid {} name: '{}'", kind, key);
    }
    Ok(())
}

/// File-backed store: `<root>/<collection>/<id>.json`
pub struct FileDocumentStore {
    root: PathBuf,
}

impl FileDocumentStore {
    /// Open a store rooted at `root`, creating the directory
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .with_context(|| format!("Failed to create store directory: {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, collection: &str, id: &str) -> Result<PathBuf> {
        validate_key("collection", collection)?;
        validate_key("record id", id)?;
        Ok(self.root.join(collection).join(format!("{}.json", id)))
    }

    async fn read_record(path: &Path) -> Result<Option<Value>> {
        if !fs::try_exists(path).await.unwrap_or(false) {
            return Ok(None);
        }

        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read record: {}", path.display()))?;
        let value = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse record: {}", path.display()))?;
        Ok(Some(value))
    }
}

#[async_trait]
impl DocumentStore for FileDocumentStore {
    async fn put(&self, collection: &str, id: &str, record: Value, merge: bool) -> Result<()> {
        let path = self.record_path(collection, id)?;
        let existing = if merge {
            Self::read_record(&path).await?
        } else {
            None
        };
        let record = prepare_record(id, existing, record, merge)?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create collection: {}", dir.display()))?;
        }

        // Write-then-rename so readers never observe a partial record
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(&record).context("Failed to serialize record")?;
        fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write record: {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to commit record: {}", path.display()))?;

        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        let path = self.record_path(collection, id)?;
        Self::read_record(&path).await
    }

    async fn query(&self, collection: &str, filters: &[Filter]) -> Result<Vec<Value>> {
        validate_key("collection", collection)?;
        let dir = self.root.join(collection);

        if !fs::try_exists(&dir).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut records = Vec::new();
        for path in paths {
            if let Some(record) = Self::read_record(&path).await? {
                if filters.iter().all(|f| f.matches(&record)) {
                    records.push(record);
                }
            }
        }

        Ok(records)
    }
}

/// In-memory store for tests and ephemeral runs
#[derive(Default)]
pub struct MemoryDocumentStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Value>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records in a collection
    pub async fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|c| c.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn put(&self, collection: &str, id: &str, record: Value, merge: bool) -> Result<()> {
        let mut collections = self.collections.write().await;
        let records = collections.entry(collection.to_string()).or_default();
        let existing = records.get(id).cloned();
        let record = prepare_record(id, existing, record, merge)?;
        records.insert(id.to_string(), record);
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .and_then(|c| c.get(id))
            .cloned())
    }

    async fn query(&self, collection: &str, filters: &[Filter]) -> Result<Vec<Value>> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .map(|c| {
                c.values()
                    .filter(|r| filters.iter().all(|f| f.matches(r)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
