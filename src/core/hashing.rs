//! Canonical hashing and hash-chain verification.
//!
//! Values are serialized to JSON with every object's keys sorted recursively
//! (arrays keep their order), then digested with SHA-256. Equal logical values
//! hash identically regardless of the order their maps were built in.
//!
//! Audit entries form a chain: each entry's hash covers the entry itself plus
//! the stored hash of its predecessor. The first entry links to
//! [`CHAIN_SENTINEL`].

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::error;

/// Previous-hash value of the first entry in a chain
pub const CHAIN_SENTINEL: &str = "0";

#[derive(Debug, Error)]
pub enum HashError {
    #[error("Failed to serialize value for hashing: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Something that can sit in a hash chain
pub trait ChainLink: Serialize {
    /// Identifier reported when the chain breaks at this link
    fn link_id(&self) -> &str;

    /// The hash stored on this link
    fn stored_hash(&self) -> &str;
}

/// Serialize a JSON value with recursively sorted object keys
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// SHA-256 (hex) of the canonical form of a JSON value
pub fn canonical_hash_value(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(value).as_bytes());
    hex::encode(hasher.finalize())
}

/// SHA-256 (hex) of the canonical form of any serializable value
pub fn canonical_hash<T: Serialize + ?Sized>(value: &T) -> Result<String, HashError> {
    let value = serde_json::to_value(value)?;
    Ok(canonical_hash_value(&value))
}

/// Recompute a value's digest and compare it to `expected`
pub fn verify_hash<T: Serialize + ?Sized>(value: &T, expected: &str) -> bool {
    canonical_hash(value)
        .map(|actual| actual == expected)
        .unwrap_or(false)
}

/// Digest of an entry linked to `previous_hash`.
///
/// Any `hash` field on the entry is ignored; `previousHash` is overwritten
/// with the given value so a chain can be re-walked from stored hashes.
pub fn chain_hash<T: Serialize + ?Sized>(entry: &T, previous_hash: &str) -> Result<String, HashError> {
    let mut value = serde_json::to_value(entry)?;
    match value.as_object_mut() {
        Some(object) => {
            object.remove("hash");
            object.insert(
                "previousHash".to_string(),
                Value::String(previous_hash.to_string()),
            );
        }
        None => {
            value = serde_json::json!({ "value": value, "previousHash": previous_hash });
        }
    }
    Ok(canonical_hash_value(&value))
}

/// Index of the first entry whose stored hash does not match its recomputation
pub fn find_chain_break<T: ChainLink>(entries: &[T]) -> Option<usize> {
    let mut previous = CHAIN_SENTINEL;

    for (index, entry) in entries.iter().enumerate() {
        match chain_hash(entry, previous) {
            Ok(expected) if expected == entry.stored_hash() => {}
            _ => return Some(index),
        }
        previous = entry.stored_hash();
    }

    None
}

/// Walk the chain from the sentinel; false at the first broken link.
///
/// An empty chain is valid. The broken position is reported through the log.
pub fn verify_chain<T: ChainLink>(entries: &[T]) -> bool {
    match find_chain_break(entries) {
        None => true,
        Some(index) => {
            error!(
                index,
                entry_id = entries[index].link_id(),
                "Audit chain broken"
            );
            false
        }
    }
}
