//! Availability lookups for referenced medications.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use super::store::{DocumentStore, STOCK};
use crate::domain::Medication;

/// Answers whether a referenced item is currently available
#[async_trait]
pub trait AvailabilityLookup: Send + Sync {
    async fn is_available(&self, medication: &Medication) -> Result<bool>;
}

/// Trusts the availability flag declared on the item
#[derive(Debug, Default, Clone, Copy)]
pub struct DeclaredAvailability;

#[async_trait]
impl AvailabilityLookup for DeclaredAvailability {
    async fn is_available(&self, medication: &Medication) -> Result<bool> {
        Ok(medication.in_stock)
    }
}

/// Reads stock records keyed by normalized item name.
///
/// A record is available when `quantity > 0` and its status is not
/// `out_of_stock`/`expired`. Items without a record fall back to the
/// declared flag.
pub struct StoreAvailability {
    store: Arc<dyn DocumentStore>,
}

impl StoreAvailability {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Stock record id for an item name: lowercase, spaces to dashes
    pub fn stock_key(name: &str) -> String {
        name.trim()
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("-")
    }
}

#[async_trait]
impl AvailabilityLookup for StoreAvailability {
    async fn is_available(&self, medication: &Medication) -> Result<bool> {
        let key = Self::stock_key(&medication.name);
        let Some(record) = self.store.get(STOCK, &key).await? else {
            return Ok(medication.in_stock);
        };

        let quantity = record.get("quantity").and_then(|q| q.as_f64()).unwrap_or(0.0);
        let status = record.get("status").and_then(|s| s.as_str()).unwrap_or("in_stock");

        Ok(quantity > 0.0 && !matches!(status, "out_of_stock" | "expired"))
    }
}
