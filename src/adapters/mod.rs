//! Adapter interfaces for external collaborators.
//!
//! - `store`: document store (file-backed and in-memory)
//! - `text`: generative-text service
//! - `stock`: availability lookups for referenced medications

pub mod stock;
pub mod store;
pub mod text;

pub use stock::{AvailabilityLookup, DeclaredAvailability, StoreAvailability};
pub use store::{DocumentStore, FileDocumentStore, Filter, MemoryDocumentStore, ARTIFACTS, STOCK};
pub use text::{HttpTextGenerator, PromptPurpose, PromptSpec, TextGenerator};
