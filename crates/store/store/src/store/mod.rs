//! Event store - persistence layer for the append-only log.
//!
//! Provides:
//! - Atomic append with store-assigned ingestion order
//! - Indexed retrieval through the typed query filters
//! - Cursor-ordered reads and tail notifications for replay

mod memory;
mod trait_def;

pub use memory::MemoryEventStore;
pub use trait_def::{AppendOutcome, EventStore, EventStoreConfig, StoreStats, StoredEvent};
