//! # Eventlog Store
//!
//! Event store and replay engine for an event bus:
//! - Durable, atomic append with store-assigned ingestion order
//! - Composite, covering, recent-window, and payload indexes behind a
//!   deterministic read-side selector
//! - Typed query filters with bounded-backoff read retries
//! - Cursor-based replay: bounded slices or a live tail that suspends
//!   between appends and cancels cooperatively
//!
//! Payloads are opaque structured documents; the store never inspects
//! their semantics. Delivery to replay consumers is at-least-once
//! across cursor restarts, so consumers must be idempotent.
//!
//! ## Example
//!
//! ```rust,ignore
//! use eventlog_store::{Event, EventFilter, MemoryEventStore, QueryEngine};
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryEventStore::new());
//! store.append(Event::new("click", serde_json::json!({"page": "home"}))).await?;
//!
//! let engine = QueryEngine::new(store);
//! let clicks = engine.query(EventFilter::ByType {
//!     event_type: "click".into(),
//!     range: None,
//! }).await?;
//! ```

mod clock;
mod cursor;
mod error;
mod event;
pub mod index;
mod query;
pub mod replay;
pub mod store;

pub use clock::{IngestionClock, ManualClock, SystemClock, Tick};
pub use cursor::Cursor;
pub use error::{StoreError, StoreResult};
pub use event::{Event, EventId};
pub use index::{IndexChoice, IndexManager, QueryShape};
pub use query::{EventFilter, QueryEngine, QueryOptions, RetryPolicy};
pub use replay::{ReplayConfig, ReplayEngine, ReplayHandle, ReplayRange, ReplayStream};
pub use store::{
    AppendOutcome, EventStore, EventStoreConfig, MemoryEventStore, StoreStats, StoredEvent,
};
