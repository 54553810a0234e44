//! # Eventlog Store SDK
//!
//! Integration helpers on top of `eventlog_store`:
//! - [`ProducerEventBuilder`] stamps out events with producer defaults
//! - [`EventConsumer`] + [`CursorStore`] implement the resumable,
//!   checkpoint-after-handle consumer loop
//!
//! ## Example
//!
//! ```rust,ignore
//! use eventlog_store_sdk::{resume_range, run_consumer, InMemoryCursorStore};
//!
//! let cursors = InMemoryCursorStore::new();
//! let range = resume_range(&cursors, "projector", None).await?;
//! run_consumer(engine.replay(range), &cursors, &projector).await?;
//! ```

mod builder;
mod traits;

pub use builder::ProducerEventBuilder;
pub use traits::{CursorStore, EventConsumer, InMemoryCursorStore, resume_range, run_consumer};
