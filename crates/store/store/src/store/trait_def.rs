use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::cursor::Cursor;
use crate::error::StoreResult;
use crate::event::{Event, EventId};
use crate::index;
use crate::query::{EventFilter, QueryOptions};

/// Trait for the durable event log.
///
/// Implementations provide an append-only store with:
/// - Atomic append: the event row and every derived index entry become
///   visible together, or not at all
/// - Store-assigned ingestion order (`created_at` + sequence), the
///   canonical replay order
/// - Indexed point, time-range, type, and payload queries
/// - Tail notifications so open-ended replays can suspend instead of
///   polling
///
/// The logical schema a persistent backend would create is
/// `events(event_id PK, timestamp, event_type, payload, created_at)`
/// plus the composite, covering, recent-window, and payload indexes;
/// index creation must be idempotent.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends one event atomically.
    ///
    /// Fails with `DuplicateEvent` if the event's ID already exists;
    /// existing data is never altered. Never retried internally - a
    /// blind retry of a failed append without a caller-supplied ID
    /// could create duplicates.
    async fn append(&self, event: Event) -> StoreResult<AppendOutcome>;

    /// Appends a batch atomically, in order.
    ///
    /// All-or-nothing: a duplicate ID anywhere in the batch fails the
    /// whole batch before any mutation.
    async fn append_batch(&self, events: Vec<Event>) -> StoreResult<Vec<AppendOutcome>>;

    /// Point lookup by event ID.
    async fn get(&self, event_id: &EventId) -> StoreResult<Option<StoredEvent>>;

    /// Runs a typed filter against the index structures.
    ///
    /// Read-only; bounds validation happens in the query engine before
    /// this is called.
    async fn query(&self, filter: &EventFilter, options: &QueryOptions)
        -> StoreResult<Vec<StoredEvent>>;

    /// Reads up to `limit` events in ingestion order, strictly after
    /// `after`, at most up to and including `until`.
    async fn read_after(
        &self,
        after: Option<Cursor>,
        until: Option<Cursor>,
        limit: usize,
    ) -> StoreResult<Vec<StoredEvent>>;

    /// Subscribes to tail notifications.
    ///
    /// A notification carries the cursor of a newly committed event.
    /// Receivers may lag and miss notifications; consumers are expected
    /// to catch up from their own cursor via [`EventStore::read_after`].
    fn subscribe_tail(&self) -> broadcast::Receiver<Cursor>;

    /// Observability counters.
    async fn stats(&self) -> StoreStats;
}

/// An event as committed to the log, with store-assigned ordering.
///
/// This is the record both Query and Replay return to consumers:
/// the producer fields byte-for-byte plus the ingestion metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Unique identifier, immutable for the lifetime of the store.
    pub event_id: EventId,
    /// Producer discriminator.
    pub event_type: String,
    /// Producer occurrence time (not globally ordered).
    pub timestamp: DateTime<Utc>,
    /// Opaque payload, returned exactly as appended.
    pub payload: Value,
    /// Store ingestion time; with `sequence`, the canonical order.
    pub created_at: DateTime<Utc>,
    /// Strictly-increasing append sequence.
    pub sequence: u64,
}

impl StoredEvent {
    /// The resumable position of this event in the log.
    pub fn cursor(&self) -> Cursor {
        Cursor::new(self.created_at.timestamp_micros(), self.sequence)
    }
}

/// Result of a successful append.
#[derive(Debug, Clone, Copy)]
pub struct AppendOutcome {
    /// The ID under which the event was committed.
    pub event_id: EventId,
    /// The event's position in ingestion order.
    pub cursor: Cursor,
    /// Store-assigned ingestion time.
    pub created_at: DateTime<Utc>,
}

/// Point-in-time store counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreStats {
    /// Process-wide count of successfully appended events.
    pub appended_total: u64,
    /// Events currently in the log.
    pub events: usize,
    /// Entries currently held by the recent-window structure.
    pub recent_window: usize,
}

/// Configuration for an event store instance.
#[derive(Debug, Clone)]
pub struct EventStoreConfig {
    /// Retention horizon for the recent-window index structure.
    pub recent_window: chrono::Duration,
    /// Capacity of the tail-notification broadcast channel.
    pub notify_capacity: usize,
}

impl Default for EventStoreConfig {
    fn default() -> Self {
        Self {
            recent_window: index::default_recent_window(),
            notify_capacity: 64,
        }
    }
}

impl EventStoreConfig {
    /// Config with a custom recent-window horizon.
    pub fn with_recent_window(recent_window: chrono::Duration) -> Self {
        Self {
            recent_window,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_stored_event_cursor_tracks_ingestion_order() {
        let make = |created_secs: i64, sequence: u64| StoredEvent {
            event_id: uuid::Uuid::new_v4(),
            event_type: "click".to_string(),
            timestamp: Utc::now(),
            payload: Value::Null,
            created_at: Utc.timestamp_opt(created_secs, 0).unwrap(),
            sequence,
        };

        let a = make(100, 0);
        let b = make(100, 1);
        let c = make(101, 2);

        assert!(a.cursor() < b.cursor());
        assert!(b.cursor() < c.cursor());
    }

    #[test]
    fn test_default_config() {
        let config = EventStoreConfig::default();
        assert_eq!(config.recent_window, chrono::Duration::days(7));
        assert_eq!(config.notify_capacity, 64);
    }
}
