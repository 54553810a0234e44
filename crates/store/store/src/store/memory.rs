use std::collections::{BTreeMap, HashSet};
use std::ops::Bound::{Excluded, Unbounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast};

use super::trait_def::{AppendOutcome, EventStore, EventStoreConfig, StoreStats, StoredEvent};
use crate::clock::{IngestionClock, SystemClock};
use crate::cursor::Cursor;
use crate::error::{StoreError, StoreResult};
use crate::event::{Event, EventId};
use crate::index::{self, IndexChoice, IndexManager, QueryShape};
use crate::query::{EventFilter, QueryOptions};

/// In-memory implementation of [`EventStore`].
///
/// The log and every index structure live behind one write lock, which
/// is the atomic append boundary: no reader ever observes an event
/// without its index entries or vice versa. Readers share the read
/// lock and never contend with each other.
pub struct MemoryEventStore {
    inner: Arc<RwLock<Inner>>,
    clock: Arc<dyn IngestionClock>,
    /// Tail notifications: the cursor of each committed event.
    notify_tx: broadcast::Sender<Cursor>,
    appended_total: AtomicU64,
}

/// Log plus derived indexes, mutated only under the write lock.
struct Inner {
    /// The committed log, keyed by append sequence.
    ///
    /// Sequence order equals `(created_at, sequence)` order for events
    /// issued by one clock, so this map doubles as the replay scan.
    log: BTreeMap<u64, StoredEvent>,
    index: IndexManager,
}

impl MemoryEventStore {
    /// Creates a store with the default config and wall-clock sequencer.
    pub fn new() -> Self {
        Self::with_config(EventStoreConfig::default())
    }

    /// Creates a store with a custom config.
    pub fn with_config(config: EventStoreConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    /// Creates a store with an injected ingestion clock.
    ///
    /// Tests substitute a deterministic clock here.
    pub fn with_clock(config: EventStoreConfig, clock: Arc<dyn IngestionClock>) -> Self {
        let (notify_tx, _) = broadcast::channel(config.notify_capacity);
        Self {
            inner: Arc::new(RwLock::new(Inner {
                log: BTreeMap::new(),
                index: IndexManager::new(config.recent_window),
            })),
            clock,
            notify_tx,
            appended_total: AtomicU64::new(0),
        }
    }

    fn commit(&self, inner: &mut Inner, event: Event) -> AppendOutcome {
        let tick = self.clock.tick();
        let stored = StoredEvent {
            event_id: event.event_id,
            event_type: event.event_type,
            timestamp: event.timestamp,
            payload: event.payload,
            created_at: tick.created_at,
            sequence: tick.sequence,
        };
        let outcome = AppendOutcome {
            event_id: stored.event_id,
            cursor: stored.cursor(),
            created_at: stored.created_at,
        };

        inner.index.insert(&stored);
        inner.log.insert(stored.sequence, stored);
        outcome
    }

    fn rows(inner: &Inner, sequences: &[u64]) -> Vec<StoredEvent> {
        sequences
            .iter()
            .filter_map(|seq| inner.log.get(seq).cloned())
            .collect()
    }

    fn paginate(mut events: Vec<StoredEvent>, options: &QueryOptions) -> Vec<StoredEvent> {
        if let Some(offset) = options.offset {
            events = events.into_iter().skip(offset).collect();
        }
        if let Some(limit) = options.limit {
            events.truncate(limit);
        }
        events
    }
}

impl Default for MemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn append(&self, event: Event) -> StoreResult<AppendOutcome> {
        let mut inner = self.inner.write().await;

        if inner.index.contains(&event.event_id) {
            return Err(StoreError::DuplicateEvent {
                event_id: event.event_id,
            });
        }

        let outcome = self.commit(&mut inner, event);
        drop(inner);

        self.appended_total.fetch_add(1, Ordering::Relaxed);
        // Lagging receivers catch up from their own cursor.
        let _ = self.notify_tx.send(outcome.cursor);

        tracing::debug!(
            event_id = %outcome.event_id,
            cursor = %outcome.cursor,
            "appended event"
        );

        Ok(outcome)
    }

    async fn append_batch(&self, events: Vec<Event>) -> StoreResult<Vec<AppendOutcome>> {
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let mut inner = self.inner.write().await;

        // All-or-nothing: validate every ID before the first mutation.
        let mut batch_ids = HashSet::new();
        for event in &events {
            if inner.index.contains(&event.event_id) || !batch_ids.insert(event.event_id) {
                return Err(StoreError::DuplicateEvent {
                    event_id: event.event_id,
                });
            }
        }

        let outcomes: Vec<AppendOutcome> = events
            .into_iter()
            .map(|event| self.commit(&mut inner, event))
            .collect();
        drop(inner);

        self.appended_total
            .fetch_add(outcomes.len() as u64, Ordering::Relaxed);
        for outcome in &outcomes {
            let _ = self.notify_tx.send(outcome.cursor);
        }

        Ok(outcomes)
    }

    async fn get(&self, event_id: &EventId) -> StoreResult<Option<StoredEvent>> {
        let inner = self.inner.read().await;
        Ok(inner
            .index
            .lookup(event_id)
            .and_then(|seq| inner.log.get(&seq).cloned()))
    }

    async fn query(
        &self,
        filter: &EventFilter,
        options: &QueryOptions,
    ) -> StoreResult<Vec<StoredEvent>> {
        let inner = self.inner.read().await;

        let events = match index::select(&filter.shape()) {
            IndexChoice::PointLookup => {
                let EventFilter::ById(event_id) = filter else {
                    unreachable!("point lookup only selected for ById");
                };
                inner
                    .index
                    .lookup(event_id)
                    .and_then(|seq| inner.log.get(&seq).cloned())
                    .into_iter()
                    .collect()
            }
            IndexChoice::TimeComposite => {
                let EventFilter::ByTimeRange { start, end } = filter else {
                    unreachable!("time composite only selected for ByTimeRange");
                };
                Self::rows(&inner, &inner.index.time_range(*start, *end))
            }
            IndexChoice::TypeComposite => {
                let EventFilter::ByType { event_type, range } = filter else {
                    unreachable!("type composite only selected for ByType");
                };
                Self::rows(&inner, &inner.index.type_range(event_type, *range))
            }
            IndexChoice::PayloadInverted => {
                let EventFilter::ByPayloadField { key, value } = filter else {
                    unreachable!("inverted index only selected for ByPayloadField");
                };
                inner
                    .index
                    .payload_matches(key, value)
                    .iter()
                    .filter_map(|id| {
                        inner
                            .index
                            .lookup(id)
                            .and_then(|seq| inner.log.get(&seq).cloned())
                    })
                    .collect()
            }
            IndexChoice::RecentWindow | IndexChoice::FullScan => {
                unreachable!("replay slices do not arrive via query filters")
            }
        };

        Ok(Self::paginate(events, options))
    }

    async fn read_after(
        &self,
        after: Option<Cursor>,
        until: Option<Cursor>,
        limit: usize,
    ) -> StoreResult<Vec<StoredEvent>> {
        let inner = self.inner.read().await;

        // Only a lower-bounded slice can live inside the recent window;
        // matching on the cursor keeps the bound in scope for the scan.
        let choice = after.map(|cursor| {
            let shape = QueryShape::ReplaySlice {
                within_recent_window: inner.index.covers_recent(cursor, chrono::Utc::now()),
            };
            (index::select(&shape), cursor)
        });

        let events: Vec<StoredEvent> = match choice {
            Some((IndexChoice::RecentWindow, after)) => {
                inner
                    .index
                    .recent_after(after)
                    .into_iter()
                    .filter_map(|seq| inner.log.get(&seq).cloned())
                    .filter(|e| until.is_none_or(|until| e.cursor() <= until))
                    .take(limit)
                    .collect()
            }
            _ => {
                let lower = match after {
                    Some(cursor) => Excluded(cursor.sequence()),
                    None => Unbounded,
                };
                inner
                    .log
                    .range((lower, Unbounded))
                    .map(|(_, e)| e)
                    .filter(|e| after.is_none_or(|after| e.cursor() > after))
                    .take_while(|e| until.is_none_or(|until| e.cursor() <= until))
                    .take(limit)
                    .cloned()
                    .collect()
            }
        };

        Ok(events)
    }

    fn subscribe_tail(&self) -> broadcast::Receiver<Cursor> {
        self.notify_tx.subscribe()
    }

    async fn stats(&self) -> StoreStats {
        let inner = self.inner.read().await;
        StoreStats {
            appended_total: self.appended_total.load(Ordering::Relaxed),
            events: inner.log.len(),
            recent_window: inner.index.recent_len(),
        }
    }
}
