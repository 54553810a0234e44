//! Query engine - typed filters over the indexed log.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::time::sleep;

use crate::error::{StoreError, StoreResult};
use crate::event::EventId;
use crate::index::QueryShape;
use crate::store::{EventStore, StoredEvent};

/// A typed query filter.
///
/// An explicit enumeration of the supported query shapes; the index
/// manager dispatches on the shape, never on runtime inspection of the
/// store contents.
#[derive(Debug, Clone)]
pub enum EventFilter {
    /// Zero or one event by ID.
    ById(EventId),
    /// All events with `timestamp` in `[start, end]`, ascending by
    /// timestamp, ties broken by event ID.
    ByTimeRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    /// All events of one type, ascending by timestamp, optionally
    /// restricted to a closed time range.
    ByType {
        event_type: String,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    },
    /// All events whose payload contains the given top-level key/value
    /// pair, in stable event-ID order.
    ByPayloadField { key: String, value: Value },
}

impl EventFilter {
    /// The query shape, for index selection.
    pub fn shape(&self) -> QueryShape {
        match self {
            EventFilter::ById(_) => QueryShape::Point,
            EventFilter::ByTimeRange { .. } => QueryShape::TimeRange,
            EventFilter::ByType { .. } => QueryShape::TypeFilter,
            EventFilter::ByPayloadField { .. } => QueryShape::PayloadField,
        }
    }

    /// Validates caller-supplied bounds.
    pub fn validate(&self) -> StoreResult<()> {
        let range = match self {
            EventFilter::ByTimeRange { start, end } => Some((*start, *end)),
            EventFilter::ByType { range, .. } => *range,
            _ => None,
        };

        if let Some((start, end)) = range {
            if start > end {
                return Err(StoreError::InvalidRange { start, end });
            }
        }

        Ok(())
    }
}

/// Pagination applied after ordering.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryOptions {
    /// Maximum number of events to return.
    pub limit: Option<usize>,
    /// Number of events to skip.
    pub offset: Option<usize>,
}

/// Retry policy for transient read failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts before the error surfaces.
    pub attempts: u32,
    /// Initial backoff, doubled per retry.
    pub backoff: std::time::Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: std::time::Duration::from_millis(25),
        }
    }
}

/// Serves typed queries against an event store.
///
/// Queries are read-only: they never mutate the log or its indexes and
/// never contend with the append path beyond a consistent-snapshot
/// read. Transient storage errors are retried with bounded exponential
/// backoff before surfacing; invalid bounds surface immediately and are
/// never retried.
pub struct QueryEngine {
    store: Arc<dyn EventStore>,
    retry: RetryPolicy,
}

impl QueryEngine {
    /// Creates a query engine with the default retry policy.
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
        }
    }

    /// Creates a query engine with a custom retry policy.
    pub fn with_retry(store: Arc<dyn EventStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Runs a filter with default options.
    pub async fn query(&self, filter: EventFilter) -> StoreResult<Vec<StoredEvent>> {
        self.query_with(filter, QueryOptions::default()).await
    }

    /// Runs a filter with pagination options.
    ///
    /// Empty results are not an error.
    pub async fn query_with(
        &self,
        filter: EventFilter,
        options: QueryOptions,
    ) -> StoreResult<Vec<StoredEvent>> {
        filter.validate()?;

        let mut backoff = self.retry.backoff;
        let mut attempt = 1;

        loop {
            match self.store.query(&filter, &options).await {
                Err(StoreError::Storage(reason)) if attempt < self.retry.attempts => {
                    tracing::warn!(
                        attempt,
                        max_attempts = self.retry.attempts,
                        %reason,
                        "transient storage error during query, retrying"
                    );
                    sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::store::MemoryEventStore;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    async fn seeded_store() -> Arc<MemoryEventStore> {
        let store = Arc::new(MemoryEventStore::new());
        for (event_type, secs, page) in [("click", 10, "home"), ("view", 12, "home"), ("click", 15, "about")] {
            let event = Event::new(event_type, serde_json::json!({"page": page}))
                .with_timestamp(ts(secs));
            store.append(event).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_by_type_ordering() {
        let engine = QueryEngine::new(seeded_store().await);

        let clicks = engine
            .query(EventFilter::ByType {
                event_type: "click".to_string(),
                range: None,
            })
            .await
            .unwrap();

        assert_eq!(clicks.len(), 2);
        assert_eq!(clicks[0].timestamp, ts(10));
        assert_eq!(clicks[1].timestamp, ts(15));
    }

    #[tokio::test]
    async fn test_by_time_range() {
        let engine = QueryEngine::new(seeded_store().await);

        let hits = engine
            .query(EventFilter::ByTimeRange {
                start: ts(11),
                end: ts(20),
            })
            .await
            .unwrap();

        let types: Vec<_> = hits.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec!["view", "click"]);
    }

    #[tokio::test]
    async fn test_equal_timestamps_ordered_by_event_id() {
        let store = Arc::new(MemoryEventStore::new());
        let shared = ts(10);
        let mut ids = Vec::new();
        for _ in 0..4 {
            let event = Event::new("click", serde_json::json!({})).with_timestamp(shared);
            ids.push(event.event_id);
            store.append(event).await.unwrap();
        }
        // Ascending event-ID order, independent of append order.
        ids.sort();

        let engine = QueryEngine::new(store);

        let by_time = engine
            .query(EventFilter::ByTimeRange {
                start: ts(0),
                end: ts(100),
            })
            .await
            .unwrap();
        let got: Vec<_> = by_time.iter().map(|e| e.event_id).collect();
        assert_eq!(got, ids);

        let by_type = engine
            .query(EventFilter::ByType {
                event_type: "click".to_string(),
                range: None,
            })
            .await
            .unwrap();
        let got: Vec<_> = by_type.iter().map(|e| e.event_id).collect();
        assert_eq!(got, ids);
    }

    #[tokio::test]
    async fn test_invalid_range_surfaces_immediately() {
        let engine = QueryEngine::new(seeded_store().await);

        let err = engine
            .query(EventFilter::ByTimeRange {
                start: ts(20),
                end: ts(10),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::InvalidRange { .. }));
    }

    #[tokio::test]
    async fn test_no_match_is_empty_not_error() {
        let engine = QueryEngine::new(seeded_store().await);

        let hits = engine
            .query(EventFilter::ByType {
                event_type: "purchase".to_string(),
                range: None,
            })
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_by_payload_field() {
        let engine = QueryEngine::new(seeded_store().await);

        let hits = engine
            .query(EventFilter::ByPayloadField {
                key: "page".to_string(),
                value: serde_json::json!("home"),
            })
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        // Stable tiebreak by event ID.
        assert!(hits[0].event_id < hits[1].event_id);
    }

    #[tokio::test]
    async fn test_pagination() {
        let engine = QueryEngine::new(seeded_store().await);

        let hits = engine
            .query_with(
                EventFilter::ByTimeRange {
                    start: ts(0),
                    end: ts(100),
                },
                QueryOptions {
                    limit: Some(1),
                    offset: Some(1),
                },
            )
            .await
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].event_type, "view");
    }

    /// Store that fails reads a fixed number of times before recovering.
    struct FlakyStore {
        inner: MemoryEventStore,
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl EventStore for FlakyStore {
        async fn append(&self, event: Event) -> StoreResult<crate::store::AppendOutcome> {
            self.inner.append(event).await
        }

        async fn append_batch(
            &self,
            events: Vec<Event>,
        ) -> StoreResult<Vec<crate::store::AppendOutcome>> {
            self.inner.append_batch(events).await
        }

        async fn get(&self, event_id: &EventId) -> StoreResult<Option<StoredEvent>> {
            self.inner.get(event_id).await
        }

        async fn query(
            &self,
            filter: &EventFilter,
            options: &QueryOptions,
        ) -> StoreResult<Vec<StoredEvent>> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StoreError::Storage("connection reset".to_string()));
            }
            self.inner.query(filter, options).await
        }

        async fn read_after(
            &self,
            after: Option<crate::Cursor>,
            until: Option<crate::Cursor>,
            limit: usize,
        ) -> StoreResult<Vec<StoredEvent>> {
            self.inner.read_after(after, until, limit).await
        }

        fn subscribe_tail(&self) -> tokio::sync::broadcast::Receiver<crate::Cursor> {
            self.inner.subscribe_tail()
        }

        async fn stats(&self) -> crate::store::StoreStats {
            self.inner.stats().await
        }
    }

    #[tokio::test]
    async fn test_transient_read_errors_retry_then_succeed() {
        let flaky = Arc::new(FlakyStore {
            inner: MemoryEventStore::new(),
            failures_left: AtomicU32::new(2),
        });
        flaky
            .inner
            .append(Event::new("click", serde_json::json!({})))
            .await
            .unwrap();

        let engine = QueryEngine::with_retry(
            flaky.clone(),
            RetryPolicy {
                attempts: 3,
                backoff: std::time::Duration::from_millis(1),
            },
        );

        let hits = engine
            .query(EventFilter::ByType {
                event_type: "click".to_string(),
                range: None,
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_retries_exhausted_surface_storage_error() {
        let flaky = Arc::new(FlakyStore {
            inner: MemoryEventStore::new(),
            failures_left: AtomicU32::new(10),
        });

        let engine = QueryEngine::with_retry(
            flaky,
            RetryPolicy {
                attempts: 2,
                backoff: std::time::Duration::from_millis(1),
            },
        );

        let err = engine
            .query(EventFilter::ByType {
                event_type: "click".to_string(),
                range: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Storage(_)));
    }
}
