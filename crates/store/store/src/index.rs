//! Index manager - access structures and read-side selection.
//!
//! Maintains the derived structures serving the store's dominant query
//! shapes:
//! - Time-leading composite for "any type within a time range"
//! - Type-leading composite for "one type, ordered by time"
//! - Covering point-lookup map by event ID
//! - Recent-window partial structure over ingestion order
//! - Optional payload inverted index for exact field matches
//!
//! Maintenance runs inside the append path's critical section; this
//! module exposes only insertion and read-side selection. Selection is
//! a pure function over query shapes so its preference order can be
//! tested with zero data.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound::{Included, Unbounded};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::cursor::Cursor;
use crate::event::EventId;
use crate::store::StoredEvent;

/// Default retention horizon for the recent-window structure.
pub fn default_recent_window() -> chrono::Duration {
    chrono::Duration::days(7)
}

/// The shape of an incoming read, used to pick an access structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryShape {
    /// Point lookup by event ID.
    Point,
    /// Time range over all types.
    TimeRange,
    /// Single type, optionally time-bounded.
    TypeFilter,
    /// Exact payload key/value match.
    PayloadField,
    /// Ingestion-ordered slice for replay.
    ReplaySlice {
        /// Whether the slice lies entirely inside the retention horizon.
        within_recent_window: bool,
    },
}

/// The access structure chosen for a query shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexChoice {
    /// Covering lookup by event ID.
    PointLookup,
    /// `(timestamp, event_id)` composite, any type.
    TimeComposite,
    /// `(event_type, timestamp, event_id)` composite.
    TypeComposite,
    /// Payload inverted index.
    PayloadInverted,
    /// Partial structure over recent ingestion positions.
    RecentWindow,
    /// Ordered scan of the full log.
    FullScan,
}

/// Picks the cheapest structure for a query shape.
///
/// Deterministic and independent of data volume: point lookup beats
/// covering range scans, which beat the partial window, which beats a
/// full scan.
pub fn select(shape: &QueryShape) -> IndexChoice {
    match shape {
        QueryShape::Point => IndexChoice::PointLookup,
        QueryShape::TimeRange => IndexChoice::TimeComposite,
        QueryShape::TypeFilter => IndexChoice::TypeComposite,
        QueryShape::PayloadField => IndexChoice::PayloadInverted,
        QueryShape::ReplaySlice {
            within_recent_window: true,
        } => IndexChoice::RecentWindow,
        QueryShape::ReplaySlice {
            within_recent_window: false,
        } => IndexChoice::FullScan,
    }
}

/// The derived access structures over the append-only log.
///
/// Entries reference log positions by append sequence; the log itself
/// is the covering row store.
pub struct IndexManager {
    /// `(timestamp, event_id) -> (event_type, sequence)`.
    ///
    /// Ties on timestamp order by event ID, matching the query
    /// contract; the type rides along so range scans stay covering.
    by_time: BTreeMap<(DateTime<Utc>, EventId), (String, u64)>,
    /// `(event_type, timestamp, event_id) -> sequence`.
    by_type_time: BTreeMap<(String, DateTime<Utc>, EventId), u64>,
    /// Covering point lookup: `event_id -> sequence`.
    by_id: HashMap<EventId, u64>,
    /// Partial structure over ingestion order, recent horizon only.
    recent: BTreeMap<Cursor, EventId>,
    /// Inverted index over top-level payload key/value pairs.
    by_payload: HashMap<(String, String), BTreeSet<EventId>>,
    /// Retention horizon for the recent window.
    recent_window: chrono::Duration,
}

impl IndexManager {
    pub fn new(recent_window: chrono::Duration) -> Self {
        Self {
            by_time: BTreeMap::new(),
            by_type_time: BTreeMap::new(),
            by_id: HashMap::new(),
            recent: BTreeMap::new(),
            by_payload: HashMap::new(),
            recent_window,
        }
    }

    /// Whether an event ID is already indexed.
    pub fn contains(&self, event_id: &EventId) -> bool {
        self.by_id.contains_key(event_id)
    }

    /// Inserts index entries for a committed event.
    ///
    /// Runs inside the append critical section so the log row and its
    /// entries become visible together. Also prunes the recent window
    /// past the retention horizon.
    pub fn insert(&mut self, event: &StoredEvent) {
        self.by_time.insert(
            (event.timestamp, event.event_id),
            (event.event_type.clone(), event.sequence),
        );
        self.by_type_time.insert(
            (event.event_type.clone(), event.timestamp, event.event_id),
            event.sequence,
        );
        self.by_id.insert(event.event_id, event.sequence);
        self.recent.insert(event.cursor(), event.event_id);

        if let Value::Object(fields) = &event.payload {
            for (key, value) in fields {
                self.by_payload
                    .entry((key.clone(), canonical(value)))
                    .or_default()
                    .insert(event.event_id);
            }
        }

        self.prune_recent(event.created_at);
    }

    /// Point lookup, one hop to the log row.
    pub fn lookup(&self, event_id: &EventId) -> Option<u64> {
        self.by_id.get(event_id).copied()
    }

    /// Sequences of events with `timestamp` in `[start, end]`, ordered
    /// by timestamp ascending with event-ID tiebreak.
    pub fn time_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<u64> {
        self.by_time
            .range((Included((start, EventId::nil())), Unbounded))
            .take_while(|((ts, _), _)| *ts <= end)
            .map(|(_, (_, seq))| *seq)
            .collect()
    }

    /// Sequences of events of one type, optionally time-bounded,
    /// ordered by timestamp ascending with event-ID tiebreak.
    pub fn type_range(
        &self,
        event_type: &str,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Vec<u64> {
        let start = range.map(|(s, _)| s).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let lower = (event_type.to_string(), start, EventId::nil());

        self.by_type_time
            .range((Included(lower), Unbounded))
            .take_while(|((ty, ts, _), _)| {
                ty == event_type && range.is_none_or(|(_, end)| *ts <= end)
            })
            .map(|(_, seq)| *seq)
            .collect()
    }

    /// Event IDs whose payload contains `key: value` at the top level,
    /// in stable event-ID order.
    pub fn payload_matches(&self, key: &str, value: &Value) -> Vec<EventId> {
        self.by_payload
            .get(&(key.to_string(), canonical(value)))
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Whether a replay lower bound falls inside the recent window.
    pub fn covers_recent(&self, after: Cursor, now: DateTime<Utc>) -> bool {
        self.recent
            .first_key_value()
            .is_some_and(|(oldest, _)| *oldest <= after)
            && after.created_at_micros >= (now - self.recent_window).timestamp_micros()
    }

    /// Sequences strictly after `after` in the recent window, in
    /// ingestion order.
    pub fn recent_after(&self, after: Cursor) -> Vec<u64> {
        self.recent
            .range((std::ops::Bound::Excluded(after), Unbounded))
            .map(|(cursor, _)| cursor.sequence())
            .collect()
    }

    /// Number of entries currently held by the recent window.
    pub fn recent_len(&self) -> usize {
        self.recent.len()
    }

    fn prune_recent(&mut self, now: DateTime<Utc>) {
        let horizon = Cursor::new((now - self.recent_window).timestamp_micros(), 0);
        // split_off keeps everything >= horizon; the rest is dropped.
        self.recent = self.recent.split_off(&horizon);
    }
}

/// Canonical string form of a payload value for inverted-index keys.
fn canonical(value: &Value) -> String {
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn stored(
        event_type: &str,
        ts_secs: i64,
        sequence: u64,
        payload: Value,
    ) -> StoredEvent {
        let created = Utc.timestamp_opt(1_000_000 + sequence as i64, 0).unwrap();
        StoredEvent {
            event_id: uuid::Uuid::new_v4(),
            event_type: event_type.to_string(),
            timestamp: Utc.timestamp_opt(ts_secs, 0).unwrap(),
            payload,
            created_at: created,
            sequence,
        }
    }

    #[test]
    fn test_selection_is_stable() {
        assert_eq!(select(&QueryShape::Point), IndexChoice::PointLookup);
        assert_eq!(select(&QueryShape::TimeRange), IndexChoice::TimeComposite);
        assert_eq!(select(&QueryShape::TypeFilter), IndexChoice::TypeComposite);
        assert_eq!(
            select(&QueryShape::PayloadField),
            IndexChoice::PayloadInverted
        );
        assert_eq!(
            select(&QueryShape::ReplaySlice {
                within_recent_window: true
            }),
            IndexChoice::RecentWindow
        );
        assert_eq!(
            select(&QueryShape::ReplaySlice {
                within_recent_window: false
            }),
            IndexChoice::FullScan
        );
    }

    #[test]
    fn test_time_range_scan() {
        let mut index = IndexManager::new(default_recent_window());
        let a = stored("click", 10, 0, Value::Null);
        let b = stored("view", 12, 1, Value::Null);
        let c = stored("click", 15, 2, Value::Null);
        for e in [&a, &b, &c] {
            index.insert(e);
        }

        let hits = index.time_range(
            Utc.timestamp_opt(11, 0).unwrap(),
            Utc.timestamp_opt(20, 0).unwrap(),
        );
        assert_eq!(hits, vec![1, 2]);
    }

    #[test]
    fn test_type_range_scan() {
        let mut index = IndexManager::new(default_recent_window());
        index.insert(&stored("click", 10, 0, Value::Null));
        index.insert(&stored("view", 12, 1, Value::Null));
        index.insert(&stored("click", 15, 2, Value::Null));
        index.insert(&stored("clicked", 11, 3, Value::Null));

        // Prefix types must not leak into the scan.
        assert_eq!(index.type_range("click", None), vec![0, 2]);

        let bounded = index.type_range(
            "click",
            Some((
                Utc.timestamp_opt(11, 0).unwrap(),
                Utc.timestamp_opt(20, 0).unwrap(),
            )),
        );
        assert_eq!(bounded, vec![2]);
    }

    #[test]
    fn test_payload_inverted_index() {
        let mut index = IndexManager::new(default_recent_window());
        let a = stored("click", 10, 0, serde_json::json!({"page": "home", "n": 1}));
        let b = stored("click", 11, 1, serde_json::json!({"page": "about"}));
        index.insert(&a);
        index.insert(&b);

        let hits = index.payload_matches("page", &serde_json::json!("home"));
        assert_eq!(hits, vec![a.event_id]);

        // Same key, different value type: no match.
        assert!(index.payload_matches("n", &serde_json::json!("1")).is_empty());
        assert_eq!(index.payload_matches("n", &serde_json::json!(1)), vec![a.event_id]);
    }

    #[test]
    fn test_recent_window_prunes() {
        let mut index = IndexManager::new(chrono::Duration::seconds(5));

        let mut old = stored("click", 10, 0, Value::Null);
        old.created_at = Utc.timestamp_opt(100, 0).unwrap();
        index.insert(&old);
        assert_eq!(index.recent_len(), 1);

        let mut fresh = stored("click", 11, 1, Value::Null);
        fresh.created_at = Utc.timestamp_opt(200, 0).unwrap();
        index.insert(&fresh);

        // The old entry fell past the horizon during insert.
        assert_eq!(index.recent_len(), 1);
        assert_eq!(index.recent_after(Cursor::new(0, 0)), vec![1]);
    }
}
