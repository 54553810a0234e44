//! Event types and structures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Unique identifier for an event, assigned at creation and immutable.
pub type EventId = uuid::Uuid;

/// An event as submitted by a producer.
///
/// The store treats the payload as an opaque structured document and
/// returns it byte-for-byte. `timestamp` is the producer's occurrence
/// time and is only monotonic within a single producer; the store
/// assigns its own ingestion order on append.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier for this event instance.
    pub event_id: EventId,
    /// Short discriminator classifying the event (e.g. "click", "view").
    pub event_type: String,
    /// Producer-supplied occurrence time.
    pub timestamp: DateTime<Utc>,
    /// Opaque payload document.
    pub payload: Value,
}

impl Event {
    /// Creates a new event with a generated ID and the current time.
    pub fn new(event_type: impl Into<String>, payload: impl Serialize) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4(),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            payload: serde_json::to_value(payload).unwrap_or(Value::Null),
        }
    }

    /// Sets a caller-supplied event ID.
    ///
    /// Appending an event whose ID already exists in the store fails
    /// with a duplicate error instead of overwriting.
    pub fn with_event_id(mut self, event_id: EventId) -> Self {
        self.event_id = event_id;
        self
    }

    /// Sets the producer occurrence timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Deserializes the payload to a specific type.
    pub fn payload_as<T: for<'de> Deserialize<'de>>(&self) -> Option<T> {
        serde_json::from_value(self.payload.clone()).ok()
    }
}
