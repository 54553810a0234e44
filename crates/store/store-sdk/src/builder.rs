//! Event builder utilities for producers.

use eventlog_store::Event;
use serde::Serialize;
use serde_json::{Map, Value};

/// Builder for creating events with producer-specific defaults.
///
/// A producer configures its event-type prefix and the payload fields
/// every one of its events should carry, then stamps out events without
/// repeating them.
pub struct ProducerEventBuilder {
    type_prefix: Option<String>,
    base_fields: Map<String, Value>,
}

impl ProducerEventBuilder {
    /// Creates a builder with no defaults.
    pub fn new() -> Self {
        Self {
            type_prefix: None,
            base_fields: Map::new(),
        }
    }

    /// Sets a prefix applied to every event type (e.g. "web" turns
    /// "click" into "web.click").
    pub fn with_type_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.type_prefix = Some(prefix.into());
        self
    }

    /// Adds a payload field included in every built event.
    ///
    /// Explicit payload fields win over defaults on key collision.
    pub fn with_base_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.base_fields.insert(key.into(), value.into());
        self
    }

    /// Builds an event with the configured defaults.
    ///
    /// Base fields are merged only when the payload serializes to an
    /// object; other payload shapes pass through untouched.
    pub fn build(&self, event_type: &str, payload: impl Serialize) -> Event {
        let event_type = match &self.type_prefix {
            Some(prefix) => format!("{prefix}.{event_type}"),
            None => event_type.to_string(),
        };

        let mut payload = serde_json::to_value(payload).unwrap_or(Value::Null);
        if !self.base_fields.is_empty() {
            if let Value::Object(fields) = &mut payload {
                for (key, value) in &self.base_fields {
                    fields.entry(key.clone()).or_insert_with(|| value.clone());
                }
            }
        }

        Event::new(event_type, payload)
    }
}

impl Default for ProducerEventBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_prefix() {
        let builder = ProducerEventBuilder::new().with_type_prefix("web");
        let event = builder.build("click", serde_json::json!({}));
        assert_eq!(event.event_type, "web.click");
    }

    #[test]
    fn test_base_fields_merge_without_clobbering() {
        let builder = ProducerEventBuilder::new()
            .with_base_field("producer", "svc-a")
            .with_base_field("region", "eu");

        let event = builder.build("click", serde_json::json!({"region": "us", "x": 1}));

        assert_eq!(event.payload["producer"], "svc-a");
        assert_eq!(event.payload["region"], "us");
        assert_eq!(event.payload["x"], 1);
    }

    #[test]
    fn test_non_object_payload_passes_through() {
        let builder = ProducerEventBuilder::new().with_base_field("producer", "svc-a");
        let event = builder.build("ping", serde_json::json!([1, 2, 3]));
        assert_eq!(event.payload, serde_json::json!([1, 2, 3]));
    }
}
