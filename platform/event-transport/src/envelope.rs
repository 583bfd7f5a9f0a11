use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Metadata carried alongside every event, independent of its payload shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    pub event_id: Uuid,
    pub correlation_id: String,
    pub traceparent: String,
    pub timestamp: DateTime<Utc>,
}

/// The wire envelope: `{ type, data, metadata }`. `data` is kept as an
/// untyped `serde_json::Value` at the transport layer — the schema registry
/// validates its shape and downstream consumers deserialize it into a
/// concrete type themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: Value,
    pub metadata: EventMetadata,
}

impl EventEnvelope {
    pub fn new(
        event_type: impl Into<String>,
        data: Value,
        correlation_id: impl Into<String>,
        traceparent: impl Into<String>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            metadata: EventMetadata {
                event_id: Uuid::new_v4(),
                correlation_id: correlation_id.into(),
                traceparent: traceparent.into(),
                timestamp: Utc::now(),
            },
        }
    }

    pub fn with_event_id(mut self, event_id: Uuid) -> Self {
        self.metadata.event_id = event_id;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let envelope = EventEnvelope::new(
            "ORDER_CREATED",
            serde_json::json!({"order_id": "O1"}),
            "C1",
            "00-aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa-bbbbbbbbbbbbbbbb-01",
        );

        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains("\"type\":\"ORDER_CREATED\""));

        let parsed: EventEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.event_type, "ORDER_CREATED");
        assert_eq!(parsed.metadata.correlation_id, "C1");
    }
}
