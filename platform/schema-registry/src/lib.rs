//! # Schema Registry
//!
//! Holds a declarative schema per event type and validates payloads against
//! it on publish and on consume. Validation failures on publish are
//! programmer errors (abort the publish, surface loudly); validation
//! failures on consume route the message straight to the DLQ — bad data
//! can't be fixed by redelivery.
//!
//! A schema may declare a union of shapes so that an event type can evolve
//! (an older flattened form alongside a newer nested one) without the
//! registry rejecting either.

use serde_json::Value;
use std::collections::HashMap;

mod field;
pub use field::{FieldSpec, FieldType};

/// One accepted shape for an event type: a set of named field specs.
pub type Shape = HashMap<String, FieldSpec>;

/// A schema for one event type: one or more accepted shapes.
#[derive(Debug, Clone)]
pub struct EventSchema {
    pub event_type: String,
    pub shapes: Vec<Shape>,
}

impl EventSchema {
    /// A schema accepting exactly one shape.
    pub fn single(event_type: impl Into<String>, shape: Shape) -> Self {
        Self {
            event_type: event_type.into(),
            shapes: vec![shape],
        }
    }

    /// A schema accepting a union of shapes (e.g. an old and new envelope
    /// form for the same event type).
    pub fn union(event_type: impl Into<String>, shapes: Vec<Shape>) -> Self {
        Self {
            event_type: event_type.into(),
            shapes,
        }
    }

    /// Validate `payload` against this schema's shapes directly, without
    /// going through a [`SchemaRegistry`]. Useful when a caller already
    /// holds the schema for the event type it's consuming.
    pub fn validate(&self, payload: &Value) -> Result<(), ValidationError> {
        let mut reasons = Vec::new();
        for shape in &self.shapes {
            match field::validate_shape(shape, payload) {
                Ok(()) => return Ok(()),
                Err(reason) => reasons.push(reason),
            }
        }

        Err(ValidationError::NoShapeMatched {
            event_type: self.event_type.clone(),
            reasons,
        })
    }
}

/// Errors returned by [`SchemaRegistry::validate`].
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("no schema registered for event type '{0}'")]
    UnknownEventType(String),

    #[error("payload does not match any declared shape for '{event_type}': {reasons:?}")]
    NoShapeMatched {
        event_type: String,
        reasons: Vec<String>,
    },

    #[error("schema '{event_type}' version conflict: already registered")]
    DuplicateEventType { event_type: String },
}

/// Registry of schemas keyed by canonical event type string.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, EventSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self {
            schemas: HashMap::new(),
        }
    }

    /// Register a schema, replacing any prior registration for the same
    /// event type (callers that want strict one-shot registration should
    /// check [`SchemaRegistry::contains`] first).
    pub fn register(&mut self, schema: EventSchema) {
        self.schemas.insert(schema.event_type.clone(), schema);
    }

    pub fn contains(&self, event_type: &str) -> bool {
        self.schemas.contains_key(event_type)
    }

    /// Validate a payload against the registered schema for `event_type`.
    /// A payload is valid if it matches at least one of the schema's
    /// declared shapes.
    pub fn validate(&self, event_type: &str, payload: &Value) -> Result<(), ValidationError> {
        let schema = self
            .schemas
            .get(event_type)
            .ok_or_else(|| ValidationError::UnknownEventType(event_type.to_string()))?;

        schema.validate(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reserve_shape() -> Shape {
        let mut shape = HashMap::new();
        shape.insert(
            "product_id".to_string(),
            FieldSpec::required(FieldType::String),
        );
        shape.insert(
            "quantity".to_string(),
            FieldSpec::required(FieldType::Integer).with_bounds(Some(1.0), Some(1000.0)),
        );
        shape.insert(
            "warehouse".to_string(),
            FieldSpec::optional(FieldType::String),
        );
        shape
    }

    #[test]
    fn validate_accepts_matching_payload() {
        let mut registry = SchemaRegistry::new();
        registry.register(EventSchema::single("RESERVE", reserve_shape()));

        let payload = json!({"product_id": "P1", "quantity": 2});
        assert!(registry.validate("RESERVE", &payload).is_ok());
    }

    #[test]
    fn validate_rejects_missing_required_field() {
        let mut registry = SchemaRegistry::new();
        registry.register(EventSchema::single("RESERVE", reserve_shape()));

        let payload = json!({"quantity": 2});
        assert!(registry.validate("RESERVE", &payload).is_err());
    }

    #[test]
    fn validate_rejects_out_of_bounds_numeric() {
        let mut registry = SchemaRegistry::new();
        registry.register(EventSchema::single("RESERVE", reserve_shape()));

        let payload = json!({"product_id": "P1", "quantity": 0});
        assert!(registry.validate("RESERVE", &payload).is_err());
    }

    #[test]
    fn validate_unknown_event_type() {
        let registry = SchemaRegistry::new();
        let err = registry.validate("NOPE", &json!({})).unwrap_err();
        assert!(matches!(err, ValidationError::UnknownEventType(_)));
    }

    #[test]
    fn union_schema_accepts_either_shape() {
        let mut old_shape = HashMap::new();
        old_shape.insert("orderId".to_string(), FieldSpec::required(FieldType::String));

        let mut new_shape = HashMap::new();
        new_shape.insert(
            "order_id".to_string(),
            FieldSpec::required(FieldType::String),
        );

        let mut registry = SchemaRegistry::new();
        registry.register(EventSchema::union(
            "ORDER_CREATED",
            vec![old_shape, new_shape],
        ));

        assert!(registry
            .validate("ORDER_CREATED", &json!({"orderId": "O1"}))
            .is_ok());
        assert!(registry
            .validate("ORDER_CREATED", &json!({"order_id": "O1"}))
            .is_ok());
        assert!(registry
            .validate("ORDER_CREATED", &json!({"unrelated": 1}))
            .is_err());
    }

    #[test]
    fn enum_constraint_is_enforced() {
        let mut shape = HashMap::new();
        shape.insert(
            "status".to_string(),
            FieldSpec::required(FieldType::String)
                .with_enum(vec!["PENDING".into(), "CONFIRMED".into(), "CANCELLED".into()]),
        );

        let mut registry = SchemaRegistry::new();
        registry.register(EventSchema::single("ORDER_STATUS", shape));

        assert!(registry
            .validate("ORDER_STATUS", &json!({"status": "CONFIRMED"}))
            .is_ok());
        assert!(registry
            .validate("ORDER_STATUS", &json!({"status": "BOGUS"}))
            .is_err());
    }
}
