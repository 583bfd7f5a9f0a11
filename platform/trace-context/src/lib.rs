//! # Trace Context Carrier
//!
//! Extracts and injects W3C `traceparent` headers so that a saga's
//! correlation id and the distributed trace it belongs to survive a hop
//! across the event bus. This crate does not talk to an APM backend; it
//! only carries the identifiers an outer telemetry SDK would pick up.

use std::fmt;

/// Version byte this crate emits. The W3C spec is currently at `00`.
const TRACE_VERSION: &str = "00";

/// A parsed `traceparent` value: `version-trace_id-parent_id-flags`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: String,
    pub parent_id: String,
    pub sampled: bool,
}

/// Errors returned while parsing a `traceparent` header value.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TraceContextError {
    #[error("traceparent must have 4 dash-separated fields, got {0}")]
    WrongFieldCount(usize),
    #[error("unsupported traceparent version: {0}")]
    UnsupportedVersion(String),
    #[error("trace_id must be 32 lowercase hex chars and not all zero")]
    InvalidTraceId,
    #[error("parent_id must be 16 lowercase hex chars and not all zero")]
    InvalidParentId,
    #[error("flags must be 2 lowercase hex chars")]
    InvalidFlags,
}

impl TraceContext {
    /// Start a brand-new trace (used when a saga originates an event with
    /// no inbound trace context to continue).
    pub fn new_root() -> Self {
        Self {
            trace_id: random_hex(32),
            parent_id: random_hex(16),
            sampled: true,
        }
    }

    /// Derive the context a downstream hop should carry: same trace id,
    /// a fresh parent (span) id, same sampling decision.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            parent_id: random_hex(16),
            sampled: self.sampled,
        }
    }

    /// Render as a `traceparent` header value.
    pub fn to_traceparent(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            TRACE_VERSION,
            self.trace_id,
            self.parent_id,
            if self.sampled { "01" } else { "00" }
        )
    }

    /// Parse a `traceparent` header value.
    pub fn parse(value: &str) -> Result<Self, TraceContextError> {
        let fields: Vec<&str> = value.split('-').collect();
        if fields.len() != 4 {
            return Err(TraceContextError::WrongFieldCount(fields.len()));
        }
        let (version, trace_id, parent_id, flags) = (fields[0], fields[1], fields[2], fields[3]);

        if version != TRACE_VERSION {
            return Err(TraceContextError::UnsupportedVersion(version.to_string()));
        }
        if trace_id.len() != 32
            || !trace_id.bytes().all(|b| b.is_ascii_hexdigit())
            || trace_id == "0".repeat(32)
        {
            return Err(TraceContextError::InvalidTraceId);
        }
        if parent_id.len() != 16
            || !parent_id.bytes().all(|b| b.is_ascii_hexdigit())
            || parent_id == "0".repeat(16)
        {
            return Err(TraceContextError::InvalidParentId);
        }
        if flags.len() != 2 || !flags.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(TraceContextError::InvalidFlags);
        }

        let flags_byte = u8::from_str_radix(flags, 16).map_err(|_| TraceContextError::InvalidFlags)?;

        Ok(Self {
            trace_id: trace_id.to_string(),
            parent_id: parent_id.to_string(),
            sampled: flags_byte & 0x01 == 1,
        })
    }

    /// Extract a traceparent from an envelope's `metadata.traceparent`
    /// field, falling back to a new root context when absent or invalid.
    pub fn extract_or_new(traceparent: Option<&str>) -> Self {
        traceparent
            .and_then(|tp| Self::parse(tp).ok())
            .unwrap_or_else(Self::new_root)
    }
}

impl fmt::Display for TraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_traceparent())
    }
}

fn random_hex(len: usize) -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| std::char::from_digit(rng.gen_range(0..16), 16).unwrap())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_root_produces_valid_traceparent() {
        let ctx = TraceContext::new_root();
        let rendered = ctx.to_traceparent();
        let reparsed = TraceContext::parse(&rendered).unwrap();
        assert_eq!(ctx, reparsed);
    }

    #[test]
    fn child_preserves_trace_id_changes_parent() {
        let root = TraceContext::new_root();
        let child = root.child();
        assert_eq!(root.trace_id, child.trace_id);
        assert_ne!(root.parent_id, child.parent_id);
    }

    #[test]
    fn parse_rejects_wrong_field_count() {
        assert_eq!(
            TraceContext::parse("00-abc-def"),
            Err(TraceContextError::WrongFieldCount(3))
        );
    }

    #[test]
    fn parse_rejects_all_zero_trace_id() {
        let value = format!("00-{}-{}-01", "0".repeat(32), "a".repeat(16));
        assert_eq!(
            TraceContext::parse(&value),
            Err(TraceContextError::InvalidTraceId)
        );
    }

    #[test]
    fn parse_rejects_unsupported_version() {
        let value = format!("01-{}-{}-01", "a".repeat(32), "b".repeat(16));
        assert_eq!(
            TraceContext::parse(&value),
            Err(TraceContextError::UnsupportedVersion("01".to_string()))
        );
    }

    #[test]
    fn extract_or_new_falls_back_on_garbage() {
        let ctx = TraceContext::extract_or_new(Some("not-a-traceparent"));
        assert_eq!(ctx.trace_id.len(), 32);
    }

    #[test]
    fn extract_or_new_round_trips_valid_header() {
        let original = TraceContext::new_root();
        let header = original.to_traceparent();
        let extracted = TraceContext::extract_or_new(Some(&header));
        assert_eq!(original, extracted);
    }
}
