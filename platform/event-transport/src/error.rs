/// Errors surfaced by the transport layer itself (connect/publish/subscribe
/// failures, bad envelopes). These bubble to the caller's loop, which
/// decides retry-vs-DLQ; they are distinct from [`HandlerOutcome`], which a
/// consumer's own business logic returns.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("not connected to broker")]
    NotConnected,

    #[error("bus error: {0}")]
    Bus(#[from] event_bus::BusError),

    #[error("envelope is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("schema validation failed: {0}")]
    Validation(#[from] schema_registry::ValidationError),

    #[error("connection lost beyond retry cap")]
    Fatal,
}

/// What a consumer handler reports back about one delivery. This is the
/// behavioral taxonomy from the error-handling design: validation failures
/// never reach here (they're checked before the handler runs and go
/// straight to DLQ); business failures are modeled as ordinary `Ok(())`
/// because they are expressed as emitted failure events, not errors.
#[derive(Debug, thiserror::Error)]
pub enum HandlerOutcome {
    /// Transient failure — network blip, downstream timeout. Eligible for
    /// redelivery up to `max_retries`.
    #[error("retryable failure: {0}")]
    Retryable(String),

    /// Not recoverable by redelivery (e.g. malformed business state). Routed
    /// directly to the DLQ without consuming a retry.
    #[error("permanent failure: {0}")]
    Permanent(String),
}
