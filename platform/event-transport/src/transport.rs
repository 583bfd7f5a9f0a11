use crate::envelope::{EventEnvelope, EventMetadata};
use crate::error::{HandlerOutcome, TransportError};
use event_bus::consumer_retry::RetryConfig;
use event_bus::EventBus;
use futures::StreamExt;
use schema_registry::{EventSchema, SchemaRegistry};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use trace_context::TraceContext;

/// Consumer-side tuning: 3 redeliveries, prefetch (concurrency) of 10.
#[derive(Debug, Clone)]
pub struct ConsumeConfig {
    pub max_retries: u32,
    pub prefetch: usize,
}

impl Default for ConsumeConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            prefetch: 10,
        }
    }
}

/// Options accompanying a single publish call.
#[derive(Debug, Clone)]
pub struct PublishOptions {
    pub event_id: Option<uuid::Uuid>,
    pub correlation_id: String,
    pub traceparent: Option<String>,
}

impl PublishOptions {
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self {
            event_id: None,
            correlation_id: correlation_id.into(),
            traceparent: None,
        }
    }
}

/// The publish/consume facade composing the event bus, schema registry, and
/// trace context carrier described in the component design: it serializes
/// envelopes, validates payloads, injects trace context, and routes
/// undeliverable messages to each queue's dead-letter subject.
pub struct EventTransport {
    bus: Arc<dyn EventBus>,
    schemas: Arc<SchemaRegistry>,
}

impl EventTransport {
    pub fn new(bus: Arc<dyn EventBus>, schemas: Arc<SchemaRegistry>) -> Self {
        Self { bus, schemas }
    }

    /// Serialize, validate, trace-stamp, and publish `data` as `event_type`
    /// to `destination`. Validation failures here are programmer errors:
    /// the publish is aborted and the error surfaced loudly, never retried.
    pub async fn publish(
        &self,
        destination: &str,
        event_type: &str,
        data: Value,
        opts: PublishOptions,
    ) -> Result<EventMetadata, TransportError> {
        if self.schemas.contains(event_type) {
            self.schemas.validate(event_type, &data)?;
        }

        let traceparent = opts
            .traceparent
            .unwrap_or_else(|| TraceContext::new_root().to_traceparent());

        let mut envelope = EventEnvelope::new(event_type, data, opts.correlation_id, traceparent);
        if let Some(event_id) = opts.event_id {
            envelope = envelope.with_event_id(event_id);
        }

        let payload = serde_json::to_vec(&envelope)?;

        self.bus.publish(destination, payload).await?;

        tracing::info!(
            event_id = %envelope.metadata.event_id,
            correlation_id = %envelope.metadata.correlation_id,
            event_type,
            destination,
            "event published"
        );

        Ok(envelope.metadata)
    }

    /// Subscribe to `queue`, applying `schema` (if any) to every delivery
    /// and dispatching to `handler` with bounded concurrency (`prefetch`).
    /// A `Retryable` outcome is retried in-process up to `max_retries`
    /// with exponential backoff; exhausting retries, a `Permanent` outcome,
    /// or a schema validation failure all route the raw message to
    /// `<queue>.dlq`.
    pub async fn consume<F, Fut>(
        &self,
        queue: &str,
        schema: Option<EventSchema>,
        config: ConsumeConfig,
        handler: F,
    ) -> Result<(), TransportError>
    where
        F: Fn(String, Value, EventMetadata) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Result<(), HandlerOutcome>> + Send,
    {
        let mut stream = self.bus.subscribe(queue).await?;
        let dlq_subject = format!("{queue}.dlq");
        let semaphore = Arc::new(Semaphore::new(config.prefetch));

        while let Some(msg) = stream.next().await {
            let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
            let bus = self.bus.clone();
            let handler = handler.clone();
            let dlq_subject = dlq_subject.clone();
            let schema = schema.clone();
            let retry_config = RetryConfig {
                max_attempts: config.max_retries,
                ..RetryConfig::default()
            };

            tokio::spawn(async move {
                let _permit = permit;
                dispatch_one(bus, &dlq_subject, schema, retry_config, msg, handler).await;
            });
        }

        Ok(())
    }
}

async fn dispatch_one<F, Fut>(
    bus: Arc<dyn EventBus>,
    dlq_subject: &str,
    schema: Option<EventSchema>,
    retry_config: RetryConfig,
    msg: event_bus::BusMessage,
    handler: F,
) where
    F: Fn(String, Value, EventMetadata) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerOutcome>> + Send,
{
    let envelope: EventEnvelope = match serde_json::from_slice(&msg.payload) {
        Ok(envelope) => envelope,
        Err(err) => {
            tracing::error!(subject = %msg.subject, error = %err, "malformed envelope, routing to DLQ");
            dead_letter(&bus, dlq_subject, &msg.payload, &err.to_string()).await;
            return;
        }
    };

    if let Some(schema) = &schema {
        if let Err(err) = schema.validate(&envelope.data) {
            tracing::error!(
                event_id = %envelope.metadata.event_id,
                error = %err,
                "schema validation failed on consume, routing to DLQ"
            );
            dead_letter(&bus, dlq_subject, &msg.payload, &err.to_string()).await;
            return;
        }
    }

    let trace = TraceContext::extract_or_new(Some(&envelope.metadata.traceparent));
    tracing::trace!(trace_id = %trace.trace_id, "extracted trace context for delivery");

    let data = envelope.data.clone();
    let metadata = envelope.metadata.clone();
    let event_type = envelope.event_type.clone();

    // Permanent failures must never consume a retry, on the first attempt or
    // any subsequent one, so this loop matches on `HandlerOutcome` itself
    // rather than delegating to `retry_with_backoff` (which only sees an
    // opaque error and would retry a Permanent outcome just like a
    // Retryable one).
    let mut attempt = 0;
    let mut backoff = retry_config.initial_backoff;
    let final_error = loop {
        attempt += 1;
        match handler(event_type.clone(), data.clone(), metadata.clone()).await {
            Ok(()) => break None,
            Err(HandlerOutcome::Permanent(error)) => {
                tracing::warn!(
                    event_id = %envelope.metadata.event_id,
                    error = %error,
                    "permanent handler failure, skipping retries"
                );
                break Some(error);
            }
            Err(HandlerOutcome::Retryable(error)) => {
                if attempt >= retry_config.max_attempts {
                    break Some(error);
                }
                tracing::warn!(
                    event_id = %envelope.metadata.event_id,
                    attempt,
                    max_attempts = retry_config.max_attempts,
                    backoff_ms = backoff.as_millis(),
                    error = %error,
                    "retryable handler failure, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff = std::cmp::min(backoff * 2, retry_config.max_backoff);
            }
        }
    };

    if let Some(error) = final_error {
        tracing::error!(
            event_id = %envelope.metadata.event_id,
            event_type = %envelope.event_type,
            error,
            "handler failed, routing to DLQ"
        );
        dead_letter(&bus, dlq_subject, &msg.payload, &error).await;
    }
}

async fn dead_letter(bus: &Arc<dyn EventBus>, dlq_subject: &str, payload: &[u8], reason: &str) {
    let envelope = serde_json::json!({
        "original_payload": String::from_utf8_lossy(payload),
        "reason": reason,
    });

    if let Ok(bytes) = serde_json::to_vec(&envelope) {
        if let Err(err) = bus.publish(dlq_subject, bytes).await {
            tracing::error!(dlq_subject, error = %err, "failed to write to DLQ - event may be lost");
        }
    }
}
