use crate::compensation::compensation_for;
use crate::store::OutboxStore;
use chrono::Utc;
use event_transport::{EventTransport, PublishOptions};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct TimeoutWorkerConfig {
    pub poll_interval: Duration,
    pub batch_size: i64,
}

impl Default for TimeoutWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            batch_size: 100,
        }
    }
}

/// Scans the outbox for saga legs whose awaited reply never arrived and
/// compensates them. Errors compensating one event must not abort the
/// batch — a stuck row shouldn't block every other timeout in the tick.
pub struct TimeoutWorker {
    store: Arc<dyn OutboxStore>,
    transport: Arc<EventTransport>,
    config: TimeoutWorkerConfig,
}

impl TimeoutWorker {
    pub fn new(store: Arc<dyn OutboxStore>, transport: Arc<EventTransport>, config: TimeoutWorkerConfig) -> Self {
        Self {
            store,
            transport,
            config,
        }
    }

    pub async fn run(&self) {
        tracing::info!("starting outbox timeout worker");
        let mut interval = tokio::time::interval(self.config.poll_interval);

        loop {
            interval.tick().await;
            let count = self.sweep().await;
            if count > 0 {
                tracing::info!(count, "compensated expired outbox events");
            }
        }
    }

    /// One sweep, exposed for deterministic testing.
    pub async fn sweep(&self) -> usize {
        let expired = match self.store.claim_expired(Utc::now(), self.config.batch_size).await {
            Ok(events) => events,
            Err(err) => {
                tracing::error!(error = %err, "failed to claim expired outbox events");
                return 0;
            }
        };

        let mut compensated = 0;
        for event in expired {
            if let Err(err) = self.compensate_one(&event).await {
                tracing::error!(
                    event_id = %event.event_id,
                    error = %err,
                    "failed to compensate expired outbox event, continuing batch"
                );
                continue;
            }
            compensated += 1;
        }

        compensated
    }

    async fn compensate_one(&self, event: &crate::store::OutboxEvent) -> Result<(), crate::store::OutboxError> {
        self.store
            .mark_timeout(event.event_id, "saga leg expired before a reply arrived")
            .await?;

        let Some(mapping) = compensation_for(&event.event_type) else {
            tracing::info!(
                event_id = %event.event_id,
                event_type = %event.event_type,
                "no compensation mapped for expired event type, skipping"
            );
            return Ok(());
        };

        let compensation_event_id = Uuid::new_v5(
            &Uuid::NAMESPACE_OID,
            format!("{}-timeout-comp", event.event_id).as_bytes(),
        );

        let payload = event
            .compensation_data
            .clone()
            .unwrap_or_else(|| event.payload.clone());

        let opts = PublishOptions {
            event_id: Some(compensation_event_id),
            correlation_id: event.correlation_id.clone(),
            traceparent: None,
        };

        if let Err(err) = self
            .transport
            .publish(&event.destination, mapping.compensation, payload, opts)
            .await
        {
            tracing::error!(
                event_id = %event.event_id,
                compensation = mapping.compensation,
                error = %err,
                "failed to publish compensation event"
            );
        } else {
            tracing::info!(
                event_id = %event.event_id,
                correlation_id = %event.correlation_id,
                original = mapping.original,
                compensation = mapping.compensation,
                reason = mapping.reason,
                "published compensation event for expired saga leg"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fake::InMemoryOutboxStore;
    use crate::store::OutboxEvent;
    use chrono::Duration as ChronoDuration;
    use event_bus::{EventBus, InMemoryBus};
    use schema_registry::SchemaRegistry;

    fn transport() -> Arc<EventTransport> {
        let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new());
        Arc::new(EventTransport::new(bus, Arc::new(SchemaRegistry::new())))
    }

    #[tokio::test]
    async fn expired_reserve_is_marked_timeout_and_compensated_with_release() {
        let fake = InMemoryOutboxStore::new();
        let event = OutboxEvent::new("C1", "RESERVE", "q.inventory.events", serde_json::json!({"product_id": "P1"}))
            .with_expires_at(Utc::now() - ChronoDuration::seconds(1));
        fake.stage_now(event);
        let store: Arc<dyn OutboxStore> = Arc::new(fake);

        let worker = TimeoutWorker::new(store.clone(), transport(), TimeoutWorkerConfig::default());
        let compensated = worker.sweep().await;
        assert_eq!(compensated, 1);

        let row = store.claim_expired(Utc::now(), 10).await.unwrap();
        assert!(row.is_empty());
    }

    #[tokio::test]
    async fn unmapped_event_type_is_marked_timeout_without_error() {
        let fake = InMemoryOutboxStore::new();
        let event = OutboxEvent::new("C1", "PRODUCT_CREATED", "q.products", serde_json::json!({}))
            .with_expires_at(Utc::now() - ChronoDuration::seconds(1));
        fake.stage_now(event);
        let store: Arc<dyn OutboxStore> = Arc::new(fake);

        let worker = TimeoutWorker::new(store.clone(), transport(), TimeoutWorkerConfig::default());
        let compensated = worker.sweep().await;
        assert_eq!(compensated, 1);
    }

    #[tokio::test]
    async fn error_on_one_event_does_not_abort_the_batch() {
        let fake = InMemoryOutboxStore::new();
        for i in 0..3 {
            let event = OutboxEvent::new("C1", "RESERVE", "q.inventory.events", serde_json::json!({"i": i}))
                .with_expires_at(Utc::now() - ChronoDuration::seconds(1));
            fake.stage_now(event);
        }
        let store: Arc<dyn OutboxStore> = Arc::new(fake);

        let worker = TimeoutWorker::new(store.clone(), transport(), TimeoutWorkerConfig::default());
        let compensated = worker.sweep().await;
        assert_eq!(compensated, 3);
    }
}
