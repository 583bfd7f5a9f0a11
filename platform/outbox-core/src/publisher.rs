use crate::store::OutboxStore;
use event_transport::{EventTransport, PublishOptions};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// Tuning for the polling publish loop: batch of 100, ~1s poll interval,
/// an attempt cap of 5 before an event is promoted to FAILED.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub batch_size: i64,
    pub poll_interval: Duration,
    pub max_attempts: i32,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_interval: Duration::from_secs(1),
            max_attempts: 5,
        }
    }
}

/// Drains the outbox store onto the event transport. Tolerant of crashes at
/// any point: an event published but not yet marked PUBLISHED is simply
/// republished on the next tick, which is why downstream consumers are
/// required to be idempotent.
pub struct OutboxPublisher {
    store: Arc<dyn OutboxStore>,
    transport: Arc<EventTransport>,
    config: PublisherConfig,
}

impl OutboxPublisher {
    pub fn new(store: Arc<dyn OutboxStore>, transport: Arc<EventTransport>, config: PublisherConfig) -> Self {
        Self {
            store,
            transport,
            config,
        }
    }

    /// Run the poll loop forever. Callers spawn this as a background task
    /// (`tokio::spawn(publisher.run())`) and hold the `JoinHandle` for
    /// graceful shutdown.
    pub async fn run(&self) {
        tracing::info!("starting outbox publisher");

        loop {
            match self.publish_batch().await {
                Ok(0) => {}
                Ok(count) => tracing::debug!(count, "published batch from outbox"),
                Err(err) => tracing::error!(error = %err, "error draining outbox"),
            }

            let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..250));
            tokio::time::sleep(self.config.poll_interval + jitter).await;
        }
    }

    /// One tick of the loop, exposed separately so tests can drive it
    /// deterministically instead of racing the sleep above.
    pub async fn publish_batch(&self) -> Result<usize, crate::store::OutboxError> {
        let events = self.store.claim_pending(self.config.batch_size).await?;
        let count = events.len();

        for event in events {
            let opts = PublishOptions {
                event_id: Some(event.event_id),
                correlation_id: event.correlation_id.clone(),
                traceparent: None,
            };

            match self
                .transport
                .publish(&event.destination, &event.event_type, event.payload.clone(), opts)
                .await
            {
                Ok(_) => {
                    self.store.mark_published(event.event_id).await?;
                    tracing::info!(
                        event_id = %event.event_id,
                        event_type = %event.event_type,
                        "event published from outbox"
                    );
                }
                Err(err) => {
                    let attempt_count_after = event.attempt_count + 1;
                    let promote = attempt_count_after > self.config.max_attempts;

                    self.store
                        .mark_failed(event.event_id, &err.to_string(), promote)
                        .await?;

                    if promote {
                        tracing::error!(
                            event_id = %event.event_id,
                            attempt_count = attempt_count_after,
                            error = %err,
                            "event exceeded attempt cap, marked FAILED"
                        );
                    } else {
                        tracing::warn!(
                            event_id = %event.event_id,
                            attempt_count = attempt_count_after,
                            error = %err,
                            "publish attempt failed, will retry"
                        );
                    }
                }
            }
        }

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fake::InMemoryOutboxStore;
    use crate::store::{OutboxEvent, OutboxStatus};
    use event_bus::{EventBus, InMemoryBus};
    use schema_registry::SchemaRegistry;

    fn transport() -> Arc<EventTransport> {
        let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new());
        Arc::new(EventTransport::new(bus, Arc::new(SchemaRegistry::new())))
    }

    #[tokio::test]
    async fn publish_batch_marks_successful_events_published() {
        let fake = InMemoryOutboxStore::new();
        let event = OutboxEvent::new("C1", "ORDER_CREATED", "q.order.events", serde_json::json!({}));
        fake.stage_now(event);
        let store: Arc<dyn OutboxStore> = Arc::new(fake);

        let publisher = OutboxPublisher::new(store.clone(), transport(), PublisherConfig::default());
        let count = publisher.publish_batch().await.unwrap();
        assert_eq!(count, 1);

        let claimed = store.claim_pending(10).await.unwrap();
        assert!(claimed.is_empty());
    }

    #[tokio::test]
    async fn attempt_count_equal_to_max_is_last_retry_not_yet_failed() {
        let fake = InMemoryOutboxStore::new();
        let mut event = OutboxEvent::new("C1", "ORDER_CREATED", "q.order.events", serde_json::json!({}));
        event.attempt_count = 4;
        let event_id = event.event_id;
        fake.stage_now(event);

        fake.mark_failed(event_id, "boom", 4 + 1 > 5).await.unwrap();
        let row = fake.get(event_id).unwrap();
        assert_eq!(row.attempt_count, 5);
        assert_eq!(row.status, OutboxStatus::Pending);

        fake.mark_failed(event_id, "boom again", 5 + 1 > 5).await.unwrap();
        let row = fake.get(event_id).unwrap();
        assert_eq!(row.attempt_count, 6);
        assert_eq!(row.status, OutboxStatus::Failed);
    }
}
