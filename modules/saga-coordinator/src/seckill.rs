//! Seckill (flash-sale) entry point: a winning bid joins the normal order
//! saga from `ORDER_CREATED` onward, skipping the ordinary availability
//! check — the seckill service has already decided this order wins before
//! this event is ever published.

use crate::deps::SagaDeps;
use crate::event_types::*;
use event_transport::{EventMetadata, HandlerOutcome};
use outbox_core::OutboxEvent;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct SeckillOrderWonPayload {
    order_id: String,
    product_id: String,
    quantity: i64,
}

/// `seckill.order.won` → create the order with `source = "seckill"` and
/// re-publish it as `ORDER_CREATED` so `order_saga::handle_order_created`
/// picks it up exactly as any other order would.
pub async fn handle_seckill_order_won(
    _event_type: String,
    data: Value,
    metadata: EventMetadata,
    deps: Arc<SagaDeps>,
) -> Result<(), HandlerOutcome> {
    let payload: SeckillOrderWonPayload = serde_json::from_value(data)
        .map_err(|e| HandlerOutcome::Permanent(format!("malformed payload: {e}")))?;

    let event_data = serde_json::json!({
        "order_id": payload.order_id,
        "product_id": payload.product_id,
        "quantity": payload.quantity,
        "source": "seckill",
    });

    let event = OutboxEvent::new(&metadata.correlation_id, ORDER_CREATED, Q_ORDER_EVENTS, event_data);
    deps.outbox
        .stage(&event)
        .await
        .map_err(|e| HandlerOutcome::Retryable(e.to_string()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::DomainState;
    use chrono::Utc;
    use event_bus::{EventBus, InMemoryBus};
    use event_transport::EventTransport;
    use idempotency_store::InMemoryIdempotencyStore;
    use outbox_core::{InMemoryOutboxStore, OutboxStore};
    use schema_registry::SchemaRegistry;
    use std::sync::Arc;
    use uuid::Uuid;

    fn deps(bus: Arc<dyn EventBus>, outbox: Arc<dyn OutboxStore>) -> Arc<SagaDeps> {
        let transport = Arc::new(EventTransport::new(bus, Arc::new(SchemaRegistry::new())));
        SagaDeps::new(Arc::new(InMemoryIdempotencyStore::new()), transport, outbox, Arc::new(DomainState::new()))
    }

    fn metadata(correlation_id: &str) -> EventMetadata {
        EventMetadata {
            event_id: Uuid::new_v4(),
            correlation_id: correlation_id.to_string(),
            traceparent: "00-aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa-bbbbbbbbbbbbbbbb-01".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn seckill_win_stages_order_created_in_outbox() {
        let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new());
        let outbox: Arc<dyn OutboxStore> = Arc::new(InMemoryOutboxStore::new());
        let deps = deps(bus, outbox.clone());

        let data = serde_json::json!({"order_id": "o-1", "product_id": "p-1", "quantity": 2});
        handle_seckill_order_won(SECKILL_ORDER_WON.to_string(), data, metadata("corr-1"), deps)
            .await
            .unwrap();

        let staged = outbox.claim_pending(10).await.unwrap();
        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].event_type, ORDER_CREATED);
        assert_eq!(staged[0].destination, Q_ORDER_EVENTS);
        assert_eq!(staged[0].payload["source"], "seckill");
    }
}
