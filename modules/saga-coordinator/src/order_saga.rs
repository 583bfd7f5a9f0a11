//! Order Saga: `CREATED → STOCK_RESERVED → PAYMENT_SUCCEEDED → CONFIRMED`,
//! with cross-cuts to `CANCELLED` on any failed leg.
//!
//! Each handler below is idempotent on a business-meaningful key (derived
//! from the order id, not the envelope's `event_id`) so that redelivery of
//! any leg — including a duplicate outbox publish — never double-applies.

use crate::deps::SagaDeps;
use crate::event_types::*;
use crate::state::OrderStatus;
use event_transport::{EventMetadata, HandlerOutcome};
use outbox_core::OutboxEvent;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct OrderCreatedPayload {
    order_id: String,
    product_id: String,
    quantity: i64,
    #[serde(default)]
    source: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReservationPayload {
    order_id: String,
}

#[derive(Debug, Deserialize)]
struct ReleasePayload {
    order_id: String,
    product_id: String,
    quantity: i64,
}

#[derive(Debug, Deserialize)]
struct PaymentPayload {
    order_id: String,
    #[serde(default)]
    simulate_failure: bool,
}

fn parse<T: for<'de> Deserialize<'de>>(data: &Value) -> Result<T, HandlerOutcome> {
    serde_json::from_value(data.clone()).map_err(|e| HandlerOutcome::Permanent(format!("malformed payload: {e}")))
}

/// Stage the next saga leg's event in the outbox rather than publishing it
/// to the transport directly. A background `OutboxPublisher` (spawned in
/// `registry.rs`) drains staged rows onto `deps.transport`, so a handler
/// crash between staging and the caller's own state mutation being visible
/// never loses the outgoing event the way a direct `transport.publish`
/// would if the process died right after it.
async fn publish(
    deps: &SagaDeps,
    destination: &str,
    event_type: &str,
    data: Value,
    correlation_id: &str,
) -> Result<(), HandlerOutcome> {
    let event = OutboxEvent::new(correlation_id, event_type, destination, data);
    deps.outbox
        .stage(&event)
        .await
        .map_err(|e| HandlerOutcome::Retryable(e.to_string()))?;
    Ok(())
}

/// Run `action` only if `(consumer_name, key)` hasn't been seen before,
/// then record it. `idempotency_store::IdempotencyStore::process_idempotent`
/// isn't used directly here because its generic error bound would require
/// `HandlerOutcome` to implement `From<IdempotencyError>` across a crate
/// boundary neither type owns.
async fn idempotent<F, Fut>(
    deps: &SagaDeps,
    consumer_name: &str,
    key: &str,
    action: F,
) -> Result<(), HandlerOutcome>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<(), HandlerOutcome>>,
{
    let already_seen = deps
        .idempotency
        .is_processed(consumer_name, key)
        .await
        .map_err(|e| HandlerOutcome::Retryable(e.to_string()))?;

    if already_seen {
        tracing::info!(consumer_name, idempotency_key = key, "duplicate event ignored");
        return Ok(());
    }

    action().await?;

    deps.idempotency
        .mark_as_processed(consumer_name, key, idempotency_store::DEFAULT_TTL)
        .await
        .map_err(|e| HandlerOutcome::Retryable(e.to_string()))?;

    Ok(())
}

/// `ORDER_CREATED` → Inventory attempts `RESERVE`; emits `INVENTORY_RESERVED`
/// or `INVENTORY_RESERVE_FAILED`.
pub async fn handle_order_created(
    _event_type: String,
    data: Value,
    metadata: EventMetadata,
    deps: Arc<SagaDeps>,
) -> Result<(), HandlerOutcome> {
    let payload: OrderCreatedPayload = parse(&data)?;
    let key = format!("order:create:{}", payload.order_id);

    idempotent(&deps, "saga-coordinator:order-created", &key, || async {
        deps.state.create_order(
            payload.order_id.clone(),
            payload.product_id.clone(),
            payload.quantity,
            payload.source.clone(),
        );

        let reserved = deps.state.try_reserve(&payload.product_id, payload.quantity);
        let event_data = serde_json::json!({
            "order_id": payload.order_id,
            "product_id": payload.product_id,
            "quantity": payload.quantity,
        });

        if reserved {
            publish(&deps, Q_INVENTORY_EVENTS, INVENTORY_RESERVED, event_data, &metadata.correlation_id).await
        } else {
            deps.state.set_order_status(&payload.order_id, OrderStatus::Cancelled);
            publish(&deps, Q_INVENTORY_EVENTS, INVENTORY_RESERVE_FAILED, event_data, &metadata.correlation_id).await
        }
    })
    .await
}

/// `INVENTORY_RESERVED` / `STOCK_RESERVED` → Payment attempts charge.
pub async fn handle_inventory_reserved(
    _event_type: String,
    data: Value,
    metadata: EventMetadata,
    deps: Arc<SagaDeps>,
) -> Result<(), HandlerOutcome> {
    let payload: ReservationPayload = parse(&data)?;
    let key = format!("order:resv:{}", payload.order_id);

    idempotent(&deps, "saga-coordinator:inventory-reserved", &key, || async {
        deps.state.set_order_status(&payload.order_id, OrderStatus::StockReserved);

        let event_data = serde_json::json!({"order_id": payload.order_id});
        publish(&deps, Q_PAYMENT_EVENTS, PAYMENT_INITIATED, event_data, &metadata.correlation_id).await
    })
    .await
}

/// `PAYMENT_INITIATED` → simulate the charge and emit the outcome. The
/// charge itself is a stand-in; real payment processing belongs to the
/// Payment service's own business logic, out of scope here.
pub async fn handle_payment_initiated(
    _event_type: String,
    data: Value,
    metadata: EventMetadata,
    deps: Arc<SagaDeps>,
) -> Result<(), HandlerOutcome> {
    let payload: PaymentPayload = parse(&data)?;
    let key = format!("order:pay:{}", payload.order_id);

    idempotent(&deps, "saga-coordinator:payment-initiated", &key, || async {
        let event_data = serde_json::json!({"order_id": payload.order_id});
        if payload.simulate_failure {
            publish(&deps, Q_PAYMENT_EVENTS, PAYMENT_FAILED, event_data, &metadata.correlation_id).await
        } else {
            publish(&deps, Q_PAYMENT_EVENTS, PAYMENT_SUCCEEDED, event_data, &metadata.correlation_id).await
        }
    })
    .await
}

/// `PAYMENT_SUCCEEDED` → Order marks `CONFIRMED`; Inventory converts the
/// reservation to consumption.
pub async fn handle_payment_succeeded(
    _event_type: String,
    data: Value,
    metadata: EventMetadata,
    deps: Arc<SagaDeps>,
) -> Result<(), HandlerOutcome> {
    let payload: PaymentPayload = parse(&data)?;
    let key = format!("order:confirm:{}", payload.order_id);

    idempotent(&deps, "saga-coordinator:payment-succeeded", &key, || async {
        if let Some(order) = deps.state.order(&payload.order_id) {
            deps.state.consume_reservation(&order.product_id, order.quantity);
        }
        deps.state.set_order_status(&payload.order_id, OrderStatus::Confirmed);

        let event_data = serde_json::json!({"order_id": payload.order_id});
        publish(&deps, Q_ORDER_EVENTS, ORDER_CONFIRMED, event_data, &metadata.correlation_id).await
    })
    .await
}

/// `PAYMENT_FAILED`, `PAYMENT_CANCEL`, `INVENTORY_RESERVE_FAILED`, or
/// `ORDER_TIMEOUT` → Order marks `CANCELLED`; compensation `RELEASE` is
/// emitted (not applied directly) if stock had been reserved, so that
/// `handle_release` is the single place stock actually moves back to
/// `available` regardless of which leg's failure or timeout triggered it.
pub async fn handle_saga_failure(
    _event_type: String,
    data: Value,
    metadata: EventMetadata,
    deps: Arc<SagaDeps>,
) -> Result<(), HandlerOutcome> {
    let payload: PaymentPayload = parse(&data)?;
    let key = format!("order:cancel:{}", payload.order_id);

    idempotent(&deps, "saga-coordinator:saga-failure", &key, || async {
        let order = deps.state.order(&payload.order_id);
        deps.state.set_order_status(&payload.order_id, OrderStatus::Cancelled);

        if let Some(order) = order {
            if order.status == OrderStatus::StockReserved {
                let release_data = serde_json::json!({
                    "order_id": payload.order_id,
                    "product_id": order.product_id,
                    "quantity": order.quantity,
                });
                publish(&deps, Q_INVENTORY_EVENTS, RELEASE, release_data, &metadata.correlation_id).await?;
            }
        }

        let event_data = serde_json::json!({"order_id": payload.order_id});
        publish(&deps, Q_ORDER_EVENTS, ORDER_CANCELLED, event_data, &metadata.correlation_id).await
    })
    .await
}

/// `RELEASE` → move the reservation back from `reserved` to `available`.
/// The sole consumer of this event type: whether it originates from
/// `handle_saga_failure`'s own emission or from the Timeout Worker's
/// `RESERVE → RELEASE` compensation mapping, this is where the stock count
/// actually moves, guarded by `order_id` so redelivery or a second
/// compensating trigger for the same order never double-releases.
pub async fn handle_release(
    _event_type: String,
    data: Value,
    metadata: EventMetadata,
    deps: Arc<SagaDeps>,
) -> Result<(), HandlerOutcome> {
    let payload: ReleasePayload = parse(&data)?;
    let key = format!("order:release:{}", payload.order_id);

    idempotent(&deps, "saga-coordinator:release", &key, || async {
        deps.state.release(&payload.product_id, payload.quantity);
        tracing::info!(
            order_id = %payload.order_id,
            product_id = %payload.product_id,
            quantity = payload.quantity,
            correlation_id = %metadata.correlation_id,
            "inventory reservation released"
        );
        Ok(())
    })
    .await
}
