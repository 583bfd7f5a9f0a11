//! Wires the saga handlers to the default queue topology. Each consumer is
//! a small factory closure capturing `Arc<SagaDeps>`, spawned as its own
//! background task against `EventTransport::consume`.

use crate::deps::SagaDeps;
use crate::event_types::*;
use crate::{order_saga, seckill};
use event_transport::{ConsumeConfig, TransportError};
use outbox_core::{OutboxPublisher, PublisherConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Spawn a consumer task for every saga-coordinator queue, plus the outbox
/// publisher that drains what the handlers stage. Returns the join handles
/// so callers can await shutdown or detect a task dying.
pub fn spawn_consumers(deps: Arc<SagaDeps>) -> Vec<JoinHandle<Result<(), TransportError>>> {
    vec![
        spawn(deps.clone(), Q_ORDER_EVENTS, dispatch_order_event),
        spawn(deps.clone(), Q_INVENTORY_EVENTS, dispatch_inventory_event),
        spawn(deps.clone(), Q_PAYMENT_EVENTS, dispatch_payment_event),
        spawn(deps.clone(), Q_ORDER_SECKILL, seckill::handle_seckill_order_won),
        spawn_outbox_publisher(deps),
    ]
}

/// Drain `deps.outbox` onto `deps.transport` on a short fixed poll, rather
/// than `OutboxPublisher::run`'s own loop (which adds up to 250ms of jitter
/// per tick) — a saga leg waiting on the next handler's turn would otherwise
/// see highly variable latency between legs.
fn spawn_outbox_publisher(deps: Arc<SagaDeps>) -> JoinHandle<Result<(), TransportError>> {
    tokio::spawn(async move {
        let publisher = OutboxPublisher::new(
            deps.outbox.clone(),
            deps.transport.clone(),
            PublisherConfig {
                batch_size: 100,
                poll_interval: Duration::from_millis(20),
                max_attempts: 5,
            },
        );
        loop {
            if let Err(err) = publisher.publish_batch().await {
                tracing::error!(error = %err, "error draining saga-coordinator outbox");
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
}

fn spawn<F, Fut>(deps: Arc<SagaDeps>, queue: &'static str, handler: F) -> JoinHandle<Result<(), TransportError>>
where
    F: Fn(String, serde_json::Value, event_transport::EventMetadata, Arc<SagaDeps>) -> Fut + Send + Sync + Clone + 'static,
    Fut: std::future::Future<Output = Result<(), event_transport::HandlerOutcome>> + Send,
{
    tokio::spawn(async move {
        let transport = deps.transport.clone();
        transport
            .consume(queue, None, ConsumeConfig::default(), move |event_type, data, metadata| {
                let deps = deps.clone();
                let handler = handler.clone();
                async move { handler(event_type, data, metadata, deps).await }
            })
            .await
    })
}

/// `q.order.events` also carries this module's own terminal outputs
/// (`ORDER_CONFIRMED`, `ORDER_CANCELLED`) for downstream consumers such as
/// notifications, plus `ORDER_TIMEOUT` — the Timeout Worker's compensation
/// for an `ORDER_CREATED` outbox row whose saga never got a reply in time.
/// Only `ORDER_CREATED` starts a new saga here; `ORDER_TIMEOUT` cancels one
/// in flight the same way a failed leg would.
async fn dispatch_order_event(
    event_type: String,
    data: serde_json::Value,
    metadata: event_transport::EventMetadata,
    deps: Arc<SagaDeps>,
) -> Result<(), event_transport::HandlerOutcome> {
    match event_type.as_str() {
        ORDER_CREATED => order_saga::handle_order_created(event_type, data, metadata, deps).await,
        ORDER_TIMEOUT => order_saga::handle_saga_failure(event_type, data, metadata, deps).await,
        _ => Ok(()),
    }
}

/// `q.inventory.events` carries both the events this module itself emits
/// (`INVENTORY_RESERVED`, `INVENTORY_RESERVE_FAILED`, `RELEASE`) and an
/// upstream service's own naming for the reservation fact
/// (`STOCK_RESERVED`). Both of the "reserved" spellings drive the same saga
/// leg; `RELEASE` is the compensation that actually returns stock to
/// `available`, whether it was emitted by `handle_saga_failure` or by the
/// Timeout Worker's `RESERVE → RELEASE` mapping.
async fn dispatch_inventory_event(
    event_type: String,
    data: serde_json::Value,
    metadata: event_transport::EventMetadata,
    deps: Arc<SagaDeps>,
) -> Result<(), event_transport::HandlerOutcome> {
    match event_type.as_str() {
        INVENTORY_RESERVED | STOCK_RESERVED => {
            order_saga::handle_inventory_reserved(event_type, data, metadata, deps).await
        }
        INVENTORY_RESERVE_FAILED => order_saga::handle_saga_failure(event_type, data, metadata, deps).await,
        RELEASE => order_saga::handle_release(event_type, data, metadata, deps).await,
        _ => Ok(()),
    }
}

/// `PAYMENT_CANCEL` is the Timeout Worker's compensation for an expired
/// `PAYMENT_INITIATED` outbox row (spec seed scenario: payment service
/// down); it cancels the order the same way a `PAYMENT_FAILED` reply would.
async fn dispatch_payment_event(
    event_type: String,
    data: serde_json::Value,
    metadata: event_transport::EventMetadata,
    deps: Arc<SagaDeps>,
) -> Result<(), event_transport::HandlerOutcome> {
    match event_type.as_str() {
        PAYMENT_INITIATED => order_saga::handle_payment_initiated(event_type, data, metadata, deps).await,
        PAYMENT_SUCCEEDED => order_saga::handle_payment_succeeded(event_type, data, metadata, deps).await,
        PAYMENT_FAILED | PAYMENT_CANCEL => order_saga::handle_saga_failure(event_type, data, metadata, deps).await,
        _ => Ok(()),
    }
}
