use crate::state::DomainState;
use event_transport::EventTransport;
use idempotency_store::IdempotencyStore;
use outbox_core::OutboxStore;
use std::sync::Arc;

/// Everything a saga handler needs, injected rather than reached for via
/// module-level globals (see the module-level-shared-state redesign note:
/// each consumer is a factory `register(deps) -> handler`).
///
/// `transport` is still held directly for consuming (`EventTransport::consume`
/// in `registry.rs`); handlers publish their outgoing events by staging them
/// through `outbox` instead of calling `transport.publish` themselves, so the
/// same transactional-outbox control flow spec.md describes applies here too
/// — a background `OutboxPublisher` (spawned in `registry.rs`) is the only
/// thing that ever hands a staged row to `transport`.
pub struct SagaDeps {
    pub idempotency: Arc<dyn IdempotencyStore>,
    pub transport: Arc<EventTransport>,
    pub outbox: Arc<dyn OutboxStore>,
    pub state: Arc<DomainState>,
}

impl SagaDeps {
    pub fn new(
        idempotency: Arc<dyn IdempotencyStore>,
        transport: Arc<EventTransport>,
        outbox: Arc<dyn OutboxStore>,
        state: Arc<DomainState>,
    ) -> Arc<Self> {
        Arc::new(Self {
            idempotency,
            transport,
            outbox,
            state,
        })
    }
}
