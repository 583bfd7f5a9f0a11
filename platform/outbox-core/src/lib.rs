//! # Outbox Core
//!
//! The transactional outbox: a store for staging domain events inside the
//! same database transaction as the business write that produced them, a
//! publisher that drains the store onto the event transport, and a timeout
//! worker that compensates sagas whose awaited reply never arrived.
//!
//! An `OutboxEvent` moves `PENDING → {PUBLISHED, FAILED, TIMEOUT}` and never
//! backwards. It is owned by the Publisher and Timeout Worker only; nothing
//! else mutates it once staged.

mod compensation;
mod publisher;
mod store;
mod timeout_worker;

pub use compensation::{compensation_for, CompensationMapping};
pub use publisher::{OutboxPublisher, PublisherConfig};
pub use store::{OutboxError, OutboxEvent, OutboxStatus, OutboxStore};
pub use timeout_worker::{TimeoutWorker, TimeoutWorkerConfig};

#[cfg(any(test, feature = "test-util"))]
pub use store::fake::InMemoryOutboxStore;
