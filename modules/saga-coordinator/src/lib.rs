//! # Saga Coordinator
//!
//! The consumer-side composition of the Order and Seckill sagas: handlers
//! that react to events published elsewhere (by the outbox publisher, by
//! upstream services) and drive the workflow state machine forward, or
//! compensate it backward on failure. This crate owns no HTTP surface and
//! no database migrations of its own beyond the process-local domain state
//! each handler reads and mutates — persistence is `outbox-core`'s job,
//! transport is `event-transport`'s.

pub mod deps;
pub mod event_types;
pub mod order_saga;
pub mod registry;
pub mod seckill;
pub mod state;

pub use deps::SagaDeps;
pub use registry::spawn_consumers;
pub use state::{DomainState, InventoryRecord, OrderRecord, OrderStatus};
