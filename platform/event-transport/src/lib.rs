//! # Event Transport
//!
//! The resilient publish/subscribe facade layered over `event-bus`: it
//! builds the wire envelope, applies the schema registry, injects trace
//! context, and routes deliveries that exhaust their retries (or fail
//! validation) to the queue's dead-letter subject.

mod envelope;
mod error;
mod reconnect;
mod transport;

pub use envelope::{EventEnvelope, EventMetadata};
pub use error::{HandlerOutcome, TransportError};
pub use reconnect::connect_with_backoff;
pub use transport::{ConsumeConfig, EventTransport, PublishOptions};
