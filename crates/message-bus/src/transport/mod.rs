//! # Transport Boundary
//!
//! The bus does not move bytes itself. It asks a transport for one producer
//! handle per publisher and one consumer handle per receiver, keyed by
//! microservice identity.
//!
//! Raw deliveries are decoded into [`Message`](crate::Message) by the
//! receiver as soon as they cross this boundary.

mod memory;

pub use memory::InMemoryTransport;

use crate::error::TransportError;
use std::sync::Arc;

/// A raw message handed over by the transport.
pub trait Delivery: Send {
    /// The undecoded message bytes.
    fn payload(&self) -> &[u8];

    /// Confirm the message was taken; the transport will not redeliver it.
    fn acknowledge(&self) -> Result<(), TransportError>;
}

/// Push-mode callback invoked on the transport's delivery thread.
pub type DeliveryHandler = Arc<dyn Fn(Box<dyn Delivery>) + Send + Sync>;

/// Sending side bound to one publisher identity.
pub trait Producer: Send + Sync {
    /// Send `payload` to the consumer named `destination`.
    fn send(&self, destination: &str, payload: &[u8]) -> Result<(), TransportError>;

    /// Release the handle. Idempotent.
    fn close(&self) -> Result<(), TransportError>;
}

/// Receiving side bound to one receiver identity.
pub trait Consumer: Send + Sync {
    /// Take the next queued message without blocking.
    fn receive_immediate(&self) -> Result<Option<Box<dyn Delivery>>, TransportError>;

    /// Install (`Some`) or remove (`None`) the push-mode handler.
    fn set_message_handler(&self, handler: Option<DeliveryHandler>) -> Result<(), TransportError>;

    /// Release the handle. Idempotent.
    fn close(&self) -> Result<(), TransportError>;
}

/// Connection to the message transport.
pub trait Transport: Send + Sync {
    fn connect(&self) -> Result<(), TransportError>;

    fn disconnect(&self);

    fn is_connected(&self) -> bool;

    fn create_producer(&self, name: &str) -> Result<Box<dyn Producer>, TransportError>;

    fn create_consumer(&self, name: &str) -> Result<Box<dyn Consumer>, TransportError>;
}
