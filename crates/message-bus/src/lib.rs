//! # Message Bus - Routing Core for Edge Microservices
//!
//! Turns "microservice A is wired to microservices {B, C}" into message
//! delivery, short-term persistent history and real-time push, independent of
//! the transport that actually moves the bytes.
//!
//! ## Data Flow
//!
//! ```text
//!  RoutingSource ──update()──→ MessageBus ──creates/drops──→ Publisher / Receiver
//!                                                                 │        │
//!  MessageBusUtil::publish(m) ──→ MessagePublisher ──send()──→ Transport ──┘
//!                                        │                             │
//!                                        ▼                     pull or real-time push
//!                                  MessageArchive                      │
//!                                        ▲                             ▼
//!  MessageBusUtil::message_query ────────┘                  RealTimeStream / Vec<Message>
//! ```
//!
//! ## Guarantees
//!
//! - **Best effort, never blocking:** delivery and archival are independent;
//!   "no message available" is a normal outcome, not a wait.
//! - **Atomic routing snapshots:** lookups never observe a half-applied
//!   reconciliation.
//! - **Single writer per archive:** concurrent publishes on one publisher
//!   serialize on that publisher's archive only.
//! - **Soft failure:** closed publishers, receivers and archives log and
//!   no-op instead of panicking.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod archive;
pub mod bus;
pub mod config;
pub mod error;
pub mod id;
pub mod message;
pub mod publisher;
pub mod receiver;
pub mod route;
pub mod status;
pub mod transport;
pub mod util;

// Re-export main types
pub use archive::MessageArchive;
pub use bus::{MessageBus, RealTimeStream};
pub use config::{ArchiveConfig, BusConfig, RoutingSource, StaticRoutingSource};
pub use error::{ArchiveError, BusError, CodecError, ConfigError, TransportError};
pub use id::MessageIdGenerator;
pub use message::{Message, MESSAGE_VERSION};
pub use publisher::MessagePublisher;
pub use receiver::{MessageReceiver, RealTimeDelivery, RealTimeSink};
pub use route::Route;
pub use status::{BusStatus, PublishedCount};
pub use transport::{Consumer, Delivery, DeliveryHandler, InMemoryTransport, Producer, Transport};
pub use util::MessageBusUtil;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_version() {
        assert_eq!(MESSAGE_VERSION, 4);
    }
}
