//! # Message Publisher
//!
//! Binds one publisher identity and its route to a transport producer and an
//! archive. Delivery and archival are independent best-effort effects of one
//! publish call: a failure in one never prevents the other.

use crate::archive::MessageArchive;
use crate::error::ArchiveError;
use crate::message::Message;
use crate::route::Route;
use crate::status::BusStatus;
use crate::transport::Producer;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Publishing side of one microservice.
pub struct MessagePublisher {
    name: String,
    route: RwLock<Arc<Route>>,
    producer: RwLock<Option<Box<dyn Producer>>>,
    archive: MessageArchive,
    status: Arc<BusStatus>,
}

impl MessagePublisher {
    pub(crate) fn new(
        name: impl Into<String>,
        route: Route,
        producer: Box<dyn Producer>,
        archive: MessageArchive,
        status: Arc<BusStatus>,
    ) -> Self {
        Self {
            name: name.into(),
            route: RwLock::new(Arc::new(route)),
            producer: RwLock::new(Some(producer)),
            archive,
            status,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Snapshot of the bound route.
    #[must_use]
    pub fn route(&self) -> Arc<Route> {
        self.route.read().clone()
    }

    /// Send `message` to every receiver in the route, then archive it.
    ///
    /// # Returns
    ///
    /// The number of receivers the transport accepted the message for.
    pub fn publish(&self, message: &Message) -> usize {
        let bytes = message.encode();
        if bytes.is_empty() {
            error!(publisher = %self.name, id = %message.id, "Dropping unencodable message");
            return 0;
        }

        let route = self.route();
        let mut delivered = 0;
        let mut handled = false;
        {
            let producer = self.producer.read();
            match producer.as_ref() {
                Some(producer) => {
                    handled = true;
                    for receiver in route.receivers() {
                        match producer.send(receiver, &bytes) {
                            Ok(()) => delivered += 1,
                            Err(e) => {
                                warn!(publisher = %self.name, receiver, error = %e, "Message delivery failed");
                            }
                        }
                    }
                }
                None => {
                    warn!(publisher = %self.name, id = %message.id, "Publisher closed, message not delivered");
                }
            }
        }

        match self.archive.save(&bytes, message.timestamp) {
            Ok(()) => handled = true,
            Err(ArchiveError::Closed { .. }) => {
                debug!(publisher = %self.name, id = %message.id, "Archive closed, message not archived");
            }
            Err(e) => {
                handled = true;
                error!(publisher = %self.name, id = %message.id, error = %e, "Message archiving failed");
            }
        }

        // A publisher whose handles are all closed has not processed anything.
        if !handled {
            return 0;
        }
        self.status.record_published(&self.name);
        debug!(
            publisher = %self.name,
            id = %message.id,
            receivers = delivered,
            "Message published"
        );
        delivered
    }

    /// Swap the bound route without recreating the transport handle.
    pub fn update_route(&self, route: Route) {
        *self.route.write() = Arc::new(route);
    }

    /// Archived messages with timestamps in `[from, to]`.
    pub fn message_query(&self, from: i64, to: i64) -> Result<Vec<Message>, ArchiveError> {
        self.archive.message_query(from, to)
    }

    /// Release the producer and the archive. Never fails; idempotent.
    pub fn close(&self) {
        if let Some(producer) = self.producer.write().take() {
            if let Err(e) = producer.close() {
                warn!(publisher = %self.name, error = %e, "Producer close failed");
            }
        }
        if let Err(e) = self.archive.close() {
            error!(publisher = %self.name, error = %e, "Archive close failed");
        }
    }
}

impl std::fmt::Debug for MessagePublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessagePublisher")
            .field("name", &self.name)
            .field("route", &self.route())
            .finish_non_exhaustive()
    }
}
