//! # Message Bus Facade
//!
//! The entry point outside callers (API layer, microservice adapters) use to
//! publish, pull and query without touching the orchestrator directly.

use crate::bus::MessageBus;
use crate::error::BusError;
use crate::id::current_time_millis;
use crate::message::Message;
use std::sync::Arc;
use tracing::debug;

/// Thin facade over a shared [`MessageBus`].
#[derive(Debug, Clone)]
pub struct MessageBusUtil {
    bus: Arc<MessageBus>,
}

impl MessageBusUtil {
    #[must_use]
    pub fn new(bus: Arc<MessageBus>) -> Self {
        Self { bus }
    }

    #[must_use]
    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    /// Publish `message` on behalf of `message.publisher`.
    ///
    /// An empty id is replaced with a fresh one and a zero timestamp with the
    /// current time. Returns the message as published.
    pub fn publish(&self, mut message: Message) -> Result<Message, BusError> {
        if !self.bus.is_running() {
            return Err(BusError::NotRunning);
        }
        let Some(publisher) = self.bus.get_publisher(&message.publisher) else {
            debug!(publisher = %message.publisher, "Publish from unrouted microservice");
            return Err(BusError::UnknownPublisher(message.publisher));
        };

        if message.timestamp == 0 {
            message.timestamp = current_time_millis();
        }
        if message.id.is_empty() {
            message.id = self.bus.next_id();
        }
        publisher.publish(&message);
        Ok(message)
    }

    /// Pull every message queued for `receiver`.
    #[must_use]
    pub fn get_messages(&self, receiver: &str) -> Vec<Message> {
        match self.bus.get_receiver(receiver) {
            Some(r) => r.get_messages(),
            None => {
                debug!(receiver, "Pull for unknown receiver");
                Vec::new()
            }
        }
    }

    /// Archived messages of `publisher` in `[from, to]`, as seen by `receiver`.
    ///
    /// `receiver` must be in `publisher`'s route.
    pub fn message_query(
        &self,
        publisher: &str,
        receiver: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<Message>, BusError> {
        if from > to {
            return Err(BusError::InvalidTimeRange { from, to });
        }
        let route = self
            .bus
            .get_route(publisher)
            .ok_or_else(|| BusError::UnknownPublisher(publisher.to_string()))?;
        if !route.contains(receiver) {
            return Err(BusError::NotRouted {
                publisher: publisher.to_string(),
                receiver: receiver.to_string(),
            });
        }
        let handle = self
            .bus
            .get_publisher(publisher)
            .ok_or_else(|| BusError::UnknownPublisher(publisher.to_string()))?;
        Ok(handle.message_query(from, to)?)
    }

    pub fn enable_real_time_receiving(&self, receiver: &str) -> bool {
        self.bus.enable_real_time_receiving(receiver)
    }

    pub fn disable_real_time_receiving(&self, receiver: &str) -> bool {
        self.bus.disable_real_time_receiving(receiver)
    }

    #[must_use]
    pub fn next_id(&self) -> String {
        self.bus.next_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ArchiveConfig, BusConfig, StaticRoutingSource};
    use crate::route::Route;
    use crate::transport::InMemoryTransport;
    use std::collections::HashMap;
    use tempfile::TempDir;

    async fn started(dir: &TempDir) -> MessageBusUtil {
        let config = BusConfig {
            archive: ArchiveConfig {
                base_dir: dir.path().to_path_buf(),
                ..ArchiveConfig::default()
            },
            ..BusConfig::default()
        };
        let source = Arc::new(StaticRoutingSource::new());
        source.set_routes(HashMap::from([("A".to_string(), Route::new(["B"]))]));
        let bus = Arc::new(MessageBus::new(
            config,
            Arc::new(InMemoryTransport::new()),
            source,
        ));
        bus.start().await.unwrap();
        MessageBusUtil::new(bus)
    }

    #[tokio::test]
    async fn test_publish_stamps_id_and_timestamp() {
        let dir = TempDir::new().unwrap();
        let util = started(&dir).await;

        let published = util.publish(Message {
            publisher: "A".to_string(),
            ..Message::default()
        });
        let published = published.unwrap();
        assert_eq!(published.id.len(), 32);
        assert!(published.timestamp > 0);
        assert_eq!(util.get_messages("B"), vec![published]);
    }

    #[tokio::test]
    async fn test_publish_unknown_publisher() {
        let dir = TempDir::new().unwrap();
        let util = started(&dir).await;
        let result = util.publish(Message::new("Z"));
        assert!(matches!(result, Err(BusError::UnknownPublisher(p)) if p == "Z"));
    }

    #[tokio::test]
    async fn test_publish_requires_running_bus() {
        let dir = TempDir::new().unwrap();
        let util = started(&dir).await;
        util.bus().stop().await;
        assert!(matches!(
            util.publish(Message::new("A")),
            Err(BusError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn test_query_validates_route() {
        let dir = TempDir::new().unwrap();
        let util = started(&dir).await;
        let mut message = Message::new("A");
        message.timestamp = 5_000;
        util.publish(message).unwrap();

        assert_eq!(util.message_query("A", "B", 0, 10_000).unwrap().len(), 1);
        assert!(matches!(
            util.message_query("A", "C", 0, 10_000),
            Err(BusError::NotRouted { .. })
        ));
        assert!(matches!(
            util.message_query("Q", "B", 0, 10_000),
            Err(BusError::UnknownPublisher(_))
        ));
        assert!(matches!(
            util.message_query("A", "B", 10, 0),
            Err(BusError::InvalidTimeRange { from: 10, to: 0 })
        ));
    }

    #[tokio::test]
    async fn test_get_messages_unknown_receiver() {
        let dir = TempDir::new().unwrap();
        let util = started(&dir).await;
        assert!(util.get_messages("nobody").is_empty());
    }
}
