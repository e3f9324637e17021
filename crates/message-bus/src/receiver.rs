//! # Message Receiver
//!
//! Binds one receiver identity to a transport consumer. Two delivery modes
//! share the consumer and never run at the same time:
//!
//! - **Pull**: [`MessageReceiver::get_messages`] drains whatever is queued.
//! - **Push**: while real-time receiving is enabled, every arriving message
//!   is decoded on the transport's delivery thread and handed to the
//!   real-time channel given at construction. Pull then returns nothing.

use crate::message::Message;
use crate::transport::{Consumer, Delivery, DeliveryHandler};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// A message pushed to a real-time listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealTimeDelivery {
    /// Receiver identity the message was routed to.
    pub receiver: String,
    pub message: Message,
}

/// Sending half of the real-time hand-off channel.
pub type RealTimeSink = mpsc::UnboundedSender<RealTimeDelivery>;

struct State {
    consumer: Option<Box<dyn Consumer>>,
    real_time: bool,
}

/// Receiving side of one microservice.
pub struct MessageReceiver {
    name: String,
    state: Mutex<State>,
    sink: RealTimeSink,
}

impl MessageReceiver {
    pub(crate) fn new(name: impl Into<String>, consumer: Box<dyn Consumer>, sink: RealTimeSink) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(State {
                consumer: Some(consumer),
                real_time: false,
            }),
            sink,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn is_real_time(&self) -> bool {
        self.state.lock().real_time
    }

    /// Drain every queued message without blocking.
    ///
    /// Returns nothing while real-time receiving is enabled.
    pub fn get_messages(&self) -> Vec<Message> {
        let state = self.state.lock();
        if state.real_time {
            return Vec::new();
        }
        let Some(consumer) = state.consumer.as_ref() else {
            debug!(receiver = %self.name, "Pull on closed receiver");
            return Vec::new();
        };

        let mut messages = Vec::new();
        loop {
            let delivery = match consumer.receive_immediate() {
                Ok(Some(delivery)) => delivery,
                Ok(None) => break,
                Err(e) => {
                    warn!(receiver = %self.name, error = %e, "Message pull failed");
                    break;
                }
            };
            if let Some(message) = take_delivery(&self.name, delivery.as_ref()) {
                messages.push(message);
            }
        }
        messages
    }

    /// Push every arriving message to the real-time channel.
    pub fn enable_real_time_receiving(&self) {
        let mut state = self.state.lock();
        let Some(consumer) = state.consumer.as_ref() else {
            debug!(receiver = %self.name, "Real-time enable on closed receiver ignored");
            return;
        };

        let name = self.name.clone();
        let sink = self.sink.clone();
        let handler: DeliveryHandler = Arc::new(move |delivery: Box<dyn Delivery>| {
            let Some(message) = take_delivery(&name, delivery.as_ref()) else {
                return;
            };
            let pushed = RealTimeDelivery {
                receiver: name.clone(),
                message,
            };
            if sink.send(pushed).is_err() {
                debug!(receiver = %name, "Real-time listener gone, message dropped");
            }
        });

        match consumer.set_message_handler(Some(handler)) {
            Ok(()) => {
                state.real_time = true;
                debug!(receiver = %self.name, "Real-time receiving enabled");
            }
            Err(e) => error!(receiver = %self.name, error = %e, "Real-time enable failed"),
        }
    }

    /// Stop pushing; queued messages become available to pull again.
    pub fn disable_real_time_receiving(&self) {
        let mut state = self.state.lock();
        let Some(consumer) = state.consumer.as_ref() else {
            debug!(receiver = %self.name, "Real-time disable on closed receiver ignored");
            return;
        };
        if let Err(e) = consumer.set_message_handler(None) {
            warn!(receiver = %self.name, error = %e, "Real-time disable failed");
        }
        state.real_time = false;
        debug!(receiver = %self.name, "Real-time receiving disabled");
    }

    /// Disable real-time receiving and release the consumer. Never fails; idempotent.
    pub fn close(&self) {
        self.disable_real_time_receiving();
        if let Some(consumer) = self.state.lock().consumer.take() {
            if let Err(e) = consumer.close() {
                warn!(receiver = %self.name, error = %e, "Consumer close failed");
            }
        }
    }
}

impl std::fmt::Debug for MessageReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageReceiver")
            .field("name", &self.name)
            .field("real_time", &self.is_real_time())
            .finish_non_exhaustive()
    }
}

/// Decode and acknowledge one delivery. Undecodable messages are acknowledged
/// too so the transport does not redeliver them.
fn take_delivery(receiver: &str, delivery: &dyn Delivery) -> Option<Message> {
    let decoded = Message::decode(delivery.payload());
    if let Err(e) = delivery.acknowledge() {
        warn!(receiver, error = %e, "Message acknowledge failed");
    }
    match decoded {
        Ok(message) => Some(message),
        Err(e) => {
            error!(receiver, error = %e, "Discarding undecodable message");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{InMemoryTransport, Producer, Transport};

    struct Fixture {
        transport: InMemoryTransport,
        producer: Box<dyn Producer>,
        receiver: MessageReceiver,
        rx: mpsc::UnboundedReceiver<RealTimeDelivery>,
    }

    fn fixture() -> Fixture {
        let transport = InMemoryTransport::new();
        transport.connect().unwrap();
        let producer = transport.create_producer("A").unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let receiver = MessageReceiver::new("B", transport.create_consumer("B").unwrap(), tx);
        Fixture {
            transport,
            producer,
            receiver,
            rx,
        }
    }

    fn send(f: &Fixture, id: &str) {
        let message = Message {
            id: id.to_string(),
            publisher: "A".to_string(),
            timestamp: 1_000,
            ..Message::default()
        };
        f.producer.send("B", &message.encode()).unwrap();
    }

    fn ids(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn test_pull_drains_and_acknowledges() {
        let f = fixture();
        send(&f, "m1");
        send(&f, "m2");

        assert_eq!(ids(&f.receiver.get_messages()), vec!["m1", "m2"]);
        assert!(f.receiver.get_messages().is_empty());
        assert_eq!(f.transport.acknowledged(), 2);
    }

    #[test]
    fn test_pull_skips_undecodable() {
        let f = fixture();
        f.producer.send("B", b"garbage").unwrap();
        send(&f, "m1");

        assert_eq!(ids(&f.receiver.get_messages()), vec!["m1"]);
        assert_eq!(f.transport.acknowledged(), 2);
    }

    #[test]
    fn test_real_time_excludes_pull() {
        let mut f = fixture();
        send(&f, "queued");

        f.receiver.enable_real_time_receiving();
        assert!(f.receiver.is_real_time());
        assert!(f.receiver.get_messages().is_empty());

        send(&f, "live");
        let pushed = f.rx.try_recv().unwrap();
        assert_eq!(pushed.receiver, "B");
        assert_eq!(pushed.message.id, "live");

        f.receiver.disable_real_time_receiving();
        assert_eq!(ids(&f.receiver.get_messages()), vec!["queued"]);
        assert!(f.rx.try_recv().is_err());
    }

    #[test]
    fn test_close_idempotent_and_soft() {
        let f = fixture();
        f.receiver.enable_real_time_receiving();
        f.receiver.close();
        f.receiver.close();

        assert!(!f.receiver.is_real_time());
        assert!(!f.transport.has_handler("B"));
        assert!(f.receiver.get_messages().is_empty());
        f.receiver.enable_real_time_receiving();
        assert!(!f.receiver.is_real_time());
    }

    #[test]
    fn test_dropped_listener_does_not_break_delivery() {
        let f = fixture();
        let Fixture {
            producer,
            receiver,
            rx,
            ..
        } = f;
        drop(rx);
        receiver.enable_real_time_receiving();
        let message = Message {
            id: "m1".to_string(),
            ..Message::default()
        };
        producer.send("B", &message.encode()).unwrap();
        assert!(receiver.is_real_time());
    }
}
