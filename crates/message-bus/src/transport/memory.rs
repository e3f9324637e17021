//! # In-Memory Transport
//!
//! A single-process broker: one FIFO queue per consumer name.
//!
//! - A queue exists from `create_consumer` until that consumer closes.
//!   Closing drops whatever is still queued.
//! - `send` to a name with no queue fails with `SendFailed`.
//! - If the destination has a push handler installed, the message is handed
//!   to the handler instead of being queued. Messages already queued when
//!   a handler is installed stay queued for pull.
//! - Replacing or removing a handler waits for any call of the old one to
//!   return, so no push happens after the change.
//! - After `disconnect`, every handle fails with `NotConnected`.
//!
//! Lock order is handler slot, then queue map.

use super::{Consumer, Delivery, DeliveryHandler, Producer, Transport};
use crate::error::TransportError;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Push handler of one queue, held locked while it runs.
type HandlerSlot = Arc<Mutex<Option<DeliveryHandler>>>;

#[derive(Default)]
struct Queue {
    pending: VecDeque<Vec<u8>>,
    handler: HandlerSlot,
}

#[derive(Default)]
struct Broker {
    connected: AtomicBool,
    queues: Mutex<HashMap<String, Queue>>,
    acknowledged: AtomicU64,
}

impl Broker {
    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }

    fn slot(&self, name: &str) -> Option<HandlerSlot> {
        self.queues.lock().get(name).map(|q| q.handler.clone())
    }
}

/// Broker shared by every handle it creates.
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    broker: Arc<Broker>,
}

impl InMemoryTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages queued for `name`.
    #[must_use]
    pub fn pending(&self, name: &str) -> usize {
        self.broker
            .queues
            .lock()
            .get(name)
            .map_or(0, |q| q.pending.len())
    }

    /// Whether a queue exists for `name`.
    #[must_use]
    pub fn has_queue(&self, name: &str) -> bool {
        self.broker.queues.lock().contains_key(name)
    }

    /// Whether a push handler is installed for `name`.
    #[must_use]
    pub fn has_handler(&self, name: &str) -> bool {
        self.broker
            .slot(name)
            .is_some_and(|slot| slot.lock().is_some())
    }

    /// Total acknowledged deliveries.
    #[must_use]
    pub fn acknowledged(&self) -> u64 {
        self.broker.acknowledged.load(Ordering::Relaxed)
    }
}

impl Transport for InMemoryTransport {
    fn connect(&self) -> Result<(), TransportError> {
        self.broker.connected.store(true, Ordering::Release);
        debug!("In-memory transport connected");
        Ok(())
    }

    fn disconnect(&self) {
        self.broker.connected.store(false, Ordering::Release);
        let slots: Vec<HandlerSlot> = self
            .broker
            .queues
            .lock()
            .values()
            .map(|q| q.handler.clone())
            .collect();
        for slot in slots {
            *slot.lock() = None;
        }
        debug!("In-memory transport disconnected");
    }

    fn is_connected(&self) -> bool {
        self.broker.connected.load(Ordering::Acquire)
    }

    fn create_producer(&self, name: &str) -> Result<Box<dyn Producer>, TransportError> {
        self.broker.ensure_connected()?;
        Ok(Box::new(MemoryProducer {
            name: name.to_string(),
            broker: self.broker.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    fn create_consumer(&self, name: &str) -> Result<Box<dyn Consumer>, TransportError> {
        self.broker.ensure_connected()?;
        self.broker.queues.lock().entry(name.to_string()).or_default();
        Ok(Box::new(MemoryConsumer {
            name: name.to_string(),
            broker: self.broker.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemoryDelivery {
    payload: Vec<u8>,
    broker: Arc<Broker>,
    acknowledged: AtomicBool,
}

impl Delivery for MemoryDelivery {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn acknowledge(&self) -> Result<(), TransportError> {
        if !self.acknowledged.swap(true, Ordering::AcqRel) {
            self.broker.acknowledged.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}

struct MemoryProducer {
    name: String,
    broker: Arc<Broker>,
    closed: AtomicBool,
}

impl MemoryProducer {
    fn no_queue(destination: &str) -> TransportError {
        TransportError::SendFailed {
            destination: destination.to_string(),
            reason: "no consumer registered".to_string(),
        }
    }
}

impl Producer for MemoryProducer {
    fn send(&self, destination: &str, payload: &[u8]) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::HandleClosed {
                name: self.name.clone(),
            });
        }
        self.broker.ensure_connected()?;

        let slot = self
            .broker
            .slot(destination)
            .ok_or_else(|| Self::no_queue(destination))?;
        let handler = slot.lock();
        match handler.as_ref() {
            Some(handler) => handler(Box::new(MemoryDelivery {
                payload: payload.to_vec(),
                broker: self.broker.clone(),
                acknowledged: AtomicBool::new(false),
            })),
            None => {
                let mut queues = self.broker.queues.lock();
                let queue = queues
                    .get_mut(destination)
                    .ok_or_else(|| Self::no_queue(destination))?;
                queue.pending.push_back(payload.to_vec());
            }
        }
        Ok(())
    }

    fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

struct MemoryConsumer {
    name: String,
    broker: Arc<Broker>,
    closed: AtomicBool,
}

impl MemoryConsumer {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::HandleClosed {
                name: self.name.clone(),
            });
        }
        self.broker.ensure_connected()
    }
}

impl Consumer for MemoryConsumer {
    fn receive_immediate(&self) -> Result<Option<Box<dyn Delivery>>, TransportError> {
        self.ensure_open()?;
        let payload = self
            .broker
            .queues
            .lock()
            .get_mut(&self.name)
            .and_then(|q| q.pending.pop_front());

        Ok(payload.map(|payload| {
            Box::new(MemoryDelivery {
                payload,
                broker: self.broker.clone(),
                acknowledged: AtomicBool::new(false),
            }) as Box<dyn Delivery>
        }))
    }

    fn set_message_handler(&self, handler: Option<DeliveryHandler>) -> Result<(), TransportError> {
        self.ensure_open()?;
        let slot = self
            .broker
            .slot(&self.name)
            .ok_or_else(|| TransportError::HandleClosed {
                name: self.name.clone(),
            })?;
        // Blocks until an in-flight push returns.
        *slot.lock() = handler;
        Ok(())
    }

    fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let removed = self.broker.queues.lock().remove(&self.name);
        if let Some(queue) = removed {
            *queue.handler.lock() = None;
            debug!(
                consumer = %self.name,
                dropped = queue.pending.len(),
                "In-memory queue removed"
            );
        }
        Ok(())
    }
}
