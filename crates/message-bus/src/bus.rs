//! # Message Bus
//!
//! The orchestrator. Holds the routing table and keeps one
//! [`MessagePublisher`] per routed publisher and one [`MessageReceiver`] per
//! routed receiver, reconciling them against the [`RoutingSource`] whenever
//! [`MessageBus::update`] runs.
//!
//! ## Snapshot Semantics
//!
//! Routes, publishers and receivers live in one immutable snapshot behind an
//! `Arc`. Reconciliation builds the next snapshot off to the side and swaps it
//! in with a single pointer store, so lookups never see a half-built table and
//! never wait behind a reconciliation or a slow publish.
//!
//! ## Lifecycle
//!
//! ```text
//! new() ──start()──→ running ──stop()──→ stopped ──start()──→ running
//!                      │  ↑
//!                      └──┘ update() / instance_config_updated()
//! ```

use crate::archive::MessageArchive;
use crate::config::{BusConfig, RoutingSource};
use crate::error::BusError;
use crate::id::MessageIdGenerator;
use crate::publisher::MessagePublisher;
use crate::receiver::{MessageReceiver, RealTimeDelivery, RealTimeSink};
use crate::route::Route;
use crate::status::BusStatus;
use crate::transport::Transport;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn};

/// Stream of messages pushed by receivers with real-time receiving enabled.
pub type RealTimeStream = UnboundedReceiverStream<RealTimeDelivery>;

#[derive(Debug, Default)]
struct BusState {
    routes: Arc<HashMap<String, Route>>,
    publishers: HashMap<String, Arc<MessagePublisher>>,
    receivers: HashMap<String, Arc<MessageReceiver>>,
}

/// Routes messages between microservices.
pub struct MessageBus {
    config: RwLock<BusConfig>,
    transport: Arc<dyn Transport>,
    source: Arc<dyn RoutingSource>,
    state: RwLock<Arc<BusState>>,
    /// Serializes reconciliation, start and stop.
    lifecycle: tokio::sync::Mutex<()>,
    status: Arc<BusStatus>,
    ids: MessageIdGenerator,
    sink: RealTimeSink,
    stream: Mutex<Option<mpsc::UnboundedReceiver<RealTimeDelivery>>>,
    sampler: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
}

impl MessageBus {
    #[must_use]
    pub fn new(
        config: BusConfig,
        transport: Arc<dyn Transport>,
        source: Arc<dyn RoutingSource>,
    ) -> Self {
        let (sink, stream) = mpsc::unbounded_channel();
        Self {
            config: RwLock::new(config),
            transport,
            source,
            state: RwLock::new(Arc::new(BusState::default())),
            lifecycle: tokio::sync::Mutex::new(()),
            status: Arc::new(BusStatus::new()),
            ids: MessageIdGenerator::new(),
            sink,
            stream: Mutex::new(Some(stream)),
            sampler: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    /// Connect the transport, start the throughput sampler and reconcile.
    ///
    /// # Errors
    ///
    /// Fails only if the transport cannot be connected.
    pub async fn start(&self) -> Result<(), BusError> {
        {
            let _guard = self.lifecycle.lock().await;
            if self.running.load(Ordering::Acquire) {
                debug!("Message bus already running");
                return Ok(());
            }

            self.transport.connect()?;
            self.running.store(true, Ordering::Release);
            self.spawn_sampler();
            info!("Message bus started");
        }
        self.update().await;
        Ok(())
    }

    /// Close every publisher and receiver and disconnect the transport.
    pub async fn stop(&self) {
        let _guard = self.lifecycle.lock().await;
        if !self.running.swap(false, Ordering::AcqRel) {
            debug!("Message bus already stopped");
            return;
        }

        if let Some(sampler) = self.sampler.lock().take() {
            sampler.abort();
        }

        let previous = std::mem::take(&mut *self.state.write());
        for publisher in previous.publishers.values() {
            publisher.close();
        }
        for receiver in previous.receivers.values() {
            receiver.close();
        }
        self.transport.disconnect();
        info!(
            publishers = previous.publishers.len(),
            receivers = previous.receivers.len(),
            "Message bus stopped"
        );
    }

    /// Reconcile publishers and receivers against the routing source.
    ///
    /// Source failures leave the current table in place.
    pub async fn update(&self) {
        let _guard = self.lifecycle.lock().await;
        if !self.running.load(Ordering::Acquire) {
            debug!("Message bus not running, reconciliation skipped");
            return;
        }

        let routes = match self.source.routes().await {
            Ok(routes) => routes,
            Err(e) => {
                warn!(error = %e, "Routing table unavailable, keeping current routes");
                return;
            }
        };
        let known = match self.source.microservices().await {
            Ok(known) => known,
            Err(e) => {
                warn!(error = %e, "Microservice list unavailable, keeping current routes");
                return;
            }
        };

        self.reconcile(routes, &known);
        self.status.sync_microservices(&known);
    }

    /// Apply a new configuration, restarting the bus if it is running.
    pub async fn instance_config_updated(&self, config: BusConfig) -> Result<(), BusError> {
        let changed = *self.config.read() != config;
        *self.config.write() = config;
        if !changed || !self.is_running() {
            return Ok(());
        }

        info!("Bus configuration changed, reconnecting");
        self.stop().await;
        self.start().await
    }

    fn reconcile(&self, desired: HashMap<String, Route>, known: &HashSet<String>) {
        let current = self.state.read().clone();
        let archive_config = self.config.read().archive.clone();

        let mut routes = HashMap::new();
        for (publisher, route) in desired {
            if !known.contains(&publisher) {
                debug!(publisher = %publisher, "Route for unknown microservice ignored");
                continue;
            }
            let route = route.filtered(|receiver| known.contains(receiver));
            if route.is_empty() {
                continue;
            }
            routes.insert(publisher, route);
        }

        // Consumers first, so every route a publisher holds has a queue behind it.
        let wanted: HashSet<&str> = routes.values().flat_map(Route::receivers).collect();
        let mut receivers = HashMap::new();
        for name in wanted {
            if let Some(existing) = current.receivers.get(name) {
                receivers.insert(name.to_string(), existing.clone());
                continue;
            }
            match self.transport.create_consumer(name) {
                Ok(consumer) => {
                    let receiver = MessageReceiver::new(name, consumer, self.sink.clone());
                    receivers.insert(name.to_string(), Arc::new(receiver));
                    debug!(receiver = %name, "Receiver created");
                }
                Err(e) => error!(receiver = %name, error = %e, "Consumer creation failed"),
            }
        }

        let mut publishers = HashMap::new();
        for (name, route) in &routes {
            if let Some(existing) = current.publishers.get(name) {
                if *existing.route() != *route {
                    existing.update_route(route.clone());
                    debug!(publisher = %name, "Publisher route updated");
                }
                publishers.insert(name.clone(), existing.clone());
                continue;
            }
            match self.transport.create_producer(name) {
                Ok(producer) => {
                    let archive = MessageArchive::new(name.as_str(), archive_config.clone());
                    let publisher = MessagePublisher::new(
                        name.as_str(),
                        route.clone(),
                        producer,
                        archive,
                        self.status.clone(),
                    );
                    publishers.insert(name.clone(), Arc::new(publisher));
                    debug!(publisher = %name, "Publisher created");
                }
                Err(e) => error!(publisher = %name, error = %e, "Producer creation failed"),
            }
        }

        let next = BusState {
            routes: Arc::new(routes),
            publishers,
            receivers,
        };
        let (publisher_count, receiver_count) = (next.publishers.len(), next.receivers.len());
        *self.state.write() = Arc::new(next);

        for (name, publisher) in &current.publishers {
            if !self.state.read().publishers.contains_key(name) {
                publisher.close();
                debug!(publisher = %name, "Publisher removed");
            }
        }
        for (name, receiver) in &current.receivers {
            if !self.state.read().receivers.contains_key(name) {
                receiver.close();
                debug!(receiver = %name, "Receiver removed");
            }
        }

        info!(
            publishers = publisher_count,
            receivers = receiver_count,
            "Routing reconciled"
        );
    }

    fn spawn_sampler(&self) {
        let status = self.status.clone();
        let period = self.config.read().throughput_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let speed = status.sample_throughput();
                debug!(messages_per_sec = speed, "Throughput sampled");
            }
        });
        if let Some(previous) = self.sampler.lock().replace(handle) {
            previous.abort();
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn get_publisher(&self, id: &str) -> Option<Arc<MessagePublisher>> {
        self.state.read().publishers.get(id).cloned()
    }

    #[must_use]
    pub fn get_receiver(&self, id: &str) -> Option<Arc<MessageReceiver>> {
        self.state.read().receivers.get(id).cloned()
    }

    /// The active routing table.
    #[must_use]
    pub fn get_routes(&self) -> Arc<HashMap<String, Route>> {
        self.state.read().routes.clone()
    }

    #[must_use]
    pub fn get_route(&self, publisher: &str) -> Option<Route> {
        self.state.read().routes.get(publisher).cloned()
    }

    /// Switch `id` to push mode. Unknown or empty ids are ignored.
    pub fn enable_real_time_receiving(&self, id: &str) -> bool {
        match self.lookup_receiver(id) {
            Some(receiver) => {
                receiver.enable_real_time_receiving();
                true
            }
            None => false,
        }
    }

    /// Switch `id` back to pull mode. Unknown or empty ids are ignored.
    pub fn disable_real_time_receiving(&self, id: &str) -> bool {
        match self.lookup_receiver(id) {
            Some(receiver) => {
                receiver.disable_real_time_receiving();
                true
            }
            None => false,
        }
    }

    fn lookup_receiver(&self, id: &str) -> Option<Arc<MessageReceiver>> {
        if id.is_empty() {
            debug!("Real-time toggle without receiver id ignored");
            return None;
        }
        let receiver = self.get_receiver(id);
        if receiver.is_none() {
            debug!(receiver = %id, "Real-time toggle for unknown receiver ignored");
        }
        receiver
    }

    #[must_use]
    pub fn next_id(&self) -> String {
        self.ids.next_id()
    }

    #[must_use]
    pub fn status(&self) -> Arc<BusStatus> {
        self.status.clone()
    }

    #[must_use]
    pub fn config(&self) -> BusConfig {
        self.config.read().clone()
    }

    /// Take the real-time stream. Only the first call gets it.
    pub fn real_time_stream(&self) -> Option<RealTimeStream> {
        self.stream.lock().take().map(UnboundedReceiverStream::new)
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read().clone();
        f.debug_struct("MessageBus")
            .field("running", &self.is_running())
            .field("publishers", &state.publishers.len())
            .field("receivers", &state.receivers.len())
            .finish_non_exhaustive()
    }
}
