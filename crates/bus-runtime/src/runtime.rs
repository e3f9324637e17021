//! # Gateway Runtime
//!
//! Wires configuration, transport and bus together and runs the two
//! background tasks of the process:
//!
//! - **Routing watcher**: polls the routing file and reconciles the bus when
//!   its modification time or contents change.
//! - **Real-time drain**: consumes the bus's real-time stream, standing in
//!   for the outbound API layer.
//!
//! Both stop when the shutdown channel flips to `true`.

use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::routing_file::{FileRoutingSource, FileVersion};
use message_bus::{InMemoryTransport, MessageBus, MessageBusUtil, RealTimeStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

/// The gateway process.
pub struct GatewayRuntime {
    config: RuntimeConfig,
    bus: Arc<MessageBus>,
    util: MessageBusUtil,
    source: Arc<FileRoutingSource>,
    /// Real-time deliveries drained so far.
    forwarded: Arc<AtomicU64>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl GatewayRuntime {
    /// Create the runtime on an in-memory transport.
    pub fn new(config: RuntimeConfig) -> Self {
        let source = Arc::new(FileRoutingSource::new(config.routes_file.clone()));
        let bus = Arc::new(MessageBus::new(
            config.bus.clone(),
            Arc::new(InMemoryTransport::new()),
            source.clone(),
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            config,
            util: MessageBusUtil::new(bus.clone()),
            bus,
            source,
            forwarded: Arc::new(AtomicU64::new(0)),
            tasks: Mutex::new(Vec::new()),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Start the bus and the background tasks.
    pub async fn start(&self) -> Result<(), RuntimeError> {
        info!(
            routes_file = %self.config.routes_file.display(),
            archive_dir = %self.config.bus.archive.base_dir.display(),
            "Starting gateway message bus"
        );

        let initial = match self.source.version().await {
            Ok(version) => Some(version),
            Err(e) => {
                warn!(error = %e, "Routing file unreadable at startup");
                None
            }
        };
        self.bus.start().await?;

        let mut tasks = self.tasks.lock().await;
        tasks.push(self.spawn_watcher(initial));
        match self.bus.real_time_stream() {
            Some(stream) => tasks.push(self.spawn_drain(stream)),
            None => debug!("Real-time stream already taken, drain not started"),
        }

        info!(
            routes = self.bus.get_routes().len(),
            "Gateway message bus running"
        );
        Ok(())
    }

    fn spawn_watcher(&self, initial: Option<FileVersion>) -> JoinHandle<()> {
        let bus = self.bus.clone();
        let source = self.source.clone();
        let period = self.config.routes_poll;
        let mut shutdown = self.shutdown_rx.clone();

        tokio::spawn(async move {
            let mut last = initial;
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => {
                        debug!("Routing watcher stopped");
                        return;
                    }
                }
                match source.version().await {
                    Ok(version) if last.as_ref() != Some(&version) => {
                        info!(path = %source.path().display(), "Routing file changed");
                        last = Some(version);
                        bus.update().await;
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Routing file poll failed"),
                }
            }
        })
    }

    fn spawn_drain(&self, mut stream: RealTimeStream) -> JoinHandle<()> {
        let forwarded = self.forwarded.clone();
        let mut shutdown = self.shutdown_rx.clone();

        tokio::spawn(async move {
            loop {
                let delivery = tokio::select! {
                    next = stream.next() => next,
                    _ = shutdown.changed() => None,
                };
                let Some(delivery) = delivery else {
                    debug!("Real-time drain stopped");
                    return;
                };
                forwarded.fetch_add(1, Ordering::Relaxed);
                info!(
                    receiver = %delivery.receiver,
                    publisher = %delivery.message.publisher,
                    id = %delivery.message.id,
                    "Real-time message"
                );
            }
        })
    }

    /// Signal the background tasks, wait for them and stop the bus.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown...");

        if let Err(e) = self.shutdown_tx.send(true) {
            error!("Failed to send shutdown signal: {}", e);
        }

        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            if tokio::time::timeout(Duration::from_secs(2), task).await.is_err() {
                warn!("Background task did not stop in time");
            }
        }
        self.bus.stop().await;

        info!("Shutdown complete");
    }

    #[must_use]
    pub fn bus(&self) -> Arc<MessageBus> {
        self.bus.clone()
    }

    #[must_use]
    pub fn util(&self) -> &MessageBusUtil {
        &self.util
    }

    /// Number of real-time deliveries drained.
    #[must_use]
    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use message_bus::{ArchiveConfig, BusConfig, Message};
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> RuntimeConfig {
        RuntimeConfig {
            bus: BusConfig {
                archive: ArchiveConfig {
                    base_dir: dir.path().join("messages"),
                    ..ArchiveConfig::default()
                },
                ..BusConfig::default()
            },
            routes_file: dir.path().join("routes.json"),
            routes_poll: Duration::from_millis(20),
            ..RuntimeConfig::default()
        }
    }

    async fn eventually(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..100 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_start_loads_routing_file() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        std::fs::write(&config.routes_file, r#"{"routes": {"A": ["B"]}}"#).unwrap();

        let runtime = GatewayRuntime::new(config);
        runtime.start().await.unwrap();
        assert!(runtime.bus().get_publisher("A").is_some());
        assert!(runtime.bus().get_receiver("B").is_some());

        runtime.shutdown().await;
        assert!(!runtime.bus().is_running());
    }

    #[tokio::test]
    async fn test_watcher_reconciles_on_change() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let routes_file = config.routes_file.clone();

        let runtime = GatewayRuntime::new(config);
        runtime.start().await.unwrap();
        assert!(runtime.bus().get_routes().is_empty());

        std::fs::write(&routes_file, r#"{"routes": {"A": ["B"]}}"#).unwrap();
        let bus = runtime.bus();
        assert!(eventually(|| bus.get_publisher("A").is_some()).await);

        std::fs::remove_file(&routes_file).unwrap();
        assert!(eventually(|| bus.get_publisher("A").is_none()).await);

        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_drain_consumes_real_time_messages() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        std::fs::write(&config.routes_file, r#"{"routes": {"A": ["B"]}}"#).unwrap();

        let runtime = GatewayRuntime::new(config);
        runtime.start().await.unwrap();
        assert!(runtime.util().enable_real_time_receiving("B"));
        runtime.util().publish(Message::new("A")).unwrap();

        assert!(eventually(|| runtime.forwarded() == 1).await);
        assert!(runtime.util().get_messages("B").is_empty());

        runtime.shutdown().await;
    }
}
