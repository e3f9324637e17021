//! # Edge Gateway Message Bus
//!
//! Routes messages between the microservices named in the routing file.
//!
//! ## Startup Sequence
//!
//! 1. Load configuration from the environment
//! 2. Install logging
//! 3. Start the bus and reconcile against the routing file
//! 4. Watch the routing file and drain real-time deliveries
//! 5. Stop on Ctrl+C

use anyhow::{Context, Result};
use bus_runtime::{init_logging, GatewayRuntime, RuntimeConfig};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = RuntimeConfig::from_env();
    init_logging(&config).context("Failed to initialize logging")?;

    let runtime = GatewayRuntime::new(config);
    runtime
        .start()
        .await
        .context("Failed to start message bus")?;

    info!("Message bus is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    runtime.shutdown().await;
    Ok(())
}
