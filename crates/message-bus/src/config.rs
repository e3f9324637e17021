//! # Bus Configuration
//!
//! Tunables for the bus and its archives, plus the source the orchestrator
//! reads the routing table from.

use crate::error::ConfigError;
use crate::route::Route;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Archive retention policy.
///
/// Retention is bounded by capacity, not age. The total budget is
/// `min(available_memory * memory_fraction, ceiling_bytes)`, split evenly into
/// `windows` rotation windows (never below `min_window_bytes`).
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveConfig {
    /// Directory holding every publisher's window files.
    pub base_dir: PathBuf,
    /// Fraction of currently available memory the archive may occupy.
    pub memory_fraction: f64,
    /// Hard ceiling on the total archive size per publisher.
    pub ceiling_bytes: u64,
    /// Number of windows the budget is split into.
    pub windows: u32,
    /// Floor for a single window's budget.
    pub min_window_bytes: u64,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("./data/messages"),
            memory_fraction: 0.05,
            ceiling_bytes: 512 * 1024 * 1024,
            windows: 4,
            min_window_bytes: 4 * 1024,
        }
    }
}

impl ArchiveConfig {
    /// Total budget for the given available memory.
    #[must_use]
    pub fn total_budget(&self, available_memory: u64) -> u64 {
        let fraction = self.memory_fraction.clamp(0.0, 1.0);
        let from_memory = (available_memory as f64 * fraction) as u64;
        from_memory.min(self.ceiling_bytes)
    }

    /// Budget of one window for the given available memory.
    #[must_use]
    pub fn window_budget(&self, available_memory: u64) -> u64 {
        let per_window = self.total_budget(available_memory) / u64::from(self.windows.max(1));
        per_window.max(self.min_window_bytes)
    }
}

/// Message bus configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BusConfig {
    pub archive: ArchiveConfig,
    /// Period of the throughput sampler.
    pub throughput_interval: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            archive: ArchiveConfig::default(),
            throughput_interval: Duration::from_secs(5),
        }
    }
}

impl BusConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `BUS_ARCHIVE_DIR`: Archive directory (default: ./data/messages)
    /// - `BUS_ARCHIVE_MEMORY_FRACTION`: Fraction of free memory (default: 0.05)
    /// - `BUS_ARCHIVE_CEILING_BYTES`: Size ceiling (default: 512 MiB)
    /// - `BUS_ARCHIVE_WINDOWS`: Windows per budget (default: 4)
    /// - `BUS_THROUGHPUT_INTERVAL_SECS`: Sampler period (default: 5)
    ///
    /// Unset or unparsable values fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            archive: ArchiveConfig {
                base_dir: env::var("BUS_ARCHIVE_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.archive.base_dir),
                memory_fraction: env_parse("BUS_ARCHIVE_MEMORY_FRACTION")
                    .unwrap_or(defaults.archive.memory_fraction),
                ceiling_bytes: env_parse("BUS_ARCHIVE_CEILING_BYTES")
                    .unwrap_or(defaults.archive.ceiling_bytes),
                windows: env_parse("BUS_ARCHIVE_WINDOWS").unwrap_or(defaults.archive.windows),
                min_window_bytes: defaults.archive.min_window_bytes,
            },
            throughput_interval: env_parse("BUS_THROUGHPUT_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.throughput_interval),
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Where the orchestrator reads the desired routing table from.
#[async_trait]
pub trait RoutingSource: Send + Sync {
    /// Desired routes, keyed by publisher identity.
    async fn routes(&self) -> Result<HashMap<String, Route>, ConfigError>;

    /// Identities of the microservices currently deployed.
    async fn microservices(&self) -> Result<HashSet<String>, ConfigError>;
}

/// In-memory routing source whose contents can be replaced at any time.
#[derive(Debug, Default)]
pub struct StaticRoutingSource {
    inner: RwLock<(HashMap<String, Route>, HashSet<String>)>,
}

impl StaticRoutingSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace routes and microservices together.
    pub fn set(&self, routes: HashMap<String, Route>, microservices: HashSet<String>) {
        *self.inner.write() = (routes, microservices);
    }

    /// Replace routes; every identity they mention becomes a known microservice.
    pub fn set_routes(&self, routes: HashMap<String, Route>) {
        let microservices = routes
            .iter()
            .flat_map(|(publisher, route)| {
                std::iter::once(publisher.clone()).chain(route.receivers().map(String::from))
            })
            .collect();
        self.set(routes, microservices);
    }
}

#[async_trait]
impl RoutingSource for StaticRoutingSource {
    async fn routes(&self) -> Result<HashMap<String, Route>, ConfigError> {
        Ok(self.inner.read().0.clone())
    }

    async fn microservices(&self) -> Result<HashSet<String>, ConfigError> {
        Ok(self.inner.read().1.clone())
    }
}
