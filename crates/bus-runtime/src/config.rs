//! # Runtime Configuration
//!
//! Everything the gateway process needs on top of [`BusConfig`]: where the
//! routing file lives, how often it is polled and how logs are emitted.

use message_bus::BusConfig;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Complete runtime configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// Message bus configuration.
    pub bus: BusConfig,
    /// JSON routing file.
    pub routes_file: PathBuf,
    /// Routing file poll period.
    pub routes_poll: Duration,
    /// Log level filter (trace, debug, info, warn, error).
    pub log_level: String,
    /// Emit JSON formatted logs.
    pub json_logs: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            bus: BusConfig::default(),
            routes_file: PathBuf::from("./routes.json"),
            routes_poll: Duration::from_secs(2),
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl RuntimeConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - Every variable read by [`BusConfig::from_env`]
    /// - `BUS_ROUTES_FILE`: Routing file (default: ./routes.json)
    /// - `BUS_ROUTES_POLL_SECS`: Routing file poll period (default: 2)
    /// - `BUS_LOG_LEVEL` or `RUST_LOG`: Log level (default: info)
    /// - `BUS_JSON_LOGS`: Enable JSON logs (default: false)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bus: BusConfig::from_env(),

            routes_file: env::var("BUS_ROUTES_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.routes_file),

            routes_poll: env::var("BUS_ROUTES_POLL_SECS")
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.routes_poll),

            log_level: env::var("BUS_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or(defaults.log_level),

            json_logs: env::var("BUS_JSON_LOGS")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(defaults.json_logs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.routes_file, PathBuf::from("./routes.json"));
        assert_eq!(config.routes_poll, Duration::from_secs(2));
        assert_eq!(config.log_level, "info");
        assert!(!config.json_logs);
        assert_eq!(config.bus, BusConfig::default());
    }
}
