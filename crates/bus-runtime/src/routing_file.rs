//! # Routing File
//!
//! [`RoutingSource`] backed by a JSON file:
//!
//! ```json
//! {
//!   "microservices": ["A", "B", "C"],
//!   "routes": { "A": ["B", "C"] }
//! }
//! ```
//!
//! A missing file is an empty table. When `microservices` is omitted, every
//! identity named in `routes` counts as deployed.

use async_trait::async_trait;
use message_bus::{ConfigError, Route, RoutingSource};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

#[derive(Debug, Default, Deserialize)]
struct RoutingFile {
    #[serde(default)]
    microservices: Option<Vec<String>>,
    #[serde(default)]
    routes: HashMap<String, Route>,
}

impl RoutingFile {
    fn microservices(self) -> HashSet<String> {
        match self.microservices {
            Some(list) => list.into_iter().collect(),
            None => self
                .routes
                .iter()
                .flat_map(|(publisher, route)| {
                    std::iter::once(publisher.clone()).chain(route.receivers().map(String::from))
                })
                .collect(),
        }
    }
}

/// What the watcher compares between polls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileVersion {
    pub modified: Option<SystemTime>,
    pub contents: Option<Vec<u8>>,
}

/// Routing table read from a JSON file on every call.
#[derive(Debug, Clone)]
pub struct FileRoutingSource {
    path: PathBuf,
}

impl FileRoutingSource {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current modification time and contents; both `None` when absent.
    pub async fn version(&self) -> Result<FileVersion, ConfigError> {
        let Some(contents) = self.read().await? else {
            return Ok(FileVersion {
                modified: None,
                contents: None,
            });
        };
        let modified = tokio::fs::metadata(&self.path)
            .await
            .ok()
            .and_then(|m| m.modified().ok());
        Ok(FileVersion {
            modified,
            contents: Some(contents),
        })
    }

    async fn read(&self) -> Result<Option<Vec<u8>>, ConfigError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ConfigError::Unavailable(format!(
                "{}: {e}",
                self.path.display()
            ))),
        }
    }

    async fn load(&self) -> Result<RoutingFile, ConfigError> {
        let Some(bytes) = self.read().await? else {
            return Ok(RoutingFile::default());
        };
        serde_json::from_slice(&bytes)
            .map_err(|e| ConfigError::Invalid(format!("{}: {e}", self.path.display())))
    }
}

#[async_trait]
impl RoutingSource for FileRoutingSource {
    async fn routes(&self) -> Result<HashMap<String, Route>, ConfigError> {
        Ok(self.load().await?.routes)
    }

    async fn microservices(&self) -> Result<HashSet<String>, ConfigError> {
        Ok(self.load().await?.microservices())
    }
}
