//! # Bus Status
//!
//! Counters the bus exposes to the external status facade.
//!
//! ## Exported
//!
//! - Total processed (published) messages
//! - Published messages per microservice, also as a JSON array
//! - Throughput in messages per second, refreshed by the sampler task

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// One row of the per-microservice report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishedCount {
    pub id: String,
    #[serde(rename = "messagecount")]
    pub message_count: u64,
}

/// Shared status counters.
#[derive(Debug)]
pub struct BusStatus {
    processed: AtomicU64,
    published: RwLock<BTreeMap<String, u64>>,
    /// `f64` bits of the last throughput sample.
    throughput: AtomicU64,
    last_sample: Mutex<(Instant, u64)>,
}

impl BusStatus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            processed: AtomicU64::new(0),
            published: RwLock::new(BTreeMap::new()),
            throughput: AtomicU64::new(0f64.to_bits()),
            last_sample: Mutex::new((Instant::now(), 0)),
        }
    }

    /// Count one message published by `publisher`.
    pub fn record_published(&self, publisher: &str) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        let mut published = self.published.write();
        *published.entry(publisher.to_string()).or_insert(0) += 1;
    }

    #[must_use]
    pub fn processed_messages(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn published_count(&self, publisher: &str) -> u64 {
        self.published.read().get(publisher).copied().unwrap_or(0)
    }

    /// Per-microservice counts, sorted by id.
    #[must_use]
    pub fn published_counts(&self) -> Vec<PublishedCount> {
        self.published
            .read()
            .iter()
            .map(|(id, count)| PublishedCount {
                id: id.clone(),
                message_count: *count,
            })
            .collect()
    }

    /// `[{"id": "...", "messagecount": n}, ...]`
    #[must_use]
    pub fn published_counts_json(&self) -> serde_json::Value {
        serde_json::to_value(self.published_counts())
            .unwrap_or_else(|_| serde_json::Value::Array(Vec::new()))
    }

    /// Align the per-microservice table with the known microservices:
    /// new ones start at zero, removed ones are dropped.
    pub fn sync_microservices(&self, known: &HashSet<String>) {
        let mut published = self.published.write();
        published.retain(|id, _| known.contains(id));
        for id in known {
            published.entry(id.clone()).or_insert(0);
        }
    }

    /// Messages per second over the last sampling period.
    #[must_use]
    pub fn throughput(&self) -> f64 {
        f64::from_bits(self.throughput.load(Ordering::Relaxed))
    }

    /// Recompute throughput from the processed count since the previous sample.
    pub fn sample_throughput(&self) -> f64 {
        let now = Instant::now();
        let processed = self.processed_messages();
        let mut last = self.last_sample.lock();
        let elapsed = now.duration_since(last.0).as_secs_f64();
        let delta = processed.saturating_sub(last.1);
        *last = (now, processed);

        let speed = if elapsed > 0.0 {
            delta as f64 / elapsed
        } else {
            0.0
        };
        self.throughput.store(speed.to_bits(), Ordering::Relaxed);
        speed
    }
}

impl Default for BusStatus {
    fn default() -> Self {
        Self::new()
    }
}
