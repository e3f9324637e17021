//! # Message Ids
//!
//! Time-ordered, collision-resistant identifiers for messages.
//!
//! An id is 32 lowercase hex digits:
//!
//! ```text
//! tttttttttttt ssssssssssss nnnnnnnn
//! timestamp    sequence     node tag
//! ```
//!
//! The fixed-width timestamp and sequence make lexicographic order match
//! generation order within one process. The node tag is random per generator
//! so two processes do not collide.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Largest value of a 12 hex digit field.
const FIELD_MAX: u64 = 0xffff_ffff_ffff;

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn current_time_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Generates unique message ids.
#[derive(Debug)]
pub struct MessageIdGenerator {
    sequence: AtomicU64,
    node: u32,
}

impl MessageIdGenerator {
    /// Create a generator with a random node tag.
    #[must_use]
    pub fn new() -> Self {
        Self::with_node(rand::random())
    }

    /// Create a generator with a fixed node tag.
    #[must_use]
    pub fn with_node(node: u32) -> Self {
        Self {
            sequence: AtomicU64::new(0),
            node,
        }
    }

    /// Generate an id embedding `timestamp` (epoch millis).
    ///
    /// Negative timestamps are clamped to zero.
    pub fn generate(&self, timestamp: i64) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed) & FIELD_MAX;
        let ts = u64::try_from(timestamp).unwrap_or(0).min(FIELD_MAX);
        format!("{ts:012x}{seq:012x}{:08x}", self.node)
    }

    /// Generate an id for the current time.
    pub fn next_id(&self) -> String {
        self.generate(current_time_millis())
    }
}

impl Default for MessageIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_ids_are_fixed_width_hex() {
        let id = MessageIdGenerator::with_node(0xab).generate(1_000);
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert!(id.starts_with("0000000003e8"));
        assert!(id.ends_with("000000ab"));
    }

    #[test]
    fn test_sequential_ids_unique_and_ordered() {
        let generator = MessageIdGenerator::new();
        let ids: Vec<String> = (0..1000).map(|i| generator.generate(1_000 + i / 10)).collect();

        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());

        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(sorted, ids);
    }

    #[test]
    fn test_same_timestamp_still_unique() {
        let generator = MessageIdGenerator::new();
        let a = generator.generate(5);
        let b = generator.generate(5);
        assert_ne!(a, b);
        assert!(a < b);
    }

    #[test]
    fn test_concurrent_generation_unique() {
        let generator = Arc::new(MessageIdGenerator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let generator = generator.clone();
                std::thread::spawn(move || {
                    (0..500).map(|_| generator.next_id()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(all.insert(id));
            }
        }
        assert_eq!(all.len(), 4000);
    }

    #[test]
    fn test_negative_timestamp_clamped() {
        let id = MessageIdGenerator::with_node(1).generate(-5);
        assert!(id.starts_with("000000000000"));
    }

    #[test]
    fn test_next_id_has_no_reserved_characters() {
        let id = MessageIdGenerator::new().next_id();
        assert!(!id.contains('?'));
        assert!(!id.contains('"'));
    }
}
