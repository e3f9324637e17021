//! # Routes
//!
//! A route lists the receivers allowed to get one publisher's messages.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The set of receiver identities for one publisher.
///
/// Duplicates collapse; iteration order is sorted and carries no meaning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Route {
    receivers: BTreeSet<String>,
}

impl Route {
    #[must_use]
    pub fn new<I, S>(receivers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            receivers: receivers.into_iter().map(Into::into).collect(),
        }
    }

    pub fn receivers(&self) -> impl Iterator<Item = &str> {
        self.receivers.iter().map(String::as_str)
    }

    #[must_use]
    pub fn contains(&self, receiver: &str) -> bool {
        self.receivers.contains(receiver)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.receivers.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.receivers.len()
    }

    /// Keep only receivers accepted by `keep`.
    #[must_use]
    pub fn filtered(&self, mut keep: impl FnMut(&str) -> bool) -> Self {
        Self {
            receivers: self
                .receivers
                .iter()
                .filter(|r| keep(r.as_str()))
                .cloned()
                .collect(),
        }
    }
}
