//! Logical cluster time.
//!
//! Servers attach a `$clusterTime` to their replies. The clock keeps the
//! greatest one observed so it can be gossiped back on later requests.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A server timestamp: seconds plus an ordinal within the second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp {
    pub time: u32,
    pub increment: u32,
}

impl Timestamp {
    pub fn new(time: u32, increment: u32) -> Self {
        Self { time, increment }
    }
}

/// Signature a server attaches to a cluster time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterTimeSignature {
    pub hash: Vec<u8>,
    pub key_id: i64,
}

/// A cluster time document, ordered by its timestamp alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterTime {
    pub timestamp: Timestamp,
    #[serde(default)]
    pub signature: Option<ClusterTimeSignature>,
}

impl ClusterTime {
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            signature: None,
        }
    }

    pub fn with_signature(mut self, signature: ClusterTimeSignature) -> Self {
        self.signature = Some(signature);
        self
    }

    fn compare(&self, other: &ClusterTime) -> Ordering {
        self.timestamp.cmp(&other.timestamp)
    }
}

/// Monotonic holder of the greatest cluster time seen.
#[derive(Debug, Default)]
pub struct ClusterClock {
    cluster_time: Mutex<Option<ClusterTime>>,
}

impl ClusterClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// The greater of two optional cluster times; ties keep `a`.
    pub fn greater<'a>(
        a: Option<&'a ClusterTime>,
        b: Option<&'a ClusterTime>,
    ) -> Option<&'a ClusterTime> {
        match (a, b) {
            (None, other) | (other, None) => other,
            (Some(a), Some(b)) => {
                if b.compare(a) == Ordering::Greater {
                    Some(b)
                } else {
                    Some(a)
                }
            }
        }
    }

    /// The current cluster time.
    pub fn cluster_time(&self) -> Option<ClusterTime> {
        self.cluster_time.lock().clone()
    }

    /// Advance to `new_time` if it is greater. Never moves backwards.
    pub fn advance(&self, new_time: &ClusterTime) {
        let mut current = self.cluster_time.lock();
        let advanced = match current.as_ref() {
            Some(existing) => new_time.compare(existing) == Ordering::Greater,
            None => true,
        };
        if advanced {
            *current = Some(new_time.clone());
        }
    }
}
