//! Identifiers and ordering tokens carried by descriptions.

use crate::description::EndPoint;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// Global counter for cluster ids.
static CLUSTER_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Process-unique identity of one cluster instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClusterId(u64);

impl ClusterId {
    /// Allocate the next cluster id.
    pub fn next() -> Self {
        ClusterId(CLUSTER_COUNTER.fetch_add(1, AtomicOrdering::Relaxed) + 1)
    }

    /// Build an id with a fixed value.
    pub fn from_value(value: u64) -> Self {
        ClusterId(value)
    }

    /// The numeric value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a server within a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerId {
    cluster_id: ClusterId,
    endpoint: EndPoint,
}

impl ServerId {
    pub fn new(cluster_id: ClusterId, endpoint: EndPoint) -> Self {
        Self {
            cluster_id,
            endpoint,
        }
    }

    pub fn cluster_id(&self) -> ClusterId {
        self.cluster_id
    }

    pub fn endpoint(&self) -> &EndPoint {
        &self.endpoint
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ ClusterId: {}, EndPoint: \"{}\" }}", self.cluster_id, self.endpoint)
    }
}

/// A 12-byte object identifier, ordered bytewise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 12]);

/// The election identifier a primary reports.
pub type ElectionId = ObjectId;

impl ObjectId {
    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        ObjectId(bytes)
    }

    pub fn bytes(&self) -> [u8; 12] {
        self.0
    }
}

impl From<u32> for ObjectId {
    /// Builds an id whose trailing four bytes hold `value`, which keeps the
    /// bytewise order identical to the numeric order.
    fn from(value: u32) -> Self {
        let mut bytes = [0u8; 12];
        bytes[8..].copy_from_slice(&value.to_be_bytes());
        ObjectId(bytes)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// Error returned when an object id is not 24 hex digits.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid object id '{0}': expected 24 hex digits")]
pub struct ParseObjectIdError(String);

impl FromStr for ObjectId {
    type Err = ParseObjectIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseObjectIdError(s.to_string());
        if s.len() != 24 || !s.is_ascii() {
            return Err(invalid());
        }
        let mut bytes = [0u8; 12];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).map_err(|_| invalid())?;
        }
        Ok(ObjectId(bytes))
    }
}

impl Serialize for ObjectId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Per-process monotonic fencing token reported by a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopologyVersion {
    pub process_id: ObjectId,
    pub counter: i64,
}

impl TopologyVersion {
    pub fn new(process_id: ObjectId, counter: i64) -> Self {
        Self {
            process_id,
            counter,
        }
    }

    /// Compare against another version.
    ///
    /// Versions from different processes are not ordered.
    pub fn compare(&self, other: &TopologyVersion) -> Option<Ordering> {
        if self.process_id == other.process_id {
            Some(self.counter.cmp(&other.counter))
        } else {
            None
        }
    }

    /// True when `self` is from the same process as `other` and older.
    pub fn is_older_than(&self, other: &TopologyVersion) -> bool {
        self.compare(other) == Some(Ordering::Less)
    }

    /// True when `self` is from the same process as `other` and newer.
    pub fn is_newer_than(&self, other: &TopologyVersion) -> bool {
        self.compare(other) == Some(Ordering::Greater)
    }
}

impl fmt::Display for TopologyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{ processId: {}, counter: {} }}",
            self.process_id, self.counter
        )
    }
}

/// Inclusive range of wire protocol versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WireVersionRange {
    pub min: i32,
    pub max: i32,
}

impl WireVersionRange {
    pub const fn new(min: i32, max: i32) -> Self {
        Self { min, max }
    }

    pub fn overlaps(&self, other: &WireVersionRange) -> bool {
        self.min <= other.max && other.min <= self.max
    }
}

impl fmt::Display for WireVersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}
