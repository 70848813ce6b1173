//! Highest (setVersion, electionId) pair seen from a replica set primary.

use crate::description::{ELECTION_ID_PRIORITY_WIRE_VERSION, ElectionId};
use std::cmp::Ordering;
use std::fmt;

/// The stored maximum `(setVersion, electionId)` of one replica set.
///
/// Two comparison rules exist. Servers at or above
/// [`ELECTION_ID_PRIORITY_WIRE_VERSION`] order by election id first and
/// treat missing values as smallest. Older servers compare election ids
/// only when both fields are reported, and track the maximum set version
/// separately.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ElectionInfo {
    set_version: Option<i32>,
    election_id: Option<ElectionId>,
}

impl ElectionInfo {
    #[cfg(test)]
    pub fn new(set_version: Option<i32>, election_id: Option<ElectionId>) -> Self {
        Self {
            set_version,
            election_id,
        }
    }

    pub fn set_version(&self) -> Option<i32> {
        self.set_version
    }

    pub fn election_id(&self) -> Option<ElectionId> {
        self.election_id
    }

    /// True until some primary has reported either field.
    pub fn is_empty(&self) -> bool {
        self.set_version.is_none() && self.election_id.is_none()
    }

    /// The new maximum after a primary reports these values, or `None` if
    /// that primary is stale.
    pub fn compare(
        &self,
        set_version: Option<i32>,
        election_id: Option<ElectionId>,
        max_wire_version: i32,
    ) -> Option<ElectionInfo> {
        let mut next = *self;

        if max_wire_version >= ELECTION_ID_PRIORITY_WIRE_VERSION {
            let order = self.election_id.cmp(&election_id);
            let accepted = order == Ordering::Less
                || (order == Ordering::Equal && or_min(set_version) >= or_min(self.set_version));
            if !accepted {
                return None;
            }
            next.election_id = election_id;
            next.set_version = set_version;
        } else {
            if let (Some(reported_version), Some(reported_id)) = (set_version, election_id) {
                if let (Some(stored_version), Some(stored_id)) = (self.set_version, self.election_id) {
                    let stale = stored_version > reported_version
                        || (stored_version == reported_version && stored_id > reported_id);
                    if stale {
                        return None;
                    }
                }
                next.election_id = Some(reported_id);
            }

            if or_min(set_version) > or_min(self.set_version) {
                next.set_version = set_version;
            }
        }

        Some(next)
    }
}

impl fmt::Display for ElectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", display_or_null(self.set_version), display_or_null(self.election_id))
    }
}

/// Missing set versions sort below every present one.
fn or_min(set_version: Option<i32>) -> i32 {
    set_version.unwrap_or(i32::MIN)
}

pub(crate) fn display_or_null<T: fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "null".to_string(), |v| v.to_string())
}
