//! Immutable topology snapshots.
//!
//! Every observation of the deployment is a value: a new heartbeat produces
//! a new `ServerDescription`, and a reduction produces a new
//! `ClusterDescription`. Nothing here is mutated in place.

pub mod cluster;
mod endpoint;
mod ids;
mod server;

pub use cluster::{ClusterDescription, ClusterState, ClusterType};
pub use endpoint::{EndPoint, ParseEndPointError, DEFAULT_PORT};
pub use ids::{
    ClusterId, ElectionId, ObjectId, ParseObjectIdError, ServerId, TopologyVersion,
    WireVersionRange,
};
pub use server::{
    ReplicaSetConfig, ServerDescription, ServerDescriptionBuilder, ServerState, ServerType,
};

/// Wire protocol versions this driver can speak.
pub const SUPPORTED_WIRE_VERSIONS: WireVersionRange = WireVersionRange::new(8, 25);

/// First wire version whose servers order primaries by election id first.
pub const ELECTION_ID_PRIORITY_WIRE_VERSION: i32 = 17;
