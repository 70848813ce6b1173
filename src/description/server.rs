//! Immutable snapshot of one server's observed state.

use crate::description::{ElectionId, EndPoint, ServerId, TopologyVersion, WireVersionRange};
use crate::description::cluster::ClusterType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Whether the last probe reached the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    Disconnected,
    Connected,
}

/// The role a server reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerType {
    #[default]
    Unknown,
    Standalone,
    ReplicaSetPrimary,
    ReplicaSetSecondary,
    ReplicaSetArbiter,
    ReplicaSetGhost,
    ReplicaSetOther,
    ShardRouter,
    LoadBalancer,
}

impl ServerType {
    /// True for every replica set role, including ghosts.
    pub fn is_replica_set_member(&self) -> bool {
        matches!(
            self,
            ServerType::ReplicaSetPrimary
                | ServerType::ReplicaSetSecondary
                | ServerType::ReplicaSetArbiter
                | ServerType::ReplicaSetGhost
                | ServerType::ReplicaSetOther
        )
    }

    /// True for roles that accept writes.
    pub fn is_writable(&self) -> bool {
        matches!(
            self,
            ServerType::ReplicaSetPrimary
                | ServerType::Standalone
                | ServerType::ShardRouter
                | ServerType::LoadBalancer
        )
    }

    /// True for roles that hold data.
    pub fn is_data_bearing(&self) -> bool {
        matches!(
            self,
            ServerType::ReplicaSetPrimary
                | ServerType::ReplicaSetSecondary
                | ServerType::Standalone
                | ServerType::ShardRouter
                | ServerType::LoadBalancer
        )
    }

    /// The cluster type a server of this role implies.
    pub fn to_cluster_type(&self) -> ClusterType {
        match self {
            ServerType::Standalone => ClusterType::Standalone,
            ServerType::ShardRouter => ClusterType::Sharded,
            ServerType::LoadBalancer => ClusterType::LoadBalanced,
            t if t.is_replica_set_member() => ClusterType::ReplicaSet,
            _ => ClusterType::Unknown,
        }
    }
}

impl fmt::Display for ServerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Replica set configuration as reported by a member.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicaSetConfig {
    /// Hosts, passives and arbiters.
    pub members: Vec<EndPoint>,
    /// Replica set name.
    pub name: Option<String>,
    /// The member the reporter believes is primary.
    pub primary: Option<EndPoint>,
    /// Configuration version (`setVersion`).
    pub version: Option<i32>,
}

impl ReplicaSetConfig {
    pub fn new(
        members: Vec<EndPoint>,
        name: Option<String>,
        primary: Option<EndPoint>,
        version: Option<i32>,
    ) -> Self {
        Self {
            members,
            name,
            primary,
            version,
        }
    }
}

/// Immutable observed state of one server.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerDescription {
    server_id: ServerId,
    state: ServerState,
    server_type: ServerType,
    replica_set_config: Option<ReplicaSetConfig>,
    election_id: Option<ElectionId>,
    canonical_endpoint: Option<EndPoint>,
    wire_version_range: Option<WireVersionRange>,
    logical_session_timeout: Option<Duration>,
    average_round_trip_time: Duration,
    tags: BTreeMap<String, String>,
    topology_version: Option<TopologyVersion>,
    last_error: Option<String>,
    reason_changed: String,
}

impl ServerDescription {
    /// Description of a server that has not been probed yet.
    pub fn new(server_id: ServerId) -> Self {
        Self::disconnected(server_id, "ServerInitialDescription")
    }

    /// Description of a server that could not be reached.
    ///
    /// Carries no replica set, election or wire data.
    pub fn disconnected(server_id: ServerId, reason: impl Into<String>) -> Self {
        Self {
            server_id,
            state: ServerState::Disconnected,
            server_type: ServerType::Unknown,
            replica_set_config: None,
            election_id: None,
            canonical_endpoint: None,
            wire_version_range: None,
            logical_session_timeout: None,
            average_round_trip_time: Duration::ZERO,
            tags: BTreeMap::new(),
            topology_version: None,
            last_error: None,
            reason_changed: reason.into(),
        }
    }

    /// Start building a connected description.
    pub fn connected(server_id: ServerId, server_type: ServerType) -> ServerDescriptionBuilder {
        ServerDescriptionBuilder {
            description: ServerDescription {
                state: ServerState::Connected,
                server_type,
                reason_changed: "Heartbeat".to_string(),
                ..Self::disconnected(server_id, "")
            },
        }
    }

    /// Copy with a different topology version.
    pub fn with_topology_version(mut self, topology_version: Option<TopologyVersion>) -> Self {
        self.topology_version = topology_version;
        self
    }

    /// Copy with the error that caused the description.
    pub fn with_last_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self
    }

    /// Copy with a new reason string.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason_changed = reason.into();
        self
    }

    /// Copy with a new round trip time.
    pub fn with_average_round_trip_time(mut self, rtt: Duration) -> Self {
        self.average_round_trip_time = rtt;
        self
    }

    pub fn server_id(&self) -> &ServerId {
        &self.server_id
    }

    pub fn endpoint(&self) -> &EndPoint {
        self.server_id.endpoint()
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn server_type(&self) -> ServerType {
        self.server_type
    }

    pub fn replica_set_config(&self) -> Option<&ReplicaSetConfig> {
        self.replica_set_config.as_ref()
    }

    pub fn election_id(&self) -> Option<ElectionId> {
        self.election_id
    }

    pub fn canonical_endpoint(&self) -> Option<&EndPoint> {
        self.canonical_endpoint.as_ref()
    }

    pub fn wire_version_range(&self) -> Option<WireVersionRange> {
        self.wire_version_range
    }

    /// Highest wire version the server speaks, zero when unknown.
    pub fn max_wire_version(&self) -> i32 {
        self.wire_version_range.map(|r| r.max).unwrap_or(0)
    }

    pub fn logical_session_timeout(&self) -> Option<Duration> {
        self.logical_session_timeout
    }

    pub fn average_round_trip_time(&self) -> Duration {
        self.average_round_trip_time
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn topology_version(&self) -> Option<&TopologyVersion> {
        self.topology_version.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn reason_changed(&self) -> &str {
        &self.reason_changed
    }

    pub fn is_connected(&self) -> bool {
        self.state == ServerState::Connected
    }

    /// Equality over the fields that drive discovery.
    ///
    /// Round trip time and the reason string are ignored, so heartbeats that
    /// only refresh latency compare equal.
    pub fn sdam_eq(&self, other: &ServerDescription) -> bool {
        self.server_id == other.server_id
            && self.state == other.state
            && self.server_type == other.server_type
            && self.replica_set_config == other.replica_set_config
            && self.election_id == other.election_id
            && self.canonical_endpoint == other.canonical_endpoint
            && self.wire_version_range == other.wire_version_range
            && self.logical_session_timeout == other.logical_session_timeout
            && self.tags == other.tags
            && self.topology_version == other.topology_version
            && self.last_error == other.last_error
    }
}

impl fmt::Display for ServerDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{ ServerId: {}, EndPoint: \"{}\", ReasonChanged: \"{}\", State: {}, Type: {}",
            self.server_id,
            self.endpoint(),
            self.reason_changed,
            self.state,
            self.server_type
        )?;
        if let Some(config) = &self.replica_set_config {
            if let Some(name) = &config.name {
                write!(f, ", ReplicaSet: \"{}\"", name)?;
            }
            if let Some(version) = config.version {
                write!(f, ", SetVersion: {}", version)?;
            }
        }
        if let Some(election_id) = &self.election_id {
            write!(f, ", ElectionId: {}", election_id)?;
        }
        if let Some(tv) = &self.topology_version {
            write!(f, ", TopologyVersion: {}", tv)?;
        }
        if let Some(range) = &self.wire_version_range {
            write!(f, ", WireVersionRange: {}", range)?;
        }
        if let Some(error) = &self.last_error {
            write!(f, ", LastError: \"{}\"", error)?;
        }
        write!(f, " }}")
    }
}

/// Builder for connected descriptions.
#[derive(Debug, Clone)]
pub struct ServerDescriptionBuilder {
    description: ServerDescription,
}

impl ServerDescriptionBuilder {
    pub fn replica_set_config(mut self, config: ReplicaSetConfig) -> Self {
        self.description.replica_set_config = Some(config);
        self
    }

    pub fn election_id(mut self, election_id: Option<ElectionId>) -> Self {
        self.description.election_id = election_id;
        self
    }

    pub fn canonical_endpoint(mut self, endpoint: Option<EndPoint>) -> Self {
        self.description.canonical_endpoint = endpoint;
        self
    }

    pub fn wire_version_range(mut self, range: WireVersionRange) -> Self {
        self.description.wire_version_range = Some(range);
        self
    }

    pub fn logical_session_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.description.logical_session_timeout = timeout;
        self
    }

    pub fn average_round_trip_time(mut self, rtt: Duration) -> Self {
        self.description.average_round_trip_time = rtt;
        self
    }

    pub fn tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.description.tags = tags;
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.description.tags.insert(key.into(), value.into());
        self
    }

    pub fn topology_version(mut self, tv: Option<TopologyVersion>) -> Self {
        self.description.topology_version = tv;
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.description.reason_changed = reason.into();
        self
    }

    pub fn build(self) -> ServerDescription {
        self.description
    }
}
