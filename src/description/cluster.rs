//! Immutable snapshot of the whole deployment.

use crate::description::{
    ClusterId, EndPoint, ServerDescription, ServerState, ServerType, SUPPORTED_WIRE_VERSIONS,
};
use crate::error::ClusterError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Deployment shape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterType {
    #[default]
    Unknown,
    Standalone,
    ReplicaSet,
    Sharded,
    LoadBalanced,
}

impl fmt::Display for ClusterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Aggregate connectivity: connected when any member is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterState {
    Disconnected,
    Connected,
}

/// Immutable observed state of a deployment.
///
/// Servers are kept in insertion order with at most one entry per endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterDescription {
    cluster_id: ClusterId,
    direct_connection: bool,
    cluster_type: ClusterType,
    servers: Vec<ServerDescription>,
    dns_monitor_error: Option<String>,
}

impl ClusterDescription {
    /// An empty description of unknown type.
    pub fn new(cluster_id: ClusterId, direct_connection: bool) -> Self {
        Self {
            cluster_id,
            direct_connection,
            cluster_type: ClusterType::Unknown,
            servers: Vec::new(),
            dns_monitor_error: None,
        }
    }

    pub fn cluster_id(&self) -> ClusterId {
        self.cluster_id
    }

    pub fn direct_connection(&self) -> bool {
        self.direct_connection
    }

    pub fn cluster_type(&self) -> ClusterType {
        self.cluster_type
    }

    pub fn servers(&self) -> &[ServerDescription] {
        &self.servers
    }

    pub fn dns_monitor_error(&self) -> Option<&str> {
        self.dns_monitor_error.as_deref()
    }

    /// Look up the entry for `endpoint`.
    pub fn server(&self, endpoint: &EndPoint) -> Option<&ServerDescription> {
        self.servers.iter().find(|s| s.endpoint() == endpoint)
    }

    pub fn contains(&self, endpoint: &EndPoint) -> bool {
        self.server(endpoint).is_some()
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &EndPoint> {
        self.servers.iter().map(|s| s.endpoint())
    }

    /// Every entry that currently claims to be primary.
    pub fn primaries(&self) -> impl Iterator<Item = &ServerDescription> {
        self.servers
            .iter()
            .filter(|s| s.server_type() == ServerType::ReplicaSetPrimary)
    }

    pub fn state(&self) -> ClusterState {
        if self.servers.iter().any(|s| s.state() == ServerState::Connected) {
            ClusterState::Connected
        } else {
            ClusterState::Disconnected
        }
    }

    /// Smallest session timeout among connected data-bearing members.
    ///
    /// `None` when any such member does not support sessions.
    pub fn logical_session_timeout(&self) -> Option<Duration> {
        let mut result: Option<Duration> = None;
        for server in self
            .servers
            .iter()
            .filter(|s| s.is_connected() && s.server_type().is_data_bearing())
        {
            let timeout = server.logical_session_timeout()?;
            result = Some(result.map_or(timeout, |r| r.min(timeout)));
        }
        result
    }

    pub fn with_type(mut self, cluster_type: ClusterType) -> Self {
        self.cluster_type = cluster_type;
        self
    }

    /// Replace the entry for the description's endpoint, or append it.
    pub fn with_server_description(mut self, description: ServerDescription) -> Self {
        match self
            .servers
            .iter_mut()
            .find(|s| s.endpoint() == description.endpoint())
        {
            Some(existing) => *existing = description,
            None => self.servers.push(description),
        }
        self
    }

    pub fn without_server_description(mut self, endpoint: &EndPoint) -> Self {
        self.servers.retain(|s| s.endpoint() != endpoint);
        self
    }

    pub fn with_dns_monitor_error(mut self, error: Option<String>) -> Self {
        self.dns_monitor_error = error;
        self
    }

    /// Equality over discovery-relevant fields.
    pub fn sdam_eq(&self, other: &ClusterDescription) -> bool {
        self.cluster_id == other.cluster_id
            && self.direct_connection == other.direct_connection
            && self.cluster_type == other.cluster_type
            && self.dns_monitor_error == other.dns_monitor_error
            && self.servers.len() == other.servers.len()
            && self
                .servers
                .iter()
                .zip(&other.servers)
                .all(|(a, b)| a.sdam_eq(b))
    }

    /// Fail when a connected member speaks no wire version this driver supports.
    pub fn check_compatible(&self) -> Result<(), ClusterError> {
        let driver = SUPPORTED_WIRE_VERSIONS;
        for server in self.servers.iter().filter(|s| s.is_connected()) {
            let Some(range) = server.wire_version_range() else {
                continue;
            };
            if range.overlaps(&driver) {
                continue;
            }
            let message = if range.min > driver.max {
                format!(
                    "Server at {} requires wire version {}, but this version of the driver only supports up to {}.",
                    server.endpoint(),
                    range.min,
                    driver.max
                )
            } else {
                format!(
                    "Server at {} reports wire version {}, but this version of the driver requires at least {}.",
                    server.endpoint(),
                    range.max,
                    driver.min
                )
            };
            return Err(ClusterError::IncompatibleDriver(message));
        }
        Ok(())
    }
}

impl fmt::Display for ClusterDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state() {
            ClusterState::Connected => "Connected",
            ClusterState::Disconnected => "Disconnected",
        };
        write!(
            f,
            "{{ ClusterId: \"{}\", DirectConnection: \"{}\", Type: \"{}\", State: \"{}\", Servers: [",
            self.cluster_id, self.direct_connection, self.cluster_type, state
        )?;
        for (i, server) in self.servers.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", server)?;
        }
        write!(f, "]")?;
        if let Some(error) = &self.dns_monitor_error {
            write!(f, ", DnsMonitorException: \"{}\"", error)?;
        }
        write!(f, " }}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description::{ServerId, WireVersionRange};

    fn sd(id: ClusterId, ep: &str, server_type: ServerType) -> ServerDescription {
        ServerDescription::connected(ServerId::new(id, ep.parse().unwrap()), server_type).build()
    }

    #[test]
    fn test_with_server_description_keeps_one_entry_per_endpoint() {
        let id = ClusterId::from_value(1);
        let desc = ClusterDescription::new(id, false)
            .with_server_description(sd(id, "a:1", ServerType::ReplicaSetSecondary))
            .with_server_description(sd(id, "b:1", ServerType::ReplicaSetSecondary))
            .with_server_description(sd(id, "a:1", ServerType::ReplicaSetPrimary));

        assert_eq!(desc.servers().len(), 2);
        // replacement keeps insertion order
        assert_eq!(desc.servers()[0].endpoint().to_string(), "a:1");
        assert_eq!(desc.servers()[0].server_type(), ServerType::ReplicaSetPrimary);
    }

    #[test]
    fn test_without_server_description() {
        let id = ClusterId::from_value(1);
        let a: EndPoint = "a:1".parse().unwrap();
        let desc = ClusterDescription::new(id, false)
            .with_server_description(sd(id, "a:1", ServerType::Standalone))
            .without_server_description(&a);
        assert!(desc.servers().is_empty());
        assert_eq!(desc.state(), ClusterState::Disconnected);
    }

    #[test]
    fn test_check_compatible_rejects_old_server() {
        let id = ClusterId::from_value(1);
        let old = ServerDescription::connected(
            ServerId::new(id, "a:1".parse().unwrap()),
            ServerType::Standalone,
        )
        .wire_version_range(WireVersionRange::new(0, 2))
        .build();
        let desc = ClusterDescription::new(id, false).with_server_description(old);
        let err = desc.check_compatible().unwrap_err();
        assert!(matches!(err, ClusterError::IncompatibleDriver(_)));
        assert!(err.to_string().contains("a:1"));
    }

    #[test]
    fn test_check_compatible_ignores_disconnected() {
        let id = ClusterId::from_value(1);
        let desc = ClusterDescription::new(id, false).with_server_description(
            ServerDescription::disconnected(ServerId::new(id, "a:1".parse().unwrap()), "down"),
        );
        assert!(desc.check_compatible().is_ok());
    }

    #[test]
    fn test_logical_session_timeout_takes_minimum() {
        let id = ClusterId::from_value(1);
        let with_timeout = |ep: &str, minutes: u64| {
            ServerDescription::connected(
                ServerId::new(id, ep.parse().unwrap()),
                ServerType::ReplicaSetSecondary,
            )
            .logical_session_timeout(Some(Duration::from_secs(60 * minutes)))
            .build()
        };
        let desc = ClusterDescription::new(id, false)
            .with_server_description(with_timeout("a:1", 30))
            .with_server_description(with_timeout("b:1", 10));
        assert_eq!(desc.logical_session_timeout(), Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_display_includes_dns_error() {
        let desc = ClusterDescription::new(ClusterId::from_value(3), false)
            .with_dns_monitor_error(Some("lookup failed".to_string()));
        let text = desc.to_string();
        assert!(text.contains("ClusterId: \"3\""));
        assert!(text.contains("lookup failed"));
    }
}
