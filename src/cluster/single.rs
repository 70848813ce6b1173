//! Direct connection to exactly one server.

use super::reducer::{ClusterMessage, Reduction};
use super::registry::ServerRegistry;
use crate::config::ClusterSettings;
use crate::description::{ClusterDescription, ClusterType, ServerDescription, ServerState, ServerType};
use crate::error::ClusterError;
use std::sync::Arc;
use tracing::{debug, warn};

/// No discovery: the cluster type simply follows the one server's type.
pub(crate) struct SingleServerTopology {
    settings: Arc<ClusterSettings>,
    registry: Arc<ServerRegistry>,
}

impl SingleServerTopology {
    pub fn new(settings: Arc<ClusterSettings>, registry: Arc<ServerRegistry>) -> Self {
        Self { settings, registry }
    }

    pub fn registry(&self) -> &ServerRegistry {
        &self.registry
    }

    pub fn open(&mut self, current: &ClusterDescription) -> Result<Reduction, ClusterError> {
        let [endpoint] = self.settings.endpoints.as_slice() else {
            return Err(ClusterError::InvalidConfiguration(format!(
                "a direct connection requires exactly one endpoint, got {}",
                self.settings.endpoints.len()
            )));
        };

        let mut description = current.clone().with_type(ClusterType::Unknown);
        let mut new_servers = Vec::new();
        if let Some(server) = self.registry.ensure_server(endpoint) {
            description = description.with_server_description(server.description());
            new_servers.push(server);
        }
        Ok(Reduction::with_new_servers(description, new_servers))
    }

    pub fn apply(
        &mut self,
        current: &ClusterDescription,
        message: ClusterMessage,
    ) -> Result<Reduction, ClusterError> {
        let ClusterMessage::ServerDescriptionChanged(event) = message else {
            debug!(cluster_id = %self.registry.cluster_id(), "direct connection ignores DNS messages");
            return Ok(Reduction::unchanged());
        };
        let new = event.new;

        // Keep the established type while the server is unreachable
        if new.state() == ServerState::Disconnected {
            return Ok(Reduction::updated(current.clone().with_server_description(new)));
        }

        if let Some(expected) = &self.settings.replica_set_name {
            let reported = new.replica_set_config().and_then(|config| config.name.as_deref());
            if !new.server_type().is_replica_set_member() || reported != Some(expected.as_str()) {
                let reason = format!(
                    "Server reports replica set name '{}' but '{}' was expected.",
                    reported.unwrap_or_default(),
                    expected
                );
                warn!(
                    cluster_id = %self.registry.cluster_id(),
                    endpoint = %new.endpoint(),
                    reason = %reason,
                    "replica set name mismatch"
                );
                let entry = ServerDescription::disconnected(new.server_id().clone(), reason);
                return Ok(Reduction::updated(
                    current
                        .clone()
                        .with_type(ClusterType::Unknown)
                        .with_server_description(entry),
                ));
            }
        }

        let cluster_type = match new.server_type() {
            ServerType::LoadBalancer => ClusterType::Unknown,
            server_type => server_type.to_cluster_type(),
        };
        Ok(Reduction::updated(
            current
                .clone()
                .with_type(cluster_type)
                .with_server_description(new),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::super::reducer::test_support::*;
    use crate::config::ClusterSettings;
    use crate::description::{ClusterType, ServerType};

    fn direct(replica_set_name: Option<&str>) -> ClusterSettings {
        ClusterSettings {
            direct_connection: true,
            replica_set_name: replica_set_name.map(str::to_string),
            ..ClusterSettings::with_endpoints(vec!["a:1".parse().unwrap()])
        }
    }

    #[test]
    fn test_open_creates_the_one_server() {
        let harness = Harness::new(direct(None));
        assert!(harness.description.direct_connection());
        assert_eq!(harness.description.cluster_type(), ClusterType::Unknown);
        assert_eq!(harness.endpoints(), vec!["a:1"]);
    }

    #[test]
    fn test_type_follows_server() {
        let mut harness = Harness::new(direct(None));

        harness.report(connected("a:1", ServerType::Standalone).build());
        assert_eq!(harness.description.cluster_type(), ClusterType::Standalone);

        harness.report(member("a:1", ServerType::ReplicaSetSecondary, "rs", &["a:1", "b:1"]).build());
        assert_eq!(harness.description.cluster_type(), ClusterType::ReplicaSet);
        // No discovery from a direct connection
        assert_eq!(harness.endpoints(), vec!["a:1"]);

        harness.report(connected("a:1", ServerType::ShardRouter).build());
        assert_eq!(harness.description.cluster_type(), ClusterType::Sharded);
    }

    #[test]
    fn test_disconnect_keeps_type() {
        let mut harness = Harness::new(direct(None));
        harness.report(connected("a:1", ServerType::Standalone).build());
        harness.report(disconnected("a:1", "HeartbeatFailed"));

        assert_eq!(harness.description.cluster_type(), ClusterType::Standalone);
        assert_eq!(harness.types()[0].1, ServerType::Unknown);
    }

    #[test]
    fn test_replica_set_name_mismatch() {
        let mut harness = Harness::new(direct(Some("rs")));
        harness.report(member("a:1", ServerType::ReplicaSetPrimary, "other", &["a:1"]).build());

        assert_eq!(harness.description.cluster_type(), ClusterType::Unknown);
        let entry = &harness.description.servers()[0];
        assert!(!entry.is_connected());
        assert_eq!(
            entry.reason_changed(),
            "Server reports replica set name 'other' but 'rs' was expected."
        );
    }

    #[test]
    fn test_replica_set_name_required_from_standalone() {
        let mut harness = Harness::new(direct(Some("rs")));
        harness.report(connected("a:1", ServerType::Standalone).build());

        assert_eq!(harness.description.cluster_type(), ClusterType::Unknown);
        assert_eq!(
            harness.description.servers()[0].reason_changed(),
            "Server reports replica set name '' but 'rs' was expected."
        );
    }

    #[test]
    fn test_matching_replica_set_name() {
        let mut harness = Harness::new(direct(Some("rs")));
        harness.report(member("a:1", ServerType::ReplicaSetPrimary, "rs", &["a:1"]).build());

        assert_eq!(harness.description.cluster_type(), ClusterType::ReplicaSet);
        assert!(harness.description.servers()[0].is_connected());
    }

    #[test]
    fn test_dns_messages_are_ignored() {
        let mut harness = Harness::new(direct(None));
        harness.apply(dns(&["b:1"]));
        assert_eq!(harness.endpoints(), vec!["a:1"]);
    }
}
