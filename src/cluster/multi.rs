//! Discovery of replica sets, sharded clusters and standalones.
//!
//! The cluster starts from the seed list (or from DNS SRV results) with
//! type Unknown, or ReplicaSet when a set name is configured. The first
//! valid report fixes the concrete type, which then decides the rules for
//! every later report.

use super::election::{ElectionInfo, display_or_null};
use super::reducer::{ClusterMessage, Reduction};
use super::registry::ServerRegistry;
use crate::config::ClusterSettings;
use crate::description::{
    ClusterDescription, ClusterType, EndPoint, ServerDescription, ServerState, ServerType,
};
use crate::error::ClusterError;
use crate::server::ServerHandle;
use rand::seq::SliceRandom;
use std::sync::Arc;
use tracing::{info, warn};

pub(crate) struct MultiServerTopology {
    settings: Arc<ClusterSettings>,
    registry: Arc<ServerRegistry>,
    /// Pinned on the first replica set report unless configured.
    replica_set_name: Option<String>,
    max_election_info: ElectionInfo,
}

impl MultiServerTopology {
    pub fn new(settings: Arc<ClusterSettings>, registry: Arc<ServerRegistry>) -> Self {
        let replica_set_name = settings.replica_set_name.clone();
        Self {
            settings,
            registry,
            replica_set_name,
            max_election_info: ElectionInfo::default(),
        }
    }

    pub fn registry(&self) -> &ServerRegistry {
        &self.registry
    }

    /// Servers for the seed list. SRV clusters wait for the DNS monitor.
    pub fn open(&mut self, current: &ClusterDescription) -> Reduction {
        let mut new_servers = Vec::new();
        let mut description = current.clone().with_type(self.settings.initial_cluster_type());
        if !self.settings.is_srv() {
            for endpoint in &self.settings.endpoints {
                description = self.ensure_server(description, endpoint, &mut new_servers);
            }
        }
        Reduction::with_new_servers(description, new_servers)
    }

    pub fn apply(
        &mut self,
        current: &ClusterDescription,
        message: ClusterMessage,
    ) -> Result<Reduction, ClusterError> {
        match message {
            ClusterMessage::ServerDescriptionChanged(event) => {
                self.process_server_description_changed(current, event.new)
            }
            ClusterMessage::DnsResults(endpoints) => Ok(self.process_dns_results(current, endpoints)),
            ClusterMessage::DnsError(error) => Ok(Reduction::updated(
                current.clone().with_dns_monitor_error(Some(error)),
            )),
        }
    }

    fn process_server_description_changed(
        &mut self,
        current: &ClusterDescription,
        new: ServerDescription,
    ) -> Result<Reduction, ClusterError> {
        let mut new_servers = Vec::new();
        let mut description = current.clone();

        if new.state() == ServerState::Disconnected {
            description = description.with_server_description(new);
        } else if self.is_server_valid_for_cluster(description.cluster_type(), new.server_type()) {
            // A ghost leaves an Unknown cluster Unknown
            if description.cluster_type() == ClusterType::Unknown
                && new.server_type() != ServerType::ReplicaSetGhost
            {
                description = description.with_type(new.server_type().to_cluster_type());
            }

            description = match description.cluster_type() {
                ClusterType::Standalone => self.process_standalone_change(description, new),
                ClusterType::ReplicaSet => {
                    self.process_replica_set_change(description, new, &mut new_servers)
                }
                ClusterType::Unknown if new.server_type() == ServerType::ReplicaSetGhost => {
                    self.process_replica_set_change(description, new, &mut new_servers)
                }
                ClusterType::Sharded => self.process_sharded_change(description, new),
                other => {
                    return Err(ClusterError::Internal(format!(
                        "Unexpected cluster type {other}."
                    )));
                }
            };
        } else {
            let reason = format!(
                "The server {} with type {} is not valid for cluster type {}.",
                new.endpoint(),
                new.server_type(),
                description.cluster_type()
            );
            description = self.remove_server(description, new.endpoint(), &reason);
        }

        Ok(Reduction::with_new_servers(description, new_servers))
    }

    fn is_server_valid_for_cluster(&self, cluster_type: ClusterType, server_type: ServerType) -> bool {
        match cluster_type {
            ClusterType::Standalone => server_type == ServerType::Standalone,
            ClusterType::ReplicaSet => server_type.is_replica_set_member(),
            ClusterType::Sharded => server_type == ServerType::ShardRouter,
            ClusterType::Unknown => match server_type {
                ServerType::Standalone => self.registry.len() == 1 || self.settings.is_srv(),
                t => t.is_replica_set_member() || t == ServerType::ShardRouter,
            },
            ClusterType::LoadBalanced => false,
        }
    }

    fn process_standalone_change(
        &self,
        mut description: ClusterDescription,
        new: ServerDescription,
    ) -> ClusterDescription {
        match new.server_type() {
            ServerType::Unknown => {}
            ServerType::Standalone => {
                let others: Vec<EndPoint> = description
                    .endpoints()
                    .filter(|endpoint| *endpoint != new.endpoint())
                    .cloned()
                    .collect();
                for endpoint in &others {
                    description = self.remove_server(
                        description,
                        endpoint,
                        "Removing all other end points once a standalone is discovered.",
                    );
                }
            }
            _ => {
                return self.remove_server(description, new.endpoint(), "Server is not a standalone server.");
            }
        }
        description.with_server_description(new)
    }

    fn process_sharded_change(
        &self,
        description: ClusterDescription,
        new: ServerDescription,
    ) -> ClusterDescription {
        if new.server_type() != ServerType::ShardRouter {
            return self.remove_server(description, new.endpoint(), "Server is not a shard router.");
        }
        description.with_server_description(new)
    }

    fn process_replica_set_change(
        &mut self,
        description: ClusterDescription,
        new: ServerDescription,
        new_servers: &mut Vec<ServerHandle>,
    ) -> ClusterDescription {
        let server_type = new.server_type();
        if !server_type.is_replica_set_member() {
            let reason = format!("Server is a {server_type}, not a replica set member.");
            return self.remove_server(description, new.endpoint(), &reason);
        }

        if server_type == ServerType::ReplicaSetGhost {
            return description.with_server_description(new);
        }

        let reported_name = new.replica_set_config().and_then(|config| config.name.clone());
        if self.replica_set_name.is_none() {
            self.replica_set_name = reported_name.clone();
        }
        if self.replica_set_name != reported_name {
            let reason = format!(
                "Server was a member of the '{}' replica set, but should be '{}'.",
                reported_name.as_deref().unwrap_or_default(),
                self.replica_set_name.as_deref().unwrap_or_default()
            );
            return self.remove_server(description, new.endpoint(), &reason);
        }

        let mut description = description.with_server_description(new.clone());
        description = self.ensure_servers(description, &new, new_servers);

        let canonical_differs = new
            .canonical_endpoint()
            .is_some_and(|canonical| canonical != new.endpoint());
        if canonical_differs && server_type != ServerType::ReplicaSetPrimary {
            return self.remove_server(
                description,
                new.endpoint(),
                "CanonicalEndPoint is different than seed list EndPoint and server is not Primary.",
            );
        }

        if server_type == ServerType::ReplicaSetPrimary {
            description = self.process_primary(description, &new);
        }

        description
    }

    /// Election bookkeeping for an accepted primary report.
    fn process_primary(
        &mut self,
        mut description: ClusterDescription,
        new: &ServerDescription,
    ) -> ClusterDescription {
        let set_version = new.replica_set_config().and_then(|config| config.version);
        let election_id = new.election_id();

        if set_version.is_some() || election_id.is_some() {
            let Some(next) =
                self.max_election_info
                    .compare(set_version, election_id, new.max_wire_version())
            else {
                return self.invalidate_stale_primary(description, new);
            };

            if next != self.max_election_info {
                let set_name = self.replica_set_name.as_deref().unwrap_or_default();
                let reported = format!(
                    "({}, {})",
                    display_or_null(set_version),
                    display_or_null(election_id)
                );
                let message = if self.max_election_info.is_empty() {
                    format!(
                        "Initializing (maxSetVersion, maxElectionId): Saving tuple (setVersion, electionId) of {next} \
                         as (maxSetVersion, maxElectionId) for replica set \"{set_name}\" because replica set primary {} \
                         sent {reported}, the first (setVersion, electionId) tuple ever seen for replica set \"{set_name}\".",
                        new.endpoint()
                    )
                } else {
                    format!(
                        "Updating stale electionId and setVersion: Updating the current (maxSetVersion, maxElectionId) \
                         tuple from {} to {next} for replica set \"{set_name}\" because replica set primary {} sent \
                         {reported}, a larger (setVersion, electionId) tuple than the saved tuple, {}.",
                        self.max_election_info,
                        new.endpoint(),
                        self.max_election_info
                    )
                };
                self.registry.information(message);
                self.max_election_info = next;
            }
        }

        let others: Vec<EndPoint> = description
            .primaries()
            .filter(|primary| primary.endpoint() != new.endpoint())
            .map(|primary| primary.endpoint().clone())
            .collect();
        for endpoint in &others {
            let Some(server) = self.registry.get(endpoint) else {
                continue;
            };
            info!(
                cluster_id = %self.registry.cluster_id(),
                endpoint = %endpoint,
                new_primary = %new.endpoint(),
                "demoting previous primary"
            );
            server.invalidate("NoLongerPrimary", new.topology_version());
            description = description.with_server_description(ServerDescription::disconnected(
                server.server_id().clone(),
                "NoLongerPrimary",
            ));
        }

        description
    }

    fn invalidate_stale_primary(
        &self,
        description: ClusterDescription,
        new: &ServerDescription,
    ) -> ClusterDescription {
        let Some(server) = self.registry.get(new.endpoint()) else {
            return description;
        };

        warn!(
            cluster_id = %self.registry.cluster_id(),
            endpoint = %new.endpoint(),
            max_election_info = %self.max_election_info,
            "reported primary is stale"
        );
        server.invalidate("ReportedPrimaryIsStale", new.topology_version());
        self.registry.information(format!(
            "Invalidating server: Setting ServerType to \"Unknown\" for {} because it claimed to be the replica set \
             primary for replica set \"{}\" but sent a (setVersion, electionId) tuple of ({}, {}) that was less than \
             the largest tuple seen, (maxSetVersion, maxElectionId), of {}.",
            new.endpoint(),
            new.replica_set_config()
                .and_then(|config| config.name.as_deref())
                .unwrap_or_default(),
            display_or_null(new.replica_set_config().and_then(|config| config.version)),
            display_or_null(new.election_id()),
            self.max_election_info
        ));

        description.with_server_description(ServerDescription::disconnected(
            server.server_id().clone(),
            "ReportedPrimaryIsStale",
        ))
    }

    /// Track the members a report lists and, for a primary, drop the rest.
    fn ensure_servers(
        &self,
        mut description: ClusterDescription,
        reported: &ServerDescription,
        new_servers: &mut Vec<ServerHandle>,
    ) -> ClusterDescription {
        let members: &[EndPoint] = reported
            .replica_set_config()
            .map(|config| config.members.as_slice())
            .unwrap_or_default();
        let is_primary = reported.server_type() == ServerType::ReplicaSetPrimary;

        if is_primary || description.primaries().next().is_none() {
            for endpoint in members {
                description = self.ensure_server(description, endpoint, new_servers);
            }
        }

        if is_primary {
            let extras: Vec<EndPoint> = description
                .endpoints()
                .filter(|endpoint| !members.contains(endpoint))
                .cloned()
                .collect();
            for endpoint in &extras {
                description =
                    self.remove_server(description, endpoint, "Server is not in the host list of the primary.");
            }
        }

        description
    }

    fn process_dns_results(&self, current: &ClusterDescription, endpoints: Vec<EndPoint>) -> Reduction {
        if endpoints.is_empty() {
            return Reduction::unchanged();
        }

        let mut description = current.clone();
        let current_endpoints: Vec<EndPoint> = current.endpoints().cloned().collect();

        let to_remove: Vec<&EndPoint> = current_endpoints
            .iter()
            .filter(|endpoint| !endpoints.contains(endpoint))
            .collect();
        for endpoint in &to_remove {
            description =
                self.remove_server(description, endpoint, "Server no longer appears in the DNS SRV records.");
        }

        let mut to_add: Vec<EndPoint> = endpoints
            .into_iter()
            .filter(|endpoint| !current_endpoints.contains(endpoint))
            .collect();
        let max_hosts = self.settings.srv_max_hosts;
        if max_hosts > 0 {
            to_add.shuffle(&mut rand::thread_rng());
            let room = (max_hosts + to_remove.len()).saturating_sub(current_endpoints.len());
            to_add.truncate(room);
        }

        let mut new_servers = Vec::new();
        for endpoint in &to_add {
            description = self.ensure_server(description, endpoint, &mut new_servers);
        }

        Reduction::with_new_servers(description.with_dns_monitor_error(None), new_servers)
    }

    fn ensure_server(
        &self,
        description: ClusterDescription,
        endpoint: &EndPoint,
        new_servers: &mut Vec<ServerHandle>,
    ) -> ClusterDescription {
        match self.registry.ensure_server(endpoint) {
            Some(server) => {
                let description = description.with_server_description(server.description());
                new_servers.push(server);
                description
            }
            None => description,
        }
    }

    fn remove_server(
        &self,
        description: ClusterDescription,
        endpoint: &EndPoint,
        reason: &str,
    ) -> ClusterDescription {
        if self.registry.remove_server(endpoint, reason) {
            description.without_server_description(endpoint)
        } else {
            description
        }
    }
}
