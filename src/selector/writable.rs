//! Writable server selection.

use super::ServerSelector;
use crate::description::{ClusterDescription, ClusterType, ServerDescription};
use std::fmt;

/// Selects servers that accept writes.
///
/// Direct and load-balanced connections accept whatever server they have.
#[derive(Debug, Clone, Copy, Default)]
pub struct WritableServerSelector;

impl ServerSelector for WritableServerSelector {
    fn select_servers<'a>(
        &self,
        cluster: &ClusterDescription,
        servers: Vec<&'a ServerDescription>,
    ) -> Vec<&'a ServerDescription> {
        if cluster.direct_connection() || cluster.cluster_type() == ClusterType::LoadBalanced {
            return servers;
        }

        servers
            .into_iter()
            .filter(|s| s.server_type().is_writable())
            .collect()
    }
}

impl fmt::Display for WritableServerSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WritableServerSelector")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description::ServerType;
    use crate::selector::test_support::*;

    #[test]
    fn test_selects_primary_only() {
        let servers = vec![
            server("p:1", ServerType::ReplicaSetPrimary, 1),
            server("s:1", ServerType::ReplicaSetSecondary, 1),
            server("a:1", ServerType::ReplicaSetArbiter, 1),
        ];
        let cluster = cluster(ClusterType::ReplicaSet, &servers);
        let selected = WritableServerSelector.select_servers(&cluster, servers.iter().collect());
        assert_eq!(endpoints(&selected), vec!["p:1"]);
    }

    #[test]
    fn test_selects_all_shard_routers() {
        let servers = vec![
            server("m1:1", ServerType::ShardRouter, 1),
            server("m2:1", ServerType::ShardRouter, 1),
        ];
        let cluster = cluster(ClusterType::Sharded, &servers);
        let selected = WritableServerSelector.select_servers(&cluster, servers.iter().collect());
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn test_direct_connection_keeps_secondary() {
        let servers = vec![server("s:1", ServerType::ReplicaSetSecondary, 1)];
        let cluster = ClusterDescription::new(cluster_id(), true)
            .with_server_description(servers[0].clone());
        let selected = WritableServerSelector.select_servers(&cluster, servers.iter().collect());
        assert_eq!(selected.len(), 1);
    }
}
