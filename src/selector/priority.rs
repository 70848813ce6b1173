//! Deprioritization of recently failed servers.

use super::ServerSelector;
use crate::description::{ClusterDescription, ClusterType, EndPoint, ServerDescription};
use std::fmt;

/// Avoids the given servers in a sharded cluster, so a retry lands on a
/// different router when one is available.
#[derive(Debug, Clone, Default)]
pub struct PriorityServerSelector {
    deprioritized: Vec<EndPoint>,
}

impl PriorityServerSelector {
    pub fn new(deprioritized: Vec<EndPoint>) -> Self {
        Self { deprioritized }
    }
}

impl ServerSelector for PriorityServerSelector {
    fn select_servers<'a>(
        &self,
        cluster: &ClusterDescription,
        servers: Vec<&'a ServerDescription>,
    ) -> Vec<&'a ServerDescription> {
        if cluster.cluster_type() != ClusterType::Sharded || self.deprioritized.is_empty() {
            return servers;
        }

        let preferred: Vec<_> = servers
            .iter()
            .copied()
            .filter(|s| !self.deprioritized.contains(s.endpoint()))
            .collect();

        if preferred.is_empty() {
            servers
        } else {
            preferred
        }
    }
}

impl fmt::Display for PriorityServerSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let deprioritized: Vec<String> = self.deprioritized.iter().map(|e| e.to_string()).collect();
        write!(
            f,
            "PriorityServerSelector{{ Deprioritized = [{}] }}",
            deprioritized.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description::ServerType;
    use crate::selector::test_support::*;

    #[test]
    fn test_skips_deprioritized_router() {
        let servers = vec![
            server("m1:1", ServerType::ShardRouter, 1),
            server("m2:1", ServerType::ShardRouter, 1),
        ];
        let cluster = cluster(ClusterType::Sharded, &servers);
        let selector = PriorityServerSelector::new(vec!["m1:1".parse().unwrap()]);
        let selected = selector.select_servers(&cluster, servers.iter().collect());
        assert_eq!(endpoints(&selected), vec!["m2:1"]);
    }

    #[test]
    fn test_keeps_everything_when_all_deprioritized() {
        let servers = vec![server("m1:1", ServerType::ShardRouter, 1)];
        let cluster = cluster(ClusterType::Sharded, &servers);
        let selector = PriorityServerSelector::new(vec!["m1:1".parse().unwrap()]);
        assert_eq!(selector.select_servers(&cluster, servers.iter().collect()).len(), 1);
    }

    #[test]
    fn test_ignored_outside_sharded_clusters() {
        let servers = vec![
            server("p:1", ServerType::ReplicaSetPrimary, 1),
            server("s:1", ServerType::ReplicaSetSecondary, 1),
        ];
        let cluster = cluster(ClusterType::ReplicaSet, &servers);
        let selector = PriorityServerSelector::new(vec!["p:1".parse().unwrap()]);
        assert_eq!(selector.select_servers(&cluster, servers.iter().collect()).len(), 2);
    }
}
