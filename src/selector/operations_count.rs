//! Least-busy filtering by outstanding operation count.

use super::ServerSelector;
use crate::description::{ClusterDescription, EndPoint, ServerDescription};
use std::collections::HashMap;
use std::fmt;

/// Keeps the candidates with the fewest outstanding operations.
///
/// Counts are captured when the selector is built, once per selection
/// attempt. Servers without a recorded count are treated as idle.
#[derive(Debug, Clone, Default)]
pub struct OperationsCountServerSelector {
    counts: HashMap<EndPoint, u32>,
}

impl OperationsCountServerSelector {
    pub fn new(counts: HashMap<EndPoint, u32>) -> Self {
        Self { counts }
    }

    fn count(&self, endpoint: &EndPoint) -> u32 {
        self.counts.get(endpoint).copied().unwrap_or(0)
    }
}

impl FromIterator<(EndPoint, u32)> for OperationsCountServerSelector {
    fn from_iter<I: IntoIterator<Item = (EndPoint, u32)>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl ServerSelector for OperationsCountServerSelector {
    fn select_servers<'a>(
        &self,
        _cluster: &ClusterDescription,
        servers: Vec<&'a ServerDescription>,
    ) -> Vec<&'a ServerDescription> {
        if servers.len() < 2 {
            return servers;
        }

        let Some(min) = servers.iter().map(|s| self.count(s.endpoint())).min() else {
            return servers;
        };

        servers
            .into_iter()
            .filter(|s| self.count(s.endpoint()) == min)
            .collect()
    }
}

impl fmt::Display for OperationsCountServerSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OperationsCountServerSelector")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description::{ClusterType, ServerType};
    use crate::selector::test_support::*;

    #[test]
    fn test_keeps_least_busy() {
        let servers = vec![
            server("a:1", ServerType::ShardRouter, 1),
            server("b:1", ServerType::ShardRouter, 1),
            server("c:1", ServerType::ShardRouter, 1),
        ];
        let cluster = cluster(ClusterType::Sharded, &servers);
        let selector: OperationsCountServerSelector = [
            ("a:1".parse().unwrap(), 4),
            ("b:1".parse().unwrap(), 1),
            ("c:1".parse().unwrap(), 1),
        ]
        .into_iter()
        .collect();

        let selected = selector.select_servers(&cluster, servers.iter().collect());
        assert_eq!(endpoints(&selected), vec!["b:1", "c:1"]);
    }

    #[test]
    fn test_missing_counts_are_idle() {
        let servers = vec![
            server("a:1", ServerType::ShardRouter, 1),
            server("b:1", ServerType::ShardRouter, 1),
        ];
        let cluster = cluster(ClusterType::Sharded, &servers);
        let selector: OperationsCountServerSelector =
            [("a:1".parse().unwrap(), 2)].into_iter().collect();
        let selected = selector.select_servers(&cluster, servers.iter().collect());
        assert_eq!(endpoints(&selected), vec!["b:1"]);
    }
}
