//! Read preference matching.

use super::ServerSelector;
use crate::description::{ClusterDescription, ClusterType, ServerDescription, ServerType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Tags a server must carry, all of them, to match.
pub type TagSet = BTreeMap<String, String>;

/// Which replica set members a read may use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadPreferenceMode {
    #[default]
    Primary,
    PrimaryPreferred,
    Secondary,
    SecondaryPreferred,
    Nearest,
}

/// A read preference mode plus ordered tag sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadPreference {
    pub mode: ReadPreferenceMode,
    #[serde(default)]
    pub tag_sets: Vec<TagSet>,
}

impl ReadPreference {
    pub fn new(mode: ReadPreferenceMode) -> Self {
        Self {
            mode,
            tag_sets: Vec::new(),
        }
    }

    pub fn primary() -> Self {
        Self::new(ReadPreferenceMode::Primary)
    }

    pub fn primary_preferred() -> Self {
        Self::new(ReadPreferenceMode::PrimaryPreferred)
    }

    pub fn secondary() -> Self {
        Self::new(ReadPreferenceMode::Secondary)
    }

    pub fn secondary_preferred() -> Self {
        Self::new(ReadPreferenceMode::SecondaryPreferred)
    }

    pub fn nearest() -> Self {
        Self::new(ReadPreferenceMode::Nearest)
    }

    /// Copy with tag sets, tried in order.
    pub fn with_tag_sets(mut self, tag_sets: Vec<TagSet>) -> Self {
        self.tag_sets = tag_sets;
        self
    }
}

impl fmt::Display for ReadPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ Mode: {:?}", self.mode)?;
        if !self.tag_sets.is_empty() {
            write!(f, ", TagSets: {:?}", self.tag_sets)?;
        }
        write!(f, " }}")
    }
}

/// Selects servers allowed by a read preference.
#[derive(Debug, Clone)]
pub struct ReadPreferenceServerSelector {
    read_preference: ReadPreference,
}

impl ReadPreferenceServerSelector {
    pub fn new(read_preference: ReadPreference) -> Self {
        Self { read_preference }
    }

    pub fn read_preference(&self) -> &ReadPreference {
        &self.read_preference
    }

    fn select_for_replica_set<'a>(
        &self,
        servers: Vec<&'a ServerDescription>,
    ) -> Vec<&'a ServerDescription> {
        let (primaries, secondaries): (Vec<_>, Vec<_>) = servers
            .into_iter()
            .filter(|s| {
                matches!(
                    s.server_type(),
                    ServerType::ReplicaSetPrimary | ServerType::ReplicaSetSecondary
                )
            })
            .partition(|s| s.server_type() == ServerType::ReplicaSetPrimary);

        match self.read_preference.mode {
            ReadPreferenceMode::Primary => primaries,
            ReadPreferenceMode::PrimaryPreferred => {
                if primaries.is_empty() {
                    self.select_by_tag_sets(secondaries)
                } else {
                    primaries
                }
            }
            ReadPreferenceMode::Secondary => self.select_by_tag_sets(secondaries),
            ReadPreferenceMode::SecondaryPreferred => {
                let matching = self.select_by_tag_sets(secondaries);
                if matching.is_empty() {
                    primaries
                } else {
                    matching
                }
            }
            ReadPreferenceMode::Nearest => {
                let mut all = primaries;
                all.extend(secondaries);
                self.select_by_tag_sets(all)
            }
        }
    }

    /// First tag set that matches any server wins.
    fn select_by_tag_sets<'a>(
        &self,
        servers: Vec<&'a ServerDescription>,
    ) -> Vec<&'a ServerDescription> {
        if self.read_preference.tag_sets.is_empty() {
            return servers;
        }

        for tag_set in &self.read_preference.tag_sets {
            let matching: Vec<_> = servers
                .iter()
                .copied()
                .filter(|s| matches_tag_set(s, tag_set))
                .collect();
            if !matching.is_empty() {
                return matching;
            }
        }

        Vec::new()
    }
}

fn matches_tag_set(server: &ServerDescription, tag_set: &TagSet) -> bool {
    tag_set
        .iter()
        .all(|(k, v)| server.tags().get(k).is_some_and(|actual| actual == v))
}

impl ServerSelector for ReadPreferenceServerSelector {
    fn select_servers<'a>(
        &self,
        cluster: &ClusterDescription,
        servers: Vec<&'a ServerDescription>,
    ) -> Vec<&'a ServerDescription> {
        if cluster.direct_connection() {
            return servers;
        }

        match cluster.cluster_type() {
            ClusterType::LoadBalanced => servers,
            ClusterType::ReplicaSet => self.select_for_replica_set(servers),
            ClusterType::Sharded => servers
                .into_iter()
                .filter(|s| s.server_type() == ServerType::ShardRouter)
                .collect(),
            ClusterType::Standalone => servers
                .into_iter()
                .filter(|s| s.server_type() == ServerType::Standalone)
                .collect(),
            ClusterType::Unknown => Vec::new(),
        }
    }
}

impl fmt::Display for ReadPreferenceServerSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ReadPreferenceServerSelector{{ ReadPreference = {} }}",
            self.read_preference
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description::{ServerId, ServerType};
    use crate::selector::test_support::*;

    fn tagged(ep: &str, server_type: ServerType, dc: &str) -> ServerDescription {
        ServerDescription::connected(ServerId::new(cluster_id(), ep.parse().unwrap()), server_type)
            .tag("dc", dc)
            .build()
    }

    fn tag_set(dc: &str) -> TagSet {
        [("dc".to_string(), dc.to_string())].into_iter().collect()
    }

    fn replica_set() -> Vec<ServerDescription> {
        vec![
            tagged("p:1", ServerType::ReplicaSetPrimary, "ny"),
            tagged("s1:1", ServerType::ReplicaSetSecondary, "ny"),
            tagged("s2:1", ServerType::ReplicaSetSecondary, "sf"),
            tagged("arb:1", ServerType::ReplicaSetArbiter, "sf"),
        ]
    }

    fn select(rp: ReadPreference, cluster_type: ClusterType, servers: &[ServerDescription]) -> Vec<String> {
        let cluster = cluster(cluster_type, servers);
        let selector = ReadPreferenceServerSelector::new(rp);
        endpoints(&selector.select_servers(&cluster, servers.iter().collect()))
    }

    #[test]
    fn test_primary() {
        assert_eq!(select(ReadPreference::primary(), ClusterType::ReplicaSet, &replica_set()), vec!["p:1"]);
    }

    #[test]
    fn test_secondary_excludes_primary_and_arbiter() {
        assert_eq!(
            select(ReadPreference::secondary(), ClusterType::ReplicaSet, &replica_set()),
            vec!["s1:1", "s2:1"]
        );
    }

    #[test]
    fn test_secondary_with_tag_sets_picks_first_matching_set() {
        let rp = ReadPreference::secondary().with_tag_sets(vec![tag_set("tokyo"), tag_set("sf"), tag_set("ny")]);
        assert_eq!(select(rp, ClusterType::ReplicaSet, &replica_set()), vec!["s2:1"]);
    }

    #[test]
    fn test_empty_tag_set_matches_everything() {
        let rp = ReadPreference::secondary().with_tag_sets(vec![tag_set("tokyo"), TagSet::new()]);
        assert_eq!(select(rp, ClusterType::ReplicaSet, &replica_set()).len(), 2);
    }

    #[test]
    fn test_primary_preferred_falls_back_to_secondaries() {
        let servers: Vec<_> = replica_set().into_iter().skip(1).collect();
        assert_eq!(
            select(ReadPreference::primary_preferred(), ClusterType::ReplicaSet, &servers),
            vec!["s1:1", "s2:1"]
        );
        assert_eq!(
            select(ReadPreference::primary_preferred(), ClusterType::ReplicaSet, &replica_set()),
            vec!["p:1"]
        );
    }

    #[test]
    fn test_secondary_preferred_falls_back_to_primary() {
        let rp = ReadPreference::secondary_preferred().with_tag_sets(vec![tag_set("tokyo")]);
        assert_eq!(select(rp, ClusterType::ReplicaSet, &replica_set()), vec!["p:1"]);
    }

    #[test]
    fn test_nearest_includes_primary() {
        let rp = ReadPreference::nearest().with_tag_sets(vec![tag_set("ny")]);
        assert_eq!(select(rp, ClusterType::ReplicaSet, &replica_set()), vec!["p:1", "s1:1"]);
    }

    #[test]
    fn test_sharded_and_standalone_filter_by_type() {
        let servers = vec![
            server("m1:1", ServerType::ShardRouter, 1),
            server("x:1", ServerType::Standalone, 1),
        ];
        assert_eq!(select(ReadPreference::secondary(), ClusterType::Sharded, &servers), vec!["m1:1"]);
        assert_eq!(select(ReadPreference::primary(), ClusterType::Standalone, &servers), vec!["x:1"]);
    }

    #[test]
    fn test_unknown_cluster_selects_nothing() {
        assert!(select(ReadPreference::nearest(), ClusterType::Unknown, &replica_set()).is_empty());
    }

    #[test]
    fn test_direct_connection_accepts_any_server() {
        let servers = vec![server("s:1", ServerType::ReplicaSetSecondary, 1)];
        let cluster = ClusterDescription::new(cluster_id(), true)
            .with_type(ClusterType::ReplicaSet)
            .with_server_description(servers[0].clone());
        let selector = ReadPreferenceServerSelector::new(ReadPreference::primary());
        assert_eq!(selector.select_servers(&cluster, servers.iter().collect()).len(), 1);
    }

    #[test]
    fn test_display() {
        let selector = ReadPreferenceServerSelector::new(ReadPreference::primary());
        assert_eq!(
            selector.to_string(),
            "ReadPreferenceServerSelector{ ReadPreference = { Mode: Primary } }"
        );
    }
}
