//! Uniform random choice.

use super::ServerSelector;
use crate::description::{ClusterDescription, ServerDescription};
use rand::seq::SliceRandom;
use std::fmt;

/// Picks one candidate uniformly at random.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomServerSelector;

impl ServerSelector for RandomServerSelector {
    fn select_servers<'a>(
        &self,
        _cluster: &ClusterDescription,
        servers: Vec<&'a ServerDescription>,
    ) -> Vec<&'a ServerDescription> {
        if servers.len() < 2 {
            return servers;
        }

        servers
            .choose(&mut rand::thread_rng())
            .copied()
            .into_iter()
            .collect()
    }
}

impl fmt::Display for RandomServerSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RandomServerSelector")
    }
}
