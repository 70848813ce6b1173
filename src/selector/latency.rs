//! Latency window filtering.

use super::ServerSelector;
use crate::description::{ClusterDescription, ServerDescription};
use std::fmt;
use std::time::Duration;

/// Keeps servers whose round trip time is within `allowed_latency_range`
/// of the fastest candidate.
#[derive(Debug, Clone, Copy)]
pub struct LatencyLimitingServerSelector {
    allowed_latency_range: Duration,
}

impl LatencyLimitingServerSelector {
    pub fn new(allowed_latency_range: Duration) -> Self {
        Self {
            allowed_latency_range,
        }
    }

    pub fn allowed_latency_range(&self) -> Duration {
        self.allowed_latency_range
    }
}

impl ServerSelector for LatencyLimitingServerSelector {
    fn select_servers<'a>(
        &self,
        _cluster: &ClusterDescription,
        servers: Vec<&'a ServerDescription>,
    ) -> Vec<&'a ServerDescription> {
        if servers.len() < 2 {
            return servers;
        }

        let Some(fastest) = servers.iter().map(|s| s.average_round_trip_time()).min() else {
            return servers;
        };
        let limit = fastest.saturating_add(self.allowed_latency_range);

        servers
            .into_iter()
            .filter(|s| s.average_round_trip_time() <= limit)
            .collect()
    }
}

impl fmt::Display for LatencyLimitingServerSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LatencyLimitingServerSelector{{ AllowedLatencyRange = {}ms }}",
            self.allowed_latency_range.as_millis()
        )
    }
}
