//! The reducer task.
//!
//! Servers and the DNS monitor send [`ClusterMessage`]s over one bounded
//! channel. A single task drains it and applies each message to the
//! current description through the cluster's [`Topology`], so reductions
//! never run concurrently.

use super::ClusterShared;
use super::load_balanced::{LoadBalancedTopology, ServerReady};
use super::multi::MultiServerTopology;
use super::registry::ServerRegistry;
use super::single::SingleServerTopology;
use crate::config::{ClusterKind, ClusterSettings};
use crate::description::{ClusterDescription, EndPoint};
use crate::error::ClusterError;
use crate::server::{ClusterableServer, ServerDescriptionChangedEvent, ServerHandle};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error};

/// Capacity of the channel into the reducer.
pub(crate) const MESSAGE_CHANNEL_CAPACITY: usize = 1024;

/// Input to the reducer.
#[derive(Debug)]
pub(crate) enum ClusterMessage {
    ServerDescriptionChanged(ServerDescriptionChangedEvent),
    /// A complete replacement list from the DNS monitor.
    DnsResults(Vec<EndPoint>),
    DnsError(String),
}

/// Outcome of one reduction.
#[derive(Debug, Default)]
pub(crate) struct Reduction {
    /// Description to publish, or `None` to leave the current one alone.
    pub description: Option<ClusterDescription>,
    /// Servers created by this reduction, to be initialized once it is published.
    pub new_servers: Vec<ServerHandle>,
}

impl Reduction {
    pub fn unchanged() -> Self {
        Self::default()
    }

    pub fn updated(description: ClusterDescription) -> Self {
        Self {
            description: Some(description),
            new_servers: Vec::new(),
        }
    }

    pub fn with_new_servers(description: ClusterDescription, new_servers: Vec<ServerHandle>) -> Self {
        Self {
            description: Some(description),
            new_servers,
        }
    }
}

/// Per-kind reduction rules.
pub(crate) enum Topology {
    Single(SingleServerTopology),
    Multi(MultiServerTopology),
    LoadBalanced(LoadBalancedTopology),
}

impl Topology {
    pub fn new(settings: Arc<ClusterSettings>, registry: Arc<ServerRegistry>) -> Self {
        match settings.cluster_kind() {
            ClusterKind::Single => Topology::Single(SingleServerTopology::new(settings, registry)),
            ClusterKind::Multi => Topology::Multi(MultiServerTopology::new(settings, registry)),
            ClusterKind::LoadBalanced => {
                Topology::LoadBalanced(LoadBalancedTopology::new(settings, registry))
            }
        }
    }

    /// The readiness signal of a load-balanced topology.
    pub fn server_ready(&self) -> Option<Arc<ServerReady>> {
        match self {
            Topology::LoadBalanced(topology) => Some(topology.ready()),
            _ => None,
        }
    }

    /// Create the initial servers and the first description.
    pub fn open(&mut self, current: &ClusterDescription) -> Result<Reduction, ClusterError> {
        match self {
            Topology::Single(topology) => topology.open(current),
            Topology::Multi(topology) => Ok(topology.open(current)),
            Topology::LoadBalanced(topology) => Ok(topology.open(current)),
        }
    }

    /// Reduce one message against `current`.
    pub fn apply(
        &mut self,
        current: &ClusterDescription,
        message: ClusterMessage,
    ) -> Result<Reduction, ClusterError> {
        if let ClusterMessage::ServerDescriptionChanged(event) = &message {
            let endpoint = event.new.endpoint();
            if !self.is_member(endpoint) {
                debug!(endpoint = %endpoint, "ignoring report from a server that is no longer a member");
                return Ok(Reduction::unchanged());
            }
        }

        match self {
            Topology::Single(topology) => topology.apply(current, message),
            Topology::Multi(topology) => topology.apply(current, message),
            Topology::LoadBalanced(topology) => topology.apply(current, message),
        }
    }

    fn is_member(&self, endpoint: &EndPoint) -> bool {
        match self {
            Topology::Single(topology) => topology.registry().contains(endpoint),
            Topology::Multi(topology) => topology.registry().contains(endpoint),
            Topology::LoadBalanced(topology) => topology.registry().contains(endpoint),
        }
    }
}

/// Drain `messages` until shutdown or disposal.
pub(crate) async fn run_reducer(
    mut topology: Topology,
    shared: Arc<ClusterShared>,
    mut messages: mpsc::Receiver<ClusterMessage>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let cluster_id = shared.cluster_id();
    loop {
        let message = tokio::select! {
            message = messages.recv() => match message {
                Some(message) => message,
                None => break,
            },
            _ = shutdown.recv() => break,
        };

        if shared.is_disposed() {
            break;
        }

        let current = shared.description();
        match topology.apply(&current, message) {
            Ok(reduction) => shared.apply_reduction(reduction),
            Err(e) => {
                error!(cluster_id = %cluster_id, error = %e, "reduction failed");
                shared
                    .events()
                    .information(cluster_id, format!("Unexpected error in cluster reducer: {e}"));
            }
        }
    }
    debug!(cluster_id = %cluster_id, "reducer stopped");
}

/// Initialize servers created by a reduction.
pub(crate) fn initialize_servers(servers: &[ServerHandle]) {
    for server in servers {
        server.initialize();
    }
}
