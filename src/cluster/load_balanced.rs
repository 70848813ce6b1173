//! A deployment behind a load balancer.
//!
//! There is exactly one logical server and nothing to discover. Selection
//! waits for that server's first report and then always returns it.

use super::reducer::{ClusterMessage, Reduction};
use super::registry::ServerRegistry;
use super::source::ChangeSignal;
use crate::config::ClusterSettings;
use crate::description::{ClusterDescription, ClusterType, EndPoint};
use crate::error::ClusterError;
use crate::server::ServerHandle;
use std::sync::{Arc, OnceLock};
use tracing::{error, info};

/// Set once when the load-balanced server first reports.
#[derive(Debug, Default)]
pub(crate) struct ServerReady {
    server: OnceLock<ServerHandle>,
    signal: Arc<ChangeSignal>,
}

impl ServerReady {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn server(&self) -> Option<ServerHandle> {
        self.server.get().cloned()
    }

    pub fn signal(&self) -> &Arc<ChangeSignal> {
        &self.signal
    }

    /// Record the ready server and wake selectors. Later calls do nothing.
    pub fn mark_ready(&self, server: ServerHandle) {
        if self.server.set(server).is_ok() {
            self.signal.fire();
        }
    }

    /// Wake selectors without marking the server ready.
    pub fn wake(&self) {
        self.signal.fire();
    }
}

pub(crate) struct LoadBalancedTopology {
    settings: Arc<ClusterSettings>,
    registry: Arc<ServerRegistry>,
    ready: Arc<ServerReady>,
    /// True once the DNS monitor produced a usable endpoint.
    resolved: bool,
}

impl LoadBalancedTopology {
    pub fn new(settings: Arc<ClusterSettings>, registry: Arc<ServerRegistry>) -> Self {
        Self {
            settings,
            registry,
            ready: Arc::new(ServerReady::new()),
            resolved: false,
        }
    }

    pub fn registry(&self) -> &ServerRegistry {
        &self.registry
    }

    pub fn ready(&self) -> Arc<ServerReady> {
        Arc::clone(&self.ready)
    }

    pub fn open(&mut self, current: &ClusterDescription) -> Reduction {
        let description = current.clone().with_type(ClusterType::LoadBalanced);
        if self.settings.is_srv() {
            return Reduction::updated(description);
        }
        match self.settings.endpoints.first() {
            Some(endpoint) => self.track(description, endpoint),
            None => Reduction::updated(description),
        }
    }

    pub fn apply(
        &mut self,
        current: &ClusterDescription,
        message: ClusterMessage,
    ) -> Result<Reduction, ClusterError> {
        match message {
            ClusterMessage::ServerDescriptionChanged(event) => {
                let endpoint = event.new.endpoint().clone();
                let description = current.clone().with_server_description(event.new);
                if let Some(server) = self.registry.get(&endpoint) {
                    self.ready.mark_ready(server);
                }
                Ok(Reduction::updated(description))
            }
            ClusterMessage::DnsResults(endpoints) => Ok(self.process_dns_results(current, endpoints)),
            ClusterMessage::DnsError(error) => Ok(Reduction::updated(
                current.clone().with_dns_monitor_error(Some(error)),
            )),
        }
    }

    fn process_dns_results(&mut self, current: &ClusterDescription, endpoints: Vec<EndPoint>) -> Reduction {
        if self.resolved {
            return Reduction::unchanged();
        }

        let endpoint = match endpoints.as_slice() {
            [endpoint] => endpoint,
            [] => return self.dns_failure(current, "No srv records were resolved."),
            _ => {
                return self.dns_failure(
                    current,
                    "Load balanced mode cannot be used with multiple host names.",
                );
            }
        };

        self.resolved = true;
        info!(
            cluster_id = %self.registry.cluster_id(),
            endpoint = %endpoint,
            "load balancer resolved"
        );
        self.track(current.clone().with_dns_monitor_error(None), endpoint)
    }

    fn dns_failure(&self, current: &ClusterDescription, message: &str) -> Reduction {
        let error = ClusterError::InvalidDnsResults(message.to_string());
        error!(cluster_id = %self.registry.cluster_id(), error = %error, "invalid DNS results");
        Reduction::updated(current.clone().with_dns_monitor_error(Some(error.to_string())))
    }

    fn track(&self, description: ClusterDescription, endpoint: &EndPoint) -> Reduction {
        match self.registry.ensure_server(endpoint) {
            Some(server) => {
                let description = description.with_server_description(server.description());
                Reduction::with_new_servers(description, vec![server])
            }
            None => Reduction::updated(description),
        }
    }
}
