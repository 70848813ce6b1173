//! Server selection policies.
//!
//! A selector narrows a list of candidate servers against a cluster
//! snapshot. Selectors never add candidates, have no side effects, and
//! return an empty list when given one.

mod endpoint;
mod latency;
mod operations_count;
mod priority;
mod random;
mod read_preference;
mod writable;

pub use endpoint::{DelegateServerSelector, EndPointServerSelector};
pub use latency::LatencyLimitingServerSelector;
pub use operations_count::OperationsCountServerSelector;
pub use priority::PriorityServerSelector;
pub use random::RandomServerSelector;
pub use read_preference::{ReadPreference, ReadPreferenceMode, ReadPreferenceServerSelector, TagSet};
pub use writable::WritableServerSelector;

use crate::description::{ClusterDescription, ServerDescription};
use std::fmt;
use std::sync::Arc;

/// Trait for server selection policies.
///
/// The `Display` form describes the selector in diagnostics such as
/// selection timeout errors.
pub trait ServerSelector: Send + Sync + fmt::Debug + fmt::Display {
    /// Filter `servers` down to the acceptable candidates.
    fn select_servers<'a>(
        &self,
        cluster: &ClusterDescription,
        servers: Vec<&'a ServerDescription>,
    ) -> Vec<&'a ServerDescription>;
}

impl<S: ServerSelector + ?Sized> ServerSelector for Arc<S> {
    fn select_servers<'a>(
        &self,
        cluster: &ClusterDescription,
        servers: Vec<&'a ServerDescription>,
    ) -> Vec<&'a ServerDescription> {
        (**self).select_servers(cluster, servers)
    }
}

impl<S: ServerSelector + ?Sized> ServerSelector for &S {
    fn select_servers<'a>(
        &self,
        cluster: &ClusterDescription,
        servers: Vec<&'a ServerDescription>,
    ) -> Vec<&'a ServerDescription> {
        (**self).select_servers(cluster, servers)
    }
}

/// Pipes candidates through each inner selector in order.
#[derive(Debug, Clone, Default)]
pub struct CompositeServerSelector {
    selectors: Vec<Arc<dyn ServerSelector>>,
}

impl CompositeServerSelector {
    pub fn new(selectors: Vec<Arc<dyn ServerSelector>>) -> Self {
        Self { selectors }
    }

    /// Append a selector to the end of the chain.
    pub fn push(&mut self, selector: Arc<dyn ServerSelector>) {
        self.selectors.push(selector);
    }

    pub fn len(&self) -> usize {
        self.selectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selectors.is_empty()
    }
}

impl ServerSelector for CompositeServerSelector {
    fn select_servers<'a>(
        &self,
        cluster: &ClusterDescription,
        servers: Vec<&'a ServerDescription>,
    ) -> Vec<&'a ServerDescription> {
        let chain: Vec<&dyn ServerSelector> = self.selectors.iter().map(|s| s.as_ref()).collect();
        run_chain(&chain, cluster, servers)
    }
}

impl fmt::Display for CompositeServerSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let chain: Vec<&dyn ServerSelector> = self.selectors.iter().map(|s| s.as_ref()).collect();
        write!(f, "CompositeServerSelector{{ Selectors = {} }}", describe_chain(&chain))
    }
}

/// Run borrowed selectors in sequence, stopping early once nothing is left.
pub(crate) fn run_chain<'a>(
    chain: &[&dyn ServerSelector],
    cluster: &ClusterDescription,
    mut servers: Vec<&'a ServerDescription>,
) -> Vec<&'a ServerDescription> {
    for selector in chain {
        if servers.is_empty() {
            break;
        }
        servers = selector.select_servers(cluster, servers);
    }
    servers
}

/// Describe a selector chain the way timeout messages show it.
pub(crate) fn describe_chain(chain: &[&dyn ServerSelector]) -> String {
    chain
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}
