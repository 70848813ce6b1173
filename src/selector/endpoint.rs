//! Selection by endpoint and by closure.

use super::ServerSelector;
use crate::description::{ClusterDescription, EndPoint, ServerDescription};
use std::fmt;

/// Selects the server at one endpoint.
#[derive(Debug, Clone)]
pub struct EndPointServerSelector {
    endpoint: EndPoint,
}

impl EndPointServerSelector {
    pub fn new(endpoint: EndPoint) -> Self {
        Self { endpoint }
    }
}

impl ServerSelector for EndPointServerSelector {
    fn select_servers<'a>(
        &self,
        _cluster: &ClusterDescription,
        servers: Vec<&'a ServerDescription>,
    ) -> Vec<&'a ServerDescription> {
        servers
            .into_iter()
            .filter(|s| s.endpoint() == &self.endpoint)
            .collect()
    }
}

impl fmt::Display for EndPointServerSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EndPointServerSelector{{ EndPoint = {} }}", self.endpoint)
    }
}

/// Wraps a closure as a selector.
pub struct DelegateServerSelector<F> {
    name: String,
    predicate: F,
}

impl<F> DelegateServerSelector<F>
where
    F: Fn(&ClusterDescription, &ServerDescription) -> bool + Send + Sync,
{
    /// Keep the servers for which `predicate` returns true.
    pub fn new(name: impl Into<String>, predicate: F) -> Self {
        Self {
            name: name.into(),
            predicate,
        }
    }
}

impl<F> fmt::Debug for DelegateServerSelector<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelegateServerSelector")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<F> fmt::Display for DelegateServerSelector<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DelegateServerSelector{{ {} }}", self.name)
    }
}

impl<F> ServerSelector for DelegateServerSelector<F>
where
    F: Fn(&ClusterDescription, &ServerDescription) -> bool + Send + Sync,
{
    fn select_servers<'a>(
        &self,
        cluster: &ClusterDescription,
        servers: Vec<&'a ServerDescription>,
    ) -> Vec<&'a ServerDescription> {
        servers
            .into_iter()
            .filter(|s| (self.predicate)(cluster, s))
            .collect()
    }
}
