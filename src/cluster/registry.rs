//! Member servers of one cluster.

use super::lifecycle::Lifecycle;
use crate::clock::ClusterClock;
use crate::description::{ClusterId, EndPoint, ServerId};
use crate::events::{EventPublisher, SdamEvent};
use crate::server::{ClusterableServer, ServerContext, ServerEventSink, ServerFactory, ServerHandle};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::time::Instant;

/// Live servers keyed by endpoint.
///
/// Only the reducer adds servers. Removal also happens from `dispose`.
/// Adding and removing emit the matching SDAM events.
pub(crate) struct ServerRegistry {
    cluster_id: ClusterId,
    servers: DashMap<EndPoint, ServerHandle>,
    factory: Arc<dyn ServerFactory>,
    sink: ServerEventSink,
    clock: Arc<ClusterClock>,
    events: EventPublisher,
    lifecycle: Arc<Lifecycle>,
}

impl ServerRegistry {
    pub fn new(
        cluster_id: ClusterId,
        factory: Arc<dyn ServerFactory>,
        sink: ServerEventSink,
        clock: Arc<ClusterClock>,
        events: EventPublisher,
        lifecycle: Arc<Lifecycle>,
    ) -> Self {
        Self {
            cluster_id,
            servers: DashMap::new(),
            factory,
            sink,
            clock,
            events,
            lifecycle,
        }
    }

    pub fn cluster_id(&self) -> ClusterId {
        self.cluster_id
    }

    pub fn events(&self) -> &EventPublisher {
        &self.events
    }

    /// Publish an `Information` event for this cluster.
    pub fn information(&self, message: impl Into<String>) {
        self.events.information(self.cluster_id, message);
    }

    /// Create a server for `endpoint` unless one exists or the cluster is disposed.
    ///
    /// Returns the new, not yet initialized, server.
    pub fn ensure_server(&self, endpoint: &EndPoint) -> Option<ServerHandle> {
        if self.lifecycle.is_disposed() {
            return None;
        }

        let Entry::Vacant(slot) = self.servers.entry(endpoint.clone()) else {
            return None;
        };

        self.events.publish(SdamEvent::ClusterAddingServer {
            cluster_id: self.cluster_id,
            endpoint: endpoint.clone(),
        });
        let started = Instant::now();
        let server = self.factory.create_server(ServerContext {
            server_id: ServerId::new(self.cluster_id, endpoint.clone()),
            events: self.sink.clone(),
            clock: Arc::clone(&self.clock),
        });
        slot.insert(Arc::clone(&server));
        self.events.publish(SdamEvent::ClusterAddedServer {
            cluster_id: self.cluster_id,
            endpoint: endpoint.clone(),
            duration: started.elapsed(),
        });

        Some(server)
    }

    /// Remove and dispose the server for `endpoint`. False if it was not tracked.
    pub fn remove_server(&self, endpoint: &EndPoint, reason: &str) -> bool {
        let Some((_, server)) = self.servers.remove(endpoint) else {
            return false;
        };

        self.events.publish(SdamEvent::ClusterRemovingServer {
            cluster_id: self.cluster_id,
            endpoint: endpoint.clone(),
            reason: reason.to_string(),
        });
        let started = Instant::now();
        server.dispose();
        self.events.publish(SdamEvent::ClusterRemovedServer {
            cluster_id: self.cluster_id,
            endpoint: endpoint.clone(),
            reason: reason.to_string(),
            duration: started.elapsed(),
        });
        true
    }

    /// Remove every server. Returns how many were removed.
    pub fn remove_all(&self, reason: &str) -> usize {
        let endpoints: Vec<EndPoint> = self.servers.iter().map(|entry| entry.key().clone()).collect();
        endpoints
            .iter()
            .filter(|endpoint| self.remove_server(endpoint, reason))
            .count()
    }

    pub fn get(&self, endpoint: &EndPoint) -> Option<ServerHandle> {
        self.servers.get(endpoint).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, endpoint: &EndPoint) -> bool {
        self.servers.contains_key(endpoint)
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn handles(&self) -> Vec<ServerHandle> {
        self.servers.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    /// Ask every initialized server for an immediate check.
    pub fn request_heartbeats(&self) {
        for server in self.handles() {
            if server.is_initialized() {
                server.request_heartbeat();
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::registry;
    use super::*;
    use crate::server::StaticServerFactory;

    fn ep(s: &str) -> EndPoint {
        s.parse().unwrap()
    }

    #[test]
    fn test_ensure_server_creates_once() {
        let factory = Arc::new(StaticServerFactory::new());
        let (registry, _) = registry(Arc::clone(&factory));

        assert!(registry.ensure_server(&ep("a:1")).is_some());
        assert!(registry.ensure_server(&ep("a:1")).is_none());
        assert_eq!(registry.len(), 1);
        assert_eq!(factory.servers().len(), 1);
    }

    #[test]
    fn test_ensure_server_after_dispose_does_nothing() {
        let factory = Arc::new(StaticServerFactory::new());
        let (registry, lifecycle) = registry(Arc::clone(&factory));
        lifecycle.try_dispose();

        assert!(registry.ensure_server(&ep("a:1")).is_none());
        assert!(factory.servers().is_empty());
    }

    #[test]
    fn test_remove_server_disposes_and_emits_events() {
        let factory = Arc::new(StaticServerFactory::new());
        let (registry, _) = registry(Arc::clone(&factory));
        let mut events = registry.events().subscribe();
        registry.ensure_server(&ep("a:1"));

        assert!(registry.remove_server(&ep("a:1"), "gone"));
        assert!(!registry.remove_server(&ep("a:1"), "gone"));
        assert!(factory.servers()[0].is_disposed());

        let mut removed_reason = None;
        while let Ok(event) = events.try_recv() {
            if let SdamEvent::ClusterRemovedServer { reason, .. } = event {
                removed_reason = Some(reason);
            }
        }
        assert_eq!(removed_reason.as_deref(), Some("gone"));
    }

    #[test]
    fn test_remove_all() {
        let factory = Arc::new(StaticServerFactory::new());
        let (registry, _) = registry(Arc::clone(&factory));
        registry.ensure_server(&ep("a:1"));
        registry.ensure_server(&ep("b:1"));

        assert_eq!(registry.remove_all("The cluster is closing."), 2);
        assert_eq!(registry.len(), 0);
        assert!(factory.servers().iter().all(|s| s.is_disposed()));
    }

    #[test]
    fn test_request_heartbeats_skips_uninitialized() {
        let factory = Arc::new(StaticServerFactory::new());
        let (registry, _) = registry(Arc::clone(&factory));
        let first = registry.ensure_server(&ep("a:1")).unwrap();
        registry.ensure_server(&ep("b:1"));
        first.initialize();

        registry.request_heartbeats();
        let counts: Vec<usize> = factory.servers().iter().map(|s| s.heartbeat_requests()).collect();
        assert_eq!(counts, vec![1, 0]);
    }
}
