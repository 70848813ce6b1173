//! Monitored servers, as the cluster sees them.
//!
//! The cluster talks to each member through [`ClusterableServer`]. How a
//! server learns its description (the handshake and wire protocol) is
//! outside this crate: [`MonitoredServer`] drives a user-supplied
//! [`HeartbeatProber`], and [`StaticServer`] takes descriptions directly
//! from its owner.

mod monitor;
mod static_server;

pub use monitor::{HeartbeatProber, HeartbeatReply, MonitoredServer, MonitoredServerFactory};
pub use static_server::{StaticServer, StaticServerFactory};

use crate::clock::ClusterClock;
use crate::cluster::ClusterMessage;
use crate::description::{EndPoint, ServerDescription, ServerId, TopologyVersion};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::mpsc;

/// Contract between a cluster and one of its members.
pub trait ClusterableServer: Send + Sync + fmt::Debug {
    fn server_id(&self) -> &ServerId;

    fn endpoint(&self) -> &EndPoint {
        self.server_id().endpoint()
    }

    /// The latest description.
    fn description(&self) -> ServerDescription;

    fn is_initialized(&self) -> bool;

    /// Counter of operations in flight on this server.
    fn operations(&self) -> &OperationCounter;

    /// Start background monitoring.
    fn initialize(&self);

    /// Ask the monitor to check the server now.
    fn request_heartbeat(&self);

    /// Force the description to Unknown.
    ///
    /// `topology_version` fences the invalidation: a server whose current
    /// topology version is newer ignores it.
    fn invalidate(&self, reason: &str, topology_version: Option<&TopologyVersion>);

    /// Stop monitoring. Idempotent.
    fn dispose(&self);
}

/// A selected server.
pub type ServerHandle = Arc<dyn ClusterableServer>;

/// Everything a factory needs to build one server.
#[derive(Debug, Clone)]
pub struct ServerContext {
    pub server_id: ServerId,
    pub events: ServerEventSink,
    pub clock: Arc<ClusterClock>,
}

/// Creates servers for a cluster.
pub trait ServerFactory: Send + Sync {
    fn create_server(&self, context: ServerContext) -> ServerHandle;
}

/// A description change reported by a server.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerDescriptionChangedEvent {
    pub old: ServerDescription,
    pub new: ServerDescription,
}

/// Channel from servers (and the DNS monitor) into the cluster's reducer.
#[derive(Debug, Clone)]
pub struct ServerEventSink {
    sender: Option<mpsc::Sender<ClusterMessage>>,
}

impl ServerEventSink {
    pub(crate) fn new(sender: mpsc::Sender<ClusterMessage>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    /// A sink connected to nothing. Events are dropped.
    pub fn detached() -> Self {
        Self { sender: None }
    }

    /// Report a description change. Returns false once the cluster is gone.
    pub async fn description_changed(&self, old: ServerDescription, new: ServerDescription) -> bool {
        self.send(ClusterMessage::ServerDescriptionChanged(
            ServerDescriptionChangedEvent { old, new },
        ))
        .await
    }

    pub(crate) async fn send(&self, message: ClusterMessage) -> bool {
        match &self.sender {
            Some(sender) => sender.send(message).await.is_ok(),
            None => false,
        }
    }
}

/// Shared count of in-flight operations.
#[derive(Debug, Clone, Default)]
pub struct OperationCounter {
    count: Arc<AtomicU32>,
}

impl OperationCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }

    /// Count one operation until the guard is dropped.
    pub fn begin(&self) -> OperationGuard {
        self.count.fetch_add(1, Ordering::Relaxed);
        OperationGuard {
            count: Arc::clone(&self.count),
        }
    }
}

/// Decrements its counter on drop.
#[derive(Debug)]
pub struct OperationGuard {
    count: Arc<AtomicU32>,
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_guard_counts() {
        let counter = OperationCounter::new();
        let a = counter.begin();
        let b = counter.begin();
        assert_eq!(counter.count(), 2);
        drop(a);
        assert_eq!(counter.count(), 1);
        drop(b);
        assert_eq!(counter.count(), 0);
    }

    #[test]
    fn test_detached_sink_drops_events() {
        let sink = ServerEventSink::detached();
        let id = ServerId::new(crate::description::ClusterId::from_value(1), "a:1".parse().unwrap());
        let d = ServerDescription::new(id);
        let delivered = tokio_test::block_on(sink.description_changed(d.clone(), d));
        assert!(!delivered);
    }
}
