//! Servers driven directly by their owner.

use super::{ClusterableServer, OperationCounter, ServerContext, ServerEventSink, ServerFactory, ServerHandle};
use crate::description::{EndPoint, ServerDescription, ServerId, TopologyVersion};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// A server with no monitor of its own.
///
/// The owner supplies each new description, either publishing it to the
/// cluster or installing it silently for synchronous replay. Lifecycle
/// calls are recorded so they can be inspected.
#[derive(Debug)]
pub struct StaticServer {
    server_id: ServerId,
    description: ArcSwap<ServerDescription>,
    events: ServerEventSink,
    operations: OperationCounter,
    initialized: AtomicBool,
    disposed: AtomicBool,
    heartbeat_requests: AtomicUsize,
    invalidations: Mutex<Vec<String>>,
}

impl StaticServer {
    pub fn new(server_id: ServerId, events: ServerEventSink) -> Self {
        let description = ServerDescription::new(server_id.clone());
        Self {
            server_id,
            description: ArcSwap::from_pointee(description),
            events,
            operations: OperationCounter::new(),
            initialized: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            heartbeat_requests: AtomicUsize::new(0),
            invalidations: Mutex::new(Vec::new()),
        }
    }

    /// Install `new` and report the change to the cluster.
    ///
    /// Returns false if the cluster is no longer listening.
    pub async fn publish(&self, new: ServerDescription) -> bool {
        let old = self.set_description(new.clone());
        self.events.description_changed(old, new).await
    }

    /// Install `new` without reporting it, returning the previous description.
    pub fn set_description(&self, new: ServerDescription) -> ServerDescription {
        ServerDescription::clone(&self.description.swap(Arc::new(new)))
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub fn heartbeat_requests(&self) -> usize {
        self.heartbeat_requests.load(Ordering::Relaxed)
    }

    /// Reasons passed to `invalidate`, oldest first.
    pub fn invalidations(&self) -> Vec<String> {
        self.invalidations.lock().clone()
    }
}

impl ClusterableServer for StaticServer {
    fn server_id(&self) -> &ServerId {
        &self.server_id
    }

    fn description(&self) -> ServerDescription {
        ServerDescription::clone(&self.description.load())
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn operations(&self) -> &OperationCounter {
        &self.operations
    }

    fn initialize(&self) {
        self.initialized.store(true, Ordering::Release);
    }

    fn request_heartbeat(&self) {
        self.heartbeat_requests.fetch_add(1, Ordering::Relaxed);
    }

    fn invalidate(&self, reason: &str, topology_version: Option<&TopologyVersion>) {
        self.invalidations.lock().push(reason.to_string());
        let new = ServerDescription::disconnected(self.server_id.clone(), reason)
            .with_topology_version(topology_version.copied());
        self.description.store(Arc::new(new));
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }
}

/// Creates [`StaticServer`]s and remembers every one it made.
#[derive(Debug, Default)]
pub struct StaticServerFactory {
    created: Mutex<Vec<Arc<StaticServer>>>,
}

impl StaticServerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every server created so far, in creation order.
    pub fn servers(&self) -> Vec<Arc<StaticServer>> {
        self.created.lock().clone()
    }

    /// The most recently created server for `endpoint`.
    pub fn server(&self, endpoint: &EndPoint) -> Option<Arc<StaticServer>> {
        self.created
            .lock()
            .iter()
            .rev()
            .find(|s| s.endpoint() == endpoint)
            .cloned()
    }
}

impl ServerFactory for StaticServerFactory {
    fn create_server(&self, context: ServerContext) -> ServerHandle {
        let server = Arc::new(StaticServer::new(context.server_id, context.events));
        self.created.lock().push(Arc::clone(&server));
        server
    }
}
