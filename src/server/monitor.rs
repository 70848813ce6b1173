//! Heartbeat-driven server monitoring.

use super::{ClusterableServer, OperationCounter, ServerContext, ServerEventSink, ServerFactory, ServerHandle};
use crate::clock::{ClusterClock, ClusterTime};
use crate::config::ClusterSettings;
use crate::description::{ServerDescription, ServerId, TopologyVersion};
use crate::util::ShutdownSignal;
use arc_swap::ArcSwap;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of one successful check.
#[derive(Debug, Clone)]
pub struct HeartbeatReply {
    pub description: ServerDescription,
    /// `$clusterTime` attached to the reply, if any.
    pub cluster_time: Option<ClusterTime>,
}

impl From<ServerDescription> for HeartbeatReply {
    fn from(description: ServerDescription) -> Self {
        Self {
            description,
            cluster_time: None,
        }
    }
}

/// Performs one check of a server, typically a `hello` handshake.
///
/// Failures are reported as errors and become Disconnected descriptions.
/// A cluster time carried by a reply advances the cluster's clock.
pub trait HeartbeatProber: Send + Sync + 'static {
    fn check<'a>(&'a self, server_id: &'a ServerId) -> BoxFuture<'a, anyhow::Result<HeartbeatReply>>;
}

const STATE_INITIAL: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_DISPOSED: u8 = 2;

/// Builds [`MonitoredServer`]s sharing one prober.
pub struct MonitoredServerFactory {
    prober: Arc<dyn HeartbeatProber>,
    heartbeat_interval: Duration,
    min_heartbeat_interval: Duration,
}

impl MonitoredServerFactory {
    pub fn new(prober: Arc<dyn HeartbeatProber>, settings: &ClusterSettings) -> Self {
        Self {
            prober,
            heartbeat_interval: settings.heartbeat_interval,
            min_heartbeat_interval: settings.min_heartbeat_interval,
        }
    }
}

impl ServerFactory for MonitoredServerFactory {
    fn create_server(&self, context: ServerContext) -> ServerHandle {
        Arc::new(MonitoredServer::new(
            context.server_id,
            Arc::clone(&self.prober),
            context.events,
            context.clock,
            self.heartbeat_interval,
            self.min_heartbeat_interval,
        ))
    }
}

/// A server whose description comes from periodic heartbeats.
#[derive(Debug)]
pub struct MonitoredServer {
    shared: Arc<MonitorShared>,
    shutdown: ShutdownSignal,
}

struct MonitorShared {
    server_id: ServerId,
    /// Latest description.
    description: ArcSwap<ServerDescription>,
    /// Lifecycle state.
    state: AtomicU8,
    /// In-flight operations.
    operations: OperationCounter,
    /// Wakes the loop for an immediate check.
    heartbeat_requested: Notify,
    /// Change produced by `invalidate`, waiting to be reported.
    /// Also serializes every update of `description`.
    pending: Mutex<Option<(ServerDescription, ServerDescription)>>,
    prober: Arc<dyn HeartbeatProber>,
    events: ServerEventSink,
    clock: Arc<ClusterClock>,
    heartbeat_interval: Duration,
    min_heartbeat_interval: Duration,
}

impl std::fmt::Debug for MonitorShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorShared")
            .field("server_id", &self.server_id)
            .field("state", &self.state.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl MonitoredServer {
    pub fn new(
        server_id: ServerId,
        prober: Arc<dyn HeartbeatProber>,
        events: ServerEventSink,
        clock: Arc<ClusterClock>,
        heartbeat_interval: Duration,
        min_heartbeat_interval: Duration,
    ) -> Self {
        let description = ServerDescription::new(server_id.clone());
        Self {
            shared: Arc::new(MonitorShared {
                server_id,
                description: ArcSwap::from_pointee(description),
                state: AtomicU8::new(STATE_INITIAL),
                operations: OperationCounter::new(),
                heartbeat_requested: Notify::new(),
                pending: Mutex::new(None),
                prober,
                events,
                clock,
                heartbeat_interval,
                min_heartbeat_interval,
            }),
            shutdown: ShutdownSignal::new(),
        }
    }
}

impl ClusterableServer for MonitoredServer {
    fn server_id(&self) -> &ServerId {
        &self.shared.server_id
    }

    fn description(&self) -> ServerDescription {
        ServerDescription::clone(&self.shared.description.load())
    }

    fn is_initialized(&self) -> bool {
        self.shared.state.load(Ordering::Acquire) == STATE_OPEN
    }

    fn operations(&self) -> &OperationCounter {
        &self.shared.operations
    }

    fn initialize(&self) {
        if self
            .shared
            .state
            .compare_exchange(STATE_INITIAL, STATE_OPEN, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(server = %self.shared.server_id.endpoint(), "no tokio runtime, server will not be monitored");
            return;
        };

        let shared = Arc::clone(&self.shared);
        let shutdown = self.shutdown.subscribe();
        runtime.spawn(run_monitor(shared, shutdown));
    }

    fn request_heartbeat(&self) {
        self.shared.heartbeat_requested.notify_one();
    }

    fn invalidate(&self, reason: &str, topology_version: Option<&TopologyVersion>) {
        let shared = &self.shared;
        {
            let mut pending = shared.pending.lock();
            let current = shared.description.load_full();

            if let (Some(token), Some(current_tv)) = (topology_version, current.topology_version()) {
                if current_tv.is_newer_than(token) {
                    debug!(
                        server = %shared.server_id.endpoint(),
                        reason = %reason,
                        "ignoring invalidation fenced by a newer topology version"
                    );
                    return;
                }
            }

            let new = ServerDescription::disconnected(shared.server_id.clone(), reason)
                .with_topology_version(topology_version.copied());
            shared.description.store(Arc::new(new.clone()));

            let old = match pending.take() {
                Some((old, _)) => old,
                None => ServerDescription::clone(&current),
            };
            *pending = Some((old, new));
        }

        info!(server = %shared.server_id.endpoint(), reason = %reason, "server invalidated");
        shared.heartbeat_requested.notify_one();
    }

    fn dispose(&self) {
        let previous = self.shared.state.swap(STATE_DISPOSED, Ordering::AcqRel);
        if previous != STATE_DISPOSED {
            self.shutdown.trigger();
        }
    }
}

impl MonitorShared {
    fn is_disposed(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_DISPOSED
    }

    /// Report a change left behind by `invalidate`.
    async fn flush_pending(&self) {
        let pending = self.pending.lock().take();
        if let Some((old, new)) = pending {
            self.events.description_changed(old, new).await;
        }
    }

    /// Install a heartbeat result and report it if it changed anything.
    ///
    /// An invalidation that landed while the check was in flight is
    /// reported first so the cluster sees the changes in order.
    async fn apply(&self, new: ServerDescription) {
        if self.is_disposed() {
            return;
        }

        let changes = {
            let mut pending = self.pending.lock();
            let mut changes: Vec<_> = pending.take().into_iter().collect();
            let current = self.description.load_full();

            let stale = match (current.topology_version(), new.topology_version()) {
                (Some(current_tv), Some(new_tv)) => new_tv.is_older_than(current_tv),
                _ => false,
            };
            if stale {
                debug!(server = %self.server_id.endpoint(), "ignoring heartbeat with stale topology version");
            } else if *current != new {
                self.description.store(Arc::new(new.clone()));
                changes.push((ServerDescription::clone(&current), new));
            }
            changes
        };

        for (old, new) in changes {
            self.events.description_changed(old, new).await;
        }
    }
}

/// Heartbeat loop for one server.
async fn run_monitor(shared: Arc<MonitorShared>, mut shutdown: broadcast::Receiver<()>) {
    debug!(server = %shared.server_id.endpoint(), "server monitor starting");

    let mut last_check: Option<Instant> = None;

    loop {
        shared.flush_pending().await;

        // Space successive checks by the minimum heartbeat interval
        if let Some(last) = last_check {
            let earliest = last + shared.min_heartbeat_interval;
            tokio::select! {
                _ = tokio::time::sleep_until(earliest) => {}
                _ = shutdown.recv() => break,
            }
        }

        last_check = Some(Instant::now());
        let result = tokio::select! {
            result = shared.prober.check(&shared.server_id) => result,
            _ = shutdown.recv() => break,
        };

        let description = match result {
            Ok(reply) => {
                if let Some(cluster_time) = &reply.cluster_time {
                    shared.clock.advance(cluster_time);
                }
                reply.description
            }
            Err(e) => {
                debug!(server = %shared.server_id.endpoint(), error = %e, "heartbeat failed");
                ServerDescription::disconnected(shared.server_id.clone(), "HeartbeatFailed")
                    .with_last_error(e.to_string())
            }
        };
        shared.apply(description).await;

        tokio::select! {
            _ = tokio::time::sleep(shared.heartbeat_interval) => {}
            _ = shared.heartbeat_requested.notified() => {}
            _ = shutdown.recv() => break,
        }
    }

    debug!(server = %shared.server_id.endpoint(), "server monitor stopped");
}
