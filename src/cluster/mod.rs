//! The cluster: topology monitoring and server selection.
//!
//! A [`Cluster`] owns the member servers of one deployment. Servers and the
//! DNS monitor report into a single reducer task, which folds each report
//! into a new immutable [`ClusterDescription`] and publishes it atomically.
//! Selection reads the latest snapshot, runs the selector chain, and waits
//! for the next snapshot when nothing matches.
//!
//! ```text
//! servers ──┐
//!           ├── mpsc ──► reducer ──► ArcSwap<DescriptionSource> ──► select_server
//! DNS ──────┘                              │
//!                                          └──► SdamEvent broadcast
//! ```

mod election;
mod lifecycle;
mod load_balanced;
mod multi;
mod reducer;
mod registry;
mod selection;
mod single;
mod source;
mod wait_queue;

pub use lifecycle::LifecycleState;

pub(crate) use lifecycle::Lifecycle;
pub(crate) use reducer::{ClusterMessage, Reduction, Topology, initialize_servers};
pub(crate) use registry::ServerRegistry;

use crate::clock::ClusterClock;
use crate::config::{ClusterKind, ClusterSettings, validate_settings};
use crate::description::{ClusterDescription, ClusterId, ClusterType};
use crate::dns::{DnsMonitor, DnsMonitoredCluster, SrvResolver};
use crate::error::ClusterError;
use crate::events::{EventPublisher, SdamEvent};
use crate::selector::ServerSelector;
use crate::server::{ClusterableServer, ServerEventSink, ServerFactory, ServerHandle};
use crate::util::ShutdownSignal;
use arc_swap::ArcSwap;
use load_balanced::ServerReady;
use parking_lot::Mutex;
use reducer::{MESSAGE_CHANNEL_CAPACITY, run_reducer};
use selection::{SelectionAttempt, Step};
use source::DescriptionSource;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};
use wait_queue::{WaitQueue, run_rapid_heartbeats};

/// Reason given for every server removed by `dispose`.
const CLOSING_REASON: &str = "The cluster is closing.";

/// Builds a [`Cluster`] from settings and collaborators.
pub struct ClusterBuilder {
    settings: ClusterSettings,
    factory: Arc<dyn ServerFactory>,
    resolver: Option<Arc<dyn SrvResolver>>,
}

impl ClusterBuilder {
    pub fn new(settings: ClusterSettings, factory: Arc<dyn ServerFactory>) -> Self {
        Self {
            settings,
            factory,
            resolver: None,
        }
    }

    /// Resolver for SRV lookups. Required when the scheme is `srv`.
    pub fn dns_resolver(mut self, resolver: Arc<dyn SrvResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Validate the settings and assemble the cluster. Nothing runs until
    /// [`Cluster::initialize`].
    pub fn build(self) -> Result<Cluster, ClusterError> {
        validate_settings(&self.settings).map_err(ClusterError::InvalidConfiguration)?;

        let cluster_id = ClusterId::next();
        let settings = Arc::new(self.settings);
        let (sender, messages) = mpsc::channel(MESSAGE_CHANNEL_CAPACITY);
        let sink = ServerEventSink::new(sender);
        let events = EventPublisher::new();
        let clock = Arc::new(ClusterClock::new());
        let lifecycle = Arc::new(Lifecycle::new());

        let dns_monitor = if settings.is_srv() {
            let resolver = self.resolver.ok_or_else(|| {
                ClusterError::InvalidConfiguration(
                    "an SRV connection requires a DNS resolver".to_string(),
                )
            })?;
            let lookup_domain = settings
                .endpoints
                .first()
                .map(|endpoint| endpoint.host().to_string())
                .unwrap_or_default();
            Some(DnsMonitor::new(
                cluster_id,
                &lookup_domain,
                &settings.srv_service_name,
                resolver,
                sink.clone(),
                events.clone(),
            )?)
        } else {
            None
        };

        let registry = Arc::new(ServerRegistry::new(
            cluster_id,
            self.factory,
            sink,
            Arc::clone(&clock),
            events.clone(),
            Arc::clone(&lifecycle),
        ));
        let topology = Topology::new(Arc::clone(&settings), Arc::clone(&registry));
        let server_ready = topology.server_ready();

        let initial = ClusterDescription::new(cluster_id, settings.direct_connection)
            .with_type(settings.initial_cluster_type());

        let shared = Arc::new(ClusterShared {
            cluster_id,
            wait_queue: WaitQueue::new(settings.max_server_selection_wait_queue_size),
            settings,
            lifecycle,
            source: ArcSwap::from_pointee(DescriptionSource::detached(Arc::new(initial))),
            publish_lock: Mutex::new(()),
            registry,
            events,
            clock,
            server_ready,
            shutdown: ShutdownSignal::new(),
        });

        debug!(cluster_id = %cluster_id, kind = ?shared.settings.cluster_kind(), "cluster built");
        Ok(Cluster {
            inner: Arc::new(ClusterInner {
                shared,
                pending: Mutex::new(Some(PendingStart {
                    topology,
                    messages,
                    dns_monitor,
                })),
            }),
        })
    }
}

/// Handle to a cluster. Clones share the same cluster; dropping the last
/// one disposes it.
#[derive(Clone)]
pub struct Cluster {
    inner: Arc<ClusterInner>,
}

struct ClusterInner {
    shared: Arc<ClusterShared>,
    /// Pieces handed to background tasks by `initialize`.
    pending: Mutex<Option<PendingStart>>,
}

struct PendingStart {
    topology: Topology,
    messages: mpsc::Receiver<ClusterMessage>,
    dns_monitor: Option<DnsMonitor>,
}

impl Drop for ClusterInner {
    fn drop(&mut self) {
        self.shared.dispose();
    }
}

/// State shared by the handle and the background tasks.
pub(crate) struct ClusterShared {
    cluster_id: ClusterId,
    settings: Arc<ClusterSettings>,
    lifecycle: Arc<Lifecycle>,
    /// Latest published snapshot.
    source: ArcSwap<DescriptionSource>,
    /// Serializes publication against disposal.
    publish_lock: Mutex<()>,
    registry: Arc<ServerRegistry>,
    events: EventPublisher,
    clock: Arc<ClusterClock>,
    wait_queue: WaitQueue,
    /// Present only in load-balanced mode.
    server_ready: Option<Arc<ServerReady>>,
    shutdown: ShutdownSignal,
}

impl ClusterShared {
    pub fn cluster_id(&self) -> ClusterId {
        self.cluster_id
    }

    pub fn is_disposed(&self) -> bool {
        self.lifecycle.is_disposed()
    }

    pub fn description(&self) -> Arc<ClusterDescription> {
        Arc::clone(self.source.load().description())
    }

    pub fn events(&self) -> &EventPublisher {
        &self.events
    }

    /// Publish a reduction and start the servers it created.
    ///
    /// An unchanged reduction republishes the current description so
    /// waiting selections still retry.
    pub fn apply_reduction(&self, reduction: Reduction) {
        let description = reduction
            .description
            .unwrap_or_else(|| ClusterDescription::clone(&self.description()));
        self.publish(description);
        if self.is_disposed() {
            // Created while disposal was running; nobody else will stop them
            for server in &reduction.new_servers {
                self.registry.remove_server(server.endpoint(), CLOSING_REASON);
            }
            return;
        }
        initialize_servers(&reduction.new_servers);
    }

    /// Swap in `description` and wake everyone waiting on the old snapshot.
    ///
    /// Does nothing once the cluster is disposed.
    fn publish(&self, description: ClusterDescription) {
        let _guard = self.publish_lock.lock();
        if self.is_disposed() {
            return;
        }
        let source = DescriptionSource::new(Arc::new(description), &self.registry);
        self.swap_source(source);
    }

    /// Caller holds `publish_lock`.
    fn swap_source(&self, source: DescriptionSource) {
        let new = Arc::clone(source.description());
        let old = self.source.swap(Arc::new(source));
        old.changed().fire();
        if !old.description().sdam_eq(&new) {
            self.events.publish(SdamEvent::ClusterDescriptionChanged {
                old: Arc::clone(old.description()),
                new,
            });
        }
    }

    fn dispose(&self) {
        if !self.lifecycle.try_dispose() {
            return;
        }
        let started = Instant::now();
        self.events.publish(SdamEvent::ClusterClosing {
            cluster_id: self.cluster_id,
        });

        self.shutdown.trigger();
        let removed = self.registry.remove_all(CLOSING_REASON);

        {
            let _guard = self.publish_lock.lock();
            let closed = ClusterDescription::new(self.cluster_id, self.settings.direct_connection)
                .with_type(ClusterType::Unknown);
            self.swap_source(DescriptionSource::detached(Arc::new(closed)));
        }
        if let Some(ready) = &self.server_ready {
            ready.wake();
        }

        self.events.publish(SdamEvent::ClusterClosed {
            cluster_id: self.cluster_id,
            duration: started.elapsed(),
        });
        info!(cluster_id = %self.cluster_id, removed, "cluster disposed");
    }
}

impl DnsMonitoredCluster for ClusterShared {
    fn should_dns_monitor_stop(&self) -> bool {
        if self.is_disposed() {
            return true;
        }
        match self.settings.cluster_kind() {
            ClusterKind::Single | ClusterKind::LoadBalanced => true,
            ClusterKind::Multi => !matches!(
                self.description().cluster_type(),
                ClusterType::Unknown | ClusterType::Sharded
            ),
        }
    }
}

impl Cluster {
    /// Shorthand for `ClusterBuilder::new(settings, factory).build()`.
    pub fn new(settings: ClusterSettings, factory: Arc<dyn ServerFactory>) -> Result<Self, ClusterError> {
        ClusterBuilder::new(settings, factory).build()
    }

    pub fn builder(settings: ClusterSettings, factory: Arc<dyn ServerFactory>) -> ClusterBuilder {
        ClusterBuilder::new(settings, factory)
    }

    /// Create the initial servers and start the background tasks.
    ///
    /// Must be called from within a tokio runtime. Calling it again on an
    /// open cluster does nothing.
    pub fn initialize(&self) -> Result<(), ClusterError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ClusterError::NoRuntime)?;
        let shared = &self.inner.shared;

        // Subscribe before opening so a racing dispose is not missed
        let reducer_shutdown = shared.shutdown.subscribe();
        let heartbeat_shutdown = shared.shutdown.subscribe();
        let dns_shutdown = shared.shutdown.subscribe();

        if !shared.lifecycle.try_open() {
            return match shared.lifecycle.state() {
                LifecycleState::Disposed => Err(ClusterError::Disposed),
                _ => Ok(()),
            };
        }
        let Some(pending) = self.inner.pending.lock().take() else {
            return Err(ClusterError::Internal("cluster was already started".to_string()));
        };

        let started = Instant::now();
        shared.events.publish(SdamEvent::ClusterOpening {
            cluster_id: shared.cluster_id,
        });

        let PendingStart {
            mut topology,
            messages,
            dns_monitor,
        } = pending;
        let reduction = match topology.open(&shared.description()) {
            Ok(reduction) => reduction,
            Err(e) => {
                shared.dispose();
                return Err(e);
            }
        };
        shared.apply_reduction(reduction);

        runtime.spawn(run_reducer(
            topology,
            Arc::clone(shared),
            messages,
            reducer_shutdown,
        ));
        runtime.spawn(run_rapid_heartbeats(
            Arc::clone(&shared.registry),
            shared.wait_queue.rapid_heartbeats(),
            shared.settings.min_heartbeat_interval,
            heartbeat_shutdown,
        ));
        if let Some(monitor) = dns_monitor {
            let cluster: Arc<dyn DnsMonitoredCluster> = shared.clone();
            runtime.spawn(monitor.run(cluster, dns_shutdown));
        }

        shared.events.publish(SdamEvent::ClusterOpened {
            cluster_id: shared.cluster_id,
            duration: started.elapsed(),
        });
        info!(
            cluster_id = %shared.cluster_id,
            kind = ?shared.settings.cluster_kind(),
            servers = shared.registry.len(),
            "cluster opened"
        );
        Ok(())
    }

    /// Stop monitoring and remove every server. Idempotent.
    pub fn dispose(&self) {
        self.inner.shared.dispose();
    }

    /// Wait for a server the selector accepts.
    ///
    /// `timeout` is capped by the configured server selection timeout.
    /// Dropping the returned future abandons the wait.
    pub async fn select_server<S>(&self, selector: &S, timeout: Option<Duration>) -> Result<ServerHandle, ClusterError>
    where
        S: ServerSelector + ?Sized,
    {
        let selector: &dyn ServerSelector = &selector;
        let mut attempt = SelectionAttempt::begin(&self.inner.shared, selector, timeout)?;
        loop {
            match attempt.step() {
                Ok(Step::Selected(server)) => return Ok(attempt.succeed(server)),
                Ok(Step::Wait(signal)) => {
                    signal.wait(attempt.deadline()).await;
                }
                Err(e) => return Err(attempt.fail(e)),
            }
        }
    }

    /// [`select_server`](Self::select_server), parking the current thread.
    ///
    /// Must not be called from an async context; use `spawn_blocking`.
    pub fn select_server_blocking<S>(&self, selector: &S, timeout: Option<Duration>) -> Result<ServerHandle, ClusterError>
    where
        S: ServerSelector + ?Sized,
    {
        let selector: &dyn ServerSelector = &selector;
        let mut attempt = SelectionAttempt::begin(&self.inner.shared, selector, timeout)?;
        loop {
            match attempt.step() {
                Ok(Step::Selected(server)) => return Ok(attempt.succeed(server)),
                Ok(Step::Wait(signal)) => {
                    signal.wait_blocking(attempt.deadline());
                }
                Err(e) => return Err(attempt.fail(e)),
            }
        }
    }

    /// The latest published description.
    pub fn description(&self) -> Arc<ClusterDescription> {
        self.inner.shared.description()
    }

    /// Events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SdamEvent> {
        self.inner.shared.events.subscribe()
    }

    pub fn settings(&self) -> &ClusterSettings {
        &self.inner.shared.settings
    }

    pub fn clock(&self) -> &Arc<ClusterClock> {
        &self.inner.shared.clock
    }

    pub fn cluster_id(&self) -> ClusterId {
        self.inner.shared.cluster_id
    }

    pub fn kind(&self) -> ClusterKind {
        self.inner.shared.settings.cluster_kind()
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.shared.lifecycle.state()
    }
}

impl fmt::Debug for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cluster")
            .field("cluster_id", &self.cluster_id())
            .field("kind", &self.kind())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description::{EndPoint, ServerDescription, ServerId, ServerType, WireVersionRange};
    use crate::selector::{EndPointServerSelector, ReadPreference, ReadPreferenceServerSelector, WritableServerSelector};
    use crate::server::{StaticServer, StaticServerFactory};
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use tokio::time::timeout;

    fn ep(s: &str) -> EndPoint {
        s.parse().unwrap()
    }

    fn settings(endpoints: &[&str]) -> ClusterSettings {
        ClusterSettings {
            server_selection_timeout: Duration::from_secs(5),
            ..ClusterSettings::with_endpoints(endpoints.iter().map(|e| ep(e)).collect())
        }
    }

    fn open(settings: ClusterSettings) -> (Cluster, Arc<StaticServerFactory>) {
        let factory = Arc::new(StaticServerFactory::new());
        let cluster = Cluster::new(settings, factory.clone()).unwrap();
        cluster.initialize().unwrap();
        (cluster, factory)
    }

    fn standalone(cluster: &Cluster, endpoint: &str) -> ServerDescription {
        ServerDescription::connected(ServerId::new(cluster.cluster_id(), ep(endpoint)), ServerType::Standalone)
            .wire_version_range(WireVersionRange::new(8, 21))
            .build()
    }

    async fn wait_for<F>(cluster: &Cluster, mut done: F)
    where
        F: FnMut(&ClusterDescription) -> bool,
    {
        let mut events = cluster.subscribe();
        timeout(Duration::from_secs(5), async {
            while !done(&cluster.description()) {
                let _ = events.recv().await;
            }
        })
        .await
        .unwrap();
    }

    fn server(factory: &StaticServerFactory, endpoint: &str) -> Arc<StaticServer> {
        factory.server(&ep(endpoint)).unwrap()
    }

    /// Matches nothing and counts how often it ran.
    #[derive(Debug, Default)]
    struct CountingSelector {
        calls: AtomicUsize,
    }

    impl fmt::Display for CountingSelector {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("CountingSelector")
        }
    }

    impl ServerSelector for CountingSelector {
        fn select_servers<'a>(
            &self,
            _cluster: &ClusterDescription,
            _servers: Vec<&'a ServerDescription>,
        ) -> Vec<&'a ServerDescription> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            Vec::new()
        }
    }

    async fn wait_for_calls(selector: &CountingSelector, more_than: usize) -> usize {
        timeout(Duration::from_secs(2), async {
            loop {
                let calls = selector.calls.load(AtomicOrdering::SeqCst);
                if calls > more_than {
                    return calls;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_initialize_creates_seed_servers() {
        let (cluster, factory) = open(settings(&["a:27017", "b:27017"]));

        assert_eq!(cluster.state(), LifecycleState::Open);
        assert_eq!(cluster.description().servers().len(), 2);
        assert!(factory.servers().iter().all(|s| s.is_initialized()));
    }

    #[test]
    fn test_initialize_requires_runtime() {
        let factory = Arc::new(StaticServerFactory::new());
        let cluster = Cluster::new(settings(&["a:27017"]), factory).unwrap();

        assert!(matches!(cluster.initialize(), Err(ClusterError::NoRuntime)));
        assert_eq!(cluster.state(), LifecycleState::Initial);
    }

    #[tokio::test]
    async fn test_initialize_twice_is_noop() {
        let (cluster, factory) = open(settings(&["a:27017"]));
        cluster.initialize().unwrap();
        assert_eq!(factory.servers().len(), 1);
    }

    #[test]
    fn test_build_rejects_invalid_settings() {
        let factory = Arc::new(StaticServerFactory::new());
        let bad = ClusterSettings {
            load_balanced: true,
            replica_set_name: Some("rs".to_string()),
            ..settings(&["a:27017"])
        };
        assert!(matches!(
            Cluster::new(bad, factory),
            Err(ClusterError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_srv_requires_resolver() {
        let factory = Arc::new(StaticServerFactory::new());
        let srv = ClusterSettings {
            scheme: crate::config::ConnectionScheme::Srv,
            ..settings(&["cluster0.example.com:27017"])
        };
        let err = Cluster::new(srv, factory).unwrap_err();
        assert!(err.to_string().contains("DNS resolver"));
    }

    #[tokio::test]
    async fn test_selection_before_initialize() {
        let factory = Arc::new(StaticServerFactory::new());
        let cluster = Cluster::new(settings(&["a:27017"]), factory).unwrap();

        let result = cluster.select_server(&WritableServerSelector, None).await;
        assert!(matches!(result, Err(ClusterError::NotInitialized)));
    }

    #[tokio::test]
    async fn test_report_becomes_standalone_and_selectable() {
        let (cluster, factory) = open(settings(&["a:27017"]));

        server(&factory, "a:27017")
            .publish(standalone(&cluster, "a:27017"))
            .await;
        wait_for(&cluster, |d| d.cluster_type() == ClusterType::Standalone).await;

        let selected = cluster
            .select_server(&WritableServerSelector, None)
            .await
            .unwrap();
        assert_eq!(selected.endpoint(), &ep("a:27017"));
    }

    #[tokio::test]
    async fn test_waiting_selection_wakes_on_report() {
        let (cluster, factory) = open(settings(&["a:27017"]));

        let waiter = {
            let cluster = cluster.clone();
            tokio::spawn(async move {
                cluster
                    .select_server(&WritableServerSelector, Some(Duration::from_secs(5)))
                    .await
                    .map(|s| s.endpoint().clone())
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        server(&factory, "a:27017")
            .publish(standalone(&cluster, "a:27017"))
            .await;

        let endpoint = timeout(Duration::from_secs(5), waiter).await.unwrap().unwrap();
        assert_eq!(endpoint.unwrap(), ep("a:27017"));
    }

    #[tokio::test]
    async fn test_selection_timeout_names_selector() {
        let (cluster, _factory) = open(settings(&["a:27017", "b:27017"]));

        let selector = ReadPreferenceServerSelector::new(ReadPreference::primary());
        let started = Instant::now();
        let err = cluster
            .select_server(&selector, Some(Duration::from_millis(100)))
            .await
            .unwrap_err();

        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(matches!(err, ClusterError::Timeout { .. }));
        let message = err.to_string();
        assert!(message.starts_with("A timeout occurred after"));
        assert!(message.contains(&selector.to_string()));
    }

    #[tokio::test]
    async fn test_waiting_enables_rapid_heartbeats() {
        let settings = ClusterSettings {
            min_heartbeat_interval: Duration::from_millis(10),
            ..settings(&["a:27017"])
        };
        let (cluster, factory) = open(settings);

        let _ = cluster
            .select_server(&WritableServerSelector, Some(Duration::from_millis(100)))
            .await;
        assert!(server(&factory, "a:27017").heartbeat_requests() > 0);
    }

    #[tokio::test]
    async fn test_wait_queue_full() {
        let settings = ClusterSettings {
            max_server_selection_wait_queue_size: 1,
            ..settings(&["a:27017"])
        };
        let (cluster, _factory) = open(settings);

        let first = {
            let cluster = cluster.clone();
            tokio::spawn(async move {
                cluster
                    .select_server(&WritableServerSelector, Some(Duration::from_secs(1)))
                    .await
                    .map(|_| ())
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = cluster
            .select_server(&WritableServerSelector, Some(Duration::from_secs(1)))
            .await;
        assert!(matches!(second, Err(ClusterError::WaitQueueFull { max_size: 1 })));
        first.abort();
    }

    #[tokio::test]
    async fn test_dispose_wakes_waiters_with_disposed() {
        let (cluster, factory) = open(settings(&["a:27017"]));

        let waiter = {
            let cluster = cluster.clone();
            tokio::spawn(async move {
                cluster
                    .select_server(&WritableServerSelector, Some(Duration::from_secs(5)))
                    .await
                    .map(|_| ())
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        cluster.dispose();

        let result = timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert!(matches!(result, Err(ClusterError::Disposed)));
        assert_eq!(cluster.state(), LifecycleState::Disposed);
        assert!(cluster.description().servers().is_empty());
        assert!(server(&factory, "a:27017").is_disposed());
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent_and_rejects_selection() {
        let (cluster, _factory) = open(settings(&["a:27017"]));
        let mut events = cluster.subscribe();

        cluster.dispose();
        cluster.dispose();

        let mut closing = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, SdamEvent::ClusterClosing { .. }) {
                closing += 1;
            }
        }
        assert_eq!(closing, 1);

        let result = cluster.select_server(&EndPointServerSelector::new(ep("a:27017")), None).await;
        assert!(matches!(result, Err(ClusterError::Disposed)));
        assert!(matches!(cluster.initialize(), Err(ClusterError::Disposed)));
    }

    #[tokio::test]
    async fn test_dropping_last_handle_disposes() {
        let (cluster, factory) = open(settings(&["a:27017"]));
        drop(cluster);
        assert!(server(&factory, "a:27017").is_disposed());
    }

    #[tokio::test]
    async fn test_unchanged_report_publishes_no_event() {
        let (cluster, factory) = open(settings(&["a:27017"]));
        let a = server(&factory, "a:27017");
        a.publish(standalone(&cluster, "a:27017")).await;
        wait_for(&cluster, |d| d.cluster_type() == ClusterType::Standalone).await;

        let mut events = cluster.subscribe();
        let before = cluster.description();
        a.publish(standalone(&cluster, "a:27017")).await;
        // A second, different report proves the first was reduced
        a.publish(ServerDescription::disconnected(a.server_id().clone(), "HeartbeatFailed"))
            .await;
        wait_for(&cluster, |d| !d.servers()[0].is_connected()).await;

        let mut changes = 0;
        while let Ok(event) = events.try_recv() {
            if let SdamEvent::ClusterDescriptionChanged { old, .. } = event {
                changes += 1;
                assert!(old.sdam_eq(&before));
            }
        }
        assert_eq!(changes, 1);
    }

    #[tokio::test]
    async fn test_unchanged_report_still_wakes_waiters() {
        let (cluster, factory) = open(settings(&["a:27017"]));
        let a = server(&factory, "a:27017");
        a.publish(standalone(&cluster, "a:27017")).await;
        wait_for(&cluster, |d| d.cluster_type() == ClusterType::Standalone).await;

        let selector = Arc::new(CountingSelector::default());
        let waiter = {
            let cluster = cluster.clone();
            let selector = Arc::clone(&selector);
            tokio::spawn(async move {
                cluster
                    .select_server(&*selector, Some(Duration::from_secs(5)))
                    .await
                    .map(|_| ())
            })
        };

        wait_for_calls(&selector, 0).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let idle = selector.calls.load(AtomicOrdering::SeqCst);

        let mut events = cluster.subscribe();
        a.publish(standalone(&cluster, "a:27017")).await;
        let retried = wait_for_calls(&selector, idle).await;
        assert!(retried > idle);

        // the retry came without a visible change
        assert!(!std::iter::from_fn(|| events.try_recv().ok())
            .any(|e| matches!(e, SdamEvent::ClusterDescriptionChanged { .. })));
        assert!(!waiter.is_finished());
        waiter.abort();
    }
}
