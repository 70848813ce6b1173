//! DNS SRV polling for `+srv` clusters.
//!
//! The monitor resolves `_{service}._tcp.{domain}`, drops hosts outside
//! the parent domain, and sends the full list of endpoints to the reducer.
//! It rescans after the shortest record TTL, never sooner than a minute,
//! until the cluster reports that monitoring is no longer needed.

use crate::cluster::ClusterMessage;
use crate::description::{ClusterId, EndPoint};
use crate::error::ClusterError;
use crate::events::EventPublisher;
use crate::server::ServerEventSink;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Lower bound between two scans.
pub const MIN_RESCAN_INTERVAL: Duration = Duration::from_secs(60);

/// One SRV answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrvRecord {
    /// Target host name, with or without the trailing dot.
    pub target: String,
    pub port: u16,
    pub ttl: Duration,
}

impl SrvRecord {
    pub fn new(target: impl Into<String>, port: u16, ttl: Duration) -> Self {
        Self {
            target: target.into(),
            port,
            ttl,
        }
    }
}

/// Resolves SRV records.
///
/// DNS mechanics live outside this crate; implement this over whatever
/// resolver the application uses.
pub trait SrvResolver: Send + Sync {
    fn resolve_srv<'a>(&'a self, service: &'a str) -> BoxFuture<'a, anyhow::Result<Vec<SrvRecord>>>;
}

/// What the monitor needs to know about its cluster.
pub(crate) trait DnsMonitoredCluster: Send + Sync {
    fn should_dns_monitor_stop(&self) -> bool;
}

/// Polls SRV records for one cluster.
pub struct DnsMonitor {
    cluster_id: ClusterId,
    lookup_domain: String,
    service: String,
    resolver: Arc<dyn SrvResolver>,
    sink: ServerEventSink,
    events: EventPublisher,
}

impl DnsMonitor {
    pub(crate) fn new(
        cluster_id: ClusterId,
        lookup_domain: &str,
        srv_service_name: &str,
        resolver: Arc<dyn SrvResolver>,
        sink: ServerEventSink,
        events: EventPublisher,
    ) -> Result<Self, ClusterError> {
        ensure_lookup_domain_name_is_valid(lookup_domain)?;
        Ok(Self {
            cluster_id,
            lookup_domain: lookup_domain.to_string(),
            service: format!("_{srv_service_name}._tcp.{lookup_domain}"),
            resolver,
            sink,
            events,
        })
    }

    /// The SRV service name queried.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Scan until the cluster no longer needs DNS or shutdown is signalled.
    pub(crate) async fn run(self, cluster: Arc<dyn DnsMonitoredCluster>, mut shutdown: broadcast::Receiver<()>) {
        info!(cluster_id = %self.cluster_id, service = %self.service, "DNS monitor started");
        loop {
            let delay = tokio::select! {
                result = self.scan() => match result {
                    Ok((endpoints, delay)) => {
                        if !self.sink.send(ClusterMessage::DnsResults(endpoints)).await {
                            break;
                        }
                        if cluster.should_dns_monitor_stop() {
                            break;
                        }
                        delay
                    }
                    Err(e) => {
                        warn!(cluster_id = %self.cluster_id, service = %self.service, error = %e, "SRV lookup failed");
                        if !self.sink.send(ClusterMessage::DnsError(format!("{e:#}"))).await {
                            break;
                        }
                        MIN_RESCAN_INTERVAL
                    }
                },
                _ = shutdown.recv() => break,
            };

            debug!(cluster_id = %self.cluster_id, delay = ?delay, "next SRV scan scheduled");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.recv() => break,
            }
        }
        info!(cluster_id = %self.cluster_id, service = %self.service, "DNS monitor stopped");
    }

    /// Resolve once, returning the valid endpoints and the rescan delay.
    async fn scan(&self) -> anyhow::Result<(Vec<EndPoint>, Duration)> {
        let records = self.resolver.resolve_srv(&self.service).await?;
        let delay = compute_rescan_delay(&records);

        let mut endpoints = Vec::with_capacity(records.len());
        for record in &records {
            let host = record.target.trim_end_matches('.');
            if !is_valid_host(host, &self.lookup_domain) {
                warn!(
                    cluster_id = %self.cluster_id,
                    host = %host,
                    domain = %self.lookup_domain,
                    "discarding SRV host outside the lookup domain"
                );
                self.events.information(
                    self.cluster_id,
                    format!(
                        "Invalid host returned by DNS SRV lookup: {host}. It does not share the domain of {}.",
                        self.lookup_domain
                    ),
                );
                continue;
            }
            endpoints.push(EndPoint::new(host, record.port));
        }

        if endpoints.is_empty() {
            self.events.information(
                self.cluster_id,
                format!("A DNS SRV query on \"{}\" returned no valid hosts.", self.service),
            );
        }

        Ok((endpoints, delay))
    }
}

impl fmt::Debug for DnsMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DnsMonitor")
            .field("cluster_id", &self.cluster_id)
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

/// A lookup domain needs at least three labels, e.g. `cluster.example.com`.
pub fn ensure_lookup_domain_name_is_valid(domain: &str) -> Result<(), ClusterError> {
    let labels = domain.trim_end_matches('.').split('.').filter(|l| !l.is_empty()).count();
    if labels < 3 {
        return Err(ClusterError::InvalidConfiguration(format!(
            "the SRV lookup domain '{domain}' must have at least three labels"
        )));
    }
    Ok(())
}

/// True when `host` lives under the parent of `lookup_domain`.
///
/// For the domain `cluster.example.com` every host must end with
/// `.example.com`.
pub fn is_valid_host(host: &str, lookup_domain: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let domain = lookup_domain.trim_end_matches('.').to_ascii_lowercase();
    let Some((_, parent)) = domain.split_once('.') else {
        return false;
    };
    host.ends_with(&format!(".{parent}"))
}

/// `max(MIN_RESCAN_INTERVAL, shortest ttl)`.
pub fn compute_rescan_delay(records: &[SrvRecord]) -> Duration {
    records
        .iter()
        .map(|r| r.ttl)
        .min()
        .map_or(MIN_RESCAN_INTERVAL, |ttl| ttl.max(MIN_RESCAN_INTERVAL))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::SdamEvent;
    use futures::FutureExt;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::mpsc;

    struct FixedResolver {
        answer: Mutex<anyhow::Result<Vec<SrvRecord>>>,
        queried: Mutex<Vec<String>>,
    }

    impl FixedResolver {
        fn ok(records: Vec<SrvRecord>) -> Arc<Self> {
            Arc::new(Self {
                answer: Mutex::new(Ok(records)),
                queried: Mutex::new(Vec::new()),
            })
        }

        fn failing(message: &str) -> Arc<Self> {
            Arc::new(Self {
                answer: Mutex::new(Err(anyhow::anyhow!(message.to_string()))),
                queried: Mutex::new(Vec::new()),
            })
        }
    }

    impl SrvResolver for FixedResolver {
        fn resolve_srv<'a>(&'a self, service: &'a str) -> BoxFuture<'a, anyhow::Result<Vec<SrvRecord>>> {
            self.queried.lock().push(service.to_string());
            let answer = match &*self.answer.lock() {
                Ok(records) => Ok(records.clone()),
                Err(e) => Err(anyhow::anyhow!(e.to_string())),
            };
            async move { answer }.boxed()
        }
    }

    struct StopFlag(AtomicBool);

    impl DnsMonitoredCluster for StopFlag {
        fn should_dns_monitor_stop(&self) -> bool {
            self.0.load(Ordering::Relaxed)
        }
    }

    fn record(target: &str, ttl_secs: u64) -> SrvRecord {
        SrvRecord::new(target, 27017, Duration::from_secs(ttl_secs))
    }

    fn monitor(
        resolver: Arc<FixedResolver>,
        events: EventPublisher,
    ) -> (DnsMonitor, mpsc::Receiver<ClusterMessage>) {
        let (tx, rx) = mpsc::channel(8);
        let monitor = DnsMonitor::new(
            ClusterId::from_value(1),
            "test1.test.build.example.com",
            "mongodb",
            resolver,
            ServerEventSink::new(tx),
            events,
        )
        .unwrap();
        (monitor, rx)
    }

    #[test]
    fn test_lookup_domain_needs_three_labels() {
        assert!(ensure_lookup_domain_name_is_valid("cluster.example.com").is_ok());
        assert!(ensure_lookup_domain_name_is_valid("example.com").is_err());
        assert!(ensure_lookup_domain_name_is_valid("localhost").is_err());
    }

    #[test]
    fn test_valid_hosts_share_parent_domain() {
        let domain = "test1.test.build.example.com";
        assert!(is_valid_host("localhost.test.build.example.com", domain));
        assert!(is_valid_host("LOCALHOST.TEST.BUILD.EXAMPLE.COM.", domain));
        assert!(!is_valid_host("localhost.build.example.com", domain));
        assert!(!is_valid_host("test.build.example.com", domain));
        assert!(!is_valid_host("evil.com", domain));
    }

    #[test]
    fn test_rescan_delay() {
        assert_eq!(compute_rescan_delay(&[]), MIN_RESCAN_INTERVAL);
        assert_eq!(
            compute_rescan_delay(&[record("a", 30), record("b", 10)]),
            MIN_RESCAN_INTERVAL
        );
        assert_eq!(
            compute_rescan_delay(&[record("a", 300), record("b", 120)]),
            Duration::from_secs(120)
        );
    }

    #[test]
    fn test_service_name() {
        let (monitor, _rx) = monitor(FixedResolver::ok(vec![]), EventPublisher::new());
        assert_eq!(monitor.service(), "_mongodb._tcp.test1.test.build.example.com");
    }

    #[tokio::test]
    async fn test_scan_sends_valid_hosts_and_stops() {
        let resolver = FixedResolver::ok(vec![
            record("localhost.test.build.example.com.", 60),
            record("other.example.org.", 60),
        ]);
        let events = EventPublisher::new();
        let mut subscriber = events.subscribe();
        let (monitor, mut rx) = monitor(Arc::clone(&resolver), events);

        let cluster = Arc::new(StopFlag(AtomicBool::new(true)));
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        monitor.run(cluster, shutdown_rx).await;

        match rx.recv().await.unwrap() {
            ClusterMessage::DnsResults(endpoints) => {
                assert_eq!(endpoints, vec![EndPoint::new("localhost.test.build.example.com", 27017)]);
            }
            other => panic!("unexpected message {other:?}"),
        }
        assert_eq!(
            *resolver.queried.lock(),
            vec!["_mongodb._tcp.test1.test.build.example.com".to_string()]
        );

        let mut saw_invalid_host = false;
        while let Ok(event) = subscriber.try_recv() {
            if let SdamEvent::Information { message, .. } = event {
                saw_invalid_host |= message.contains("other.example.org");
            }
        }
        assert!(saw_invalid_host);
    }

    #[tokio::test]
    async fn test_no_valid_hosts_is_reported() {
        let resolver = FixedResolver::ok(vec![record("evil.com", 60)]);
        let events = EventPublisher::new();
        let mut subscriber = events.subscribe();
        let (monitor, mut rx) = monitor(resolver, events);

        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        monitor.run(Arc::new(StopFlag(AtomicBool::new(true))), shutdown_rx).await;

        assert!(matches!(rx.recv().await, Some(ClusterMessage::DnsResults(e)) if e.is_empty()));
        let messages: Vec<String> = std::iter::from_fn(|| subscriber.try_recv().ok())
            .filter_map(|event| match event {
                SdamEvent::Information { message, .. } => Some(message),
                _ => None,
            })
            .collect();
        assert!(messages.contains(
            &"A DNS SRV query on \"_mongodb._tcp.test1.test.build.example.com\" returned no valid hosts.".to_string()
        ));
    }

    #[tokio::test]
    async fn test_resolver_error_is_forwarded() {
        let (monitor, mut rx) = monitor(FixedResolver::failing("SERVFAIL"), EventPublisher::new());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(monitor.run(Arc::new(StopFlag(AtomicBool::new(false))), shutdown_rx));

        assert!(matches!(rx.recv().await, Some(ClusterMessage::DnsError(e)) if e.contains("SERVFAIL")));
        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }
}
