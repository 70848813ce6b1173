//! Offline replay of scripted topology scenarios.
//!
//! A scenario is a YAML file of phases. Each phase feeds server replies (and
//! optionally DNS results) through the same reducers a live cluster uses,
//! then compares the resulting description against the expected outcome.
//! Everything runs synchronously over [`StaticServer`]s; no runtime is
//! needed.
//!
//! ```yaml
//! settings:
//!   endpoints: ["a:27017", "b:27017"]
//! phases:
//!   - description: primary discovered
//!     responses:
//!       - endpoint: a:27017
//!         reply:
//!           type: replica_set_primary
//!           set_name: rs0
//!           hosts: ["a:27017", "b:27017"]
//!     outcome:
//!       cluster_type: replica_set
//!       servers:
//!         a:27017: { type: replica_set_primary }
//!         b:27017: { type: unknown }
//! ```

use crate::clock::ClusterClock;
use crate::cluster::{ClusterMessage, Lifecycle, ServerRegistry, Topology, initialize_servers};
use crate::config::{ClusterSettings, validate_settings};
use crate::description::{
    ClusterDescription, ClusterId, ClusterType, ElectionId, EndPoint, ReplicaSetConfig,
    ServerDescription, ServerId, ServerType, TopologyVersion, WireVersionRange,
};
use crate::error::ClusterError;
use crate::events::EventPublisher;
use crate::server::{ServerDescriptionChangedEvent, ServerEventSink, ServerFactory, StaticServerFactory};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Errors loading or running a scenario.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("failed to read scenario file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse scenario: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid scenario settings: {0}")]
    InvalidSettings(String),

    #[error("phase {phase}: {source}")]
    Cluster {
        phase: usize,
        #[source]
        source: ClusterError,
    },
}

/// A scripted sequence of topology observations.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    /// Cluster settings. The caller's settings are used when absent.
    #[serde(default)]
    pub settings: Option<ClusterSettings>,
    pub phases: Vec<Phase>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Phase {
    #[serde(default)]
    pub description: Option<String>,
    /// DNS SRV results delivered before the responses.
    #[serde(default)]
    pub dns_results: Option<Vec<EndPoint>>,
    #[serde(default)]
    pub responses: Vec<Response>,
    #[serde(default)]
    pub outcome: Option<Outcome>,
}

/// One heartbeat result. A response with no reply is a failed check.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Response {
    pub endpoint: EndPoint,
    #[serde(default)]
    pub reply: Option<ServerReply>,
    /// Failure reason when `reply` is absent.
    #[serde(default)]
    pub error: Option<String>,
}

/// The fields of a handshake reply the reducers read.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerReply {
    #[serde(rename = "type")]
    pub server_type: ServerType,
    #[serde(default)]
    pub set_name: Option<String>,
    #[serde(default)]
    pub hosts: Vec<EndPoint>,
    #[serde(default)]
    pub set_version: Option<i32>,
    #[serde(default)]
    pub election_id: Option<ElectionId>,
    #[serde(default)]
    pub primary: Option<EndPoint>,
    #[serde(default)]
    pub me: Option<EndPoint>,
    #[serde(default = "default_min_wire_version")]
    pub min_wire_version: i32,
    #[serde(default = "default_max_wire_version")]
    pub max_wire_version: i32,
    #[serde(default)]
    pub topology_version: Option<TopologyVersion>,
}

/// Expected state after a phase.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Outcome {
    #[serde(default)]
    pub cluster_type: Option<ClusterType>,
    /// When present, the exact set of tracked servers.
    #[serde(default)]
    pub servers: Option<BTreeMap<EndPoint, ExpectedServer>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExpectedServer {
    #[serde(rename = "type")]
    pub server_type: ServerType,
    #[serde(default)]
    pub set_name: Option<String>,
}

fn default_min_wire_version() -> i32 {
    8
}

fn default_max_wire_version() -> i32 {
    21
}

impl Response {
    fn to_description(&self, server_id: ServerId) -> ServerDescription {
        let Some(reply) = &self.reply else {
            let reason = self.error.as_deref().unwrap_or("HeartbeatFailed");
            return ServerDescription::disconnected(server_id, reason);
        };

        let mut builder = ServerDescription::connected(server_id, reply.server_type)
            .wire_version_range(WireVersionRange::new(
                reply.min_wire_version,
                reply.max_wire_version,
            ))
            .election_id(reply.election_id)
            .canonical_endpoint(reply.me.clone())
            .topology_version(reply.topology_version);
        if reply.set_name.is_some() || !reply.hosts.is_empty() {
            builder = builder.replica_set_config(ReplicaSetConfig::new(
                reply.hosts.clone(),
                reply.set_name.clone(),
                reply.primary.clone(),
                reply.set_version,
            ));
        }
        builder.build()
    }
}

/// Result of one phase.
#[derive(Debug, Clone)]
pub struct PhaseReport {
    /// 1-based.
    pub index: usize,
    pub description: Option<String>,
    pub cluster: ClusterDescription,
    pub mismatches: Vec<String>,
}

impl fmt::Display for PhaseReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "phase {}", self.index)?;
        if let Some(description) = &self.description {
            write!(f, " ({description})")?;
        }
        writeln!(f, ": {}", self.cluster)?;
        for mismatch in &self.mismatches {
            writeln!(f, "  mismatch: {mismatch}")?;
        }
        Ok(())
    }
}

/// Result of a whole scenario.
#[derive(Debug, Clone, Default)]
pub struct ReplayReport {
    pub phases: Vec<PhaseReport>,
}

impl ReplayReport {
    pub fn is_success(&self) -> bool {
        self.phases.iter().all(|phase| phase.mismatches.is_empty())
    }

    pub fn mismatch_count(&self) -> usize {
        self.phases.iter().map(|phase| phase.mismatches.len()).sum()
    }
}

/// Load a scenario from a YAML file.
pub fn load_scenario<P: AsRef<Path>>(path: P) -> Result<Scenario, ReplayError> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    parse_scenario(&contents)
}

pub fn parse_scenario(contents: &str) -> Result<Scenario, ReplayError> {
    Ok(serde_yaml::from_str(contents)?)
}

/// Run every phase of `scenario`.
///
/// `fallback` supplies the settings when the scenario has none.
pub fn run_scenario(scenario: &Scenario, fallback: &ClusterSettings) -> Result<ReplayReport, ReplayError> {
    let settings = Arc::new(scenario.settings.clone().unwrap_or_else(|| fallback.clone()));
    validate_settings(&settings).map_err(ReplayError::InvalidSettings)?;

    let mut replay = Replay::open(settings)?;
    let mut report = ReplayReport::default();
    for (offset, phase) in scenario.phases.iter().enumerate() {
        let index = offset + 1;
        replay
            .run_phase(phase)
            .map_err(|source| ReplayError::Cluster { phase: index, source })?;

        let mismatches = phase
            .outcome
            .as_ref()
            .map(|outcome| check_outcome(&replay.description, outcome))
            .unwrap_or_default();
        debug!(phase = index, mismatches = mismatches.len(), "phase replayed");
        report.phases.push(PhaseReport {
            index,
            description: phase.description.clone(),
            cluster: replay.description.clone(),
            mismatches,
        });
    }

    info!(
        phases = report.phases.len(),
        mismatches = report.mismatch_count(),
        "scenario replayed"
    );
    Ok(report)
}

/// A topology driven without a reducer task.
struct Replay {
    cluster_id: ClusterId,
    factory: Arc<StaticServerFactory>,
    topology: Topology,
    description: ClusterDescription,
}

impl Replay {
    fn open(settings: Arc<ClusterSettings>) -> Result<Self, ReplayError> {
        let cluster_id = ClusterId::next();
        let factory = Arc::new(StaticServerFactory::new());
        let server_factory: Arc<dyn ServerFactory> = factory.clone();
        let registry = Arc::new(ServerRegistry::new(
            cluster_id,
            server_factory,
            ServerEventSink::detached(),
            Arc::new(ClusterClock::new()),
            EventPublisher::new(),
            Arc::new(Lifecycle::new()),
        ));

        let mut topology = Topology::new(Arc::clone(&settings), registry);
        let initial = ClusterDescription::new(cluster_id, settings.direct_connection)
            .with_type(settings.initial_cluster_type());
        let reduction = topology
            .open(&initial)
            .map_err(|source| ReplayError::Cluster { phase: 0, source })?;
        initialize_servers(&reduction.new_servers);

        Ok(Self {
            cluster_id,
            factory,
            topology,
            description: reduction.description.unwrap_or(initial),
        })
    }

    fn run_phase(&mut self, phase: &Phase) -> Result<(), ClusterError> {
        if let Some(endpoints) = &phase.dns_results {
            self.apply(ClusterMessage::DnsResults(endpoints.clone()))?;
        }

        for response in &phase.responses {
            let server_id = ServerId::new(self.cluster_id, response.endpoint.clone());
            let new = response.to_description(server_id.clone());
            let old = match self.factory.server(&response.endpoint) {
                Some(server) => server.set_description(new.clone()),
                None => ServerDescription::new(server_id),
            };
            self.apply(ClusterMessage::ServerDescriptionChanged(
                ServerDescriptionChangedEvent { old, new },
            ))?;
        }
        Ok(())
    }

    fn apply(&mut self, message: ClusterMessage) -> Result<(), ClusterError> {
        let reduction = self.topology.apply(&self.description, message)?;
        initialize_servers(&reduction.new_servers);
        if let Some(description) = reduction.description {
            self.description = description;
        }
        Ok(())
    }
}

fn check_outcome(description: &ClusterDescription, outcome: &Outcome) -> Vec<String> {
    let mut mismatches = Vec::new();

    if let Some(expected) = outcome.cluster_type {
        if description.cluster_type() != expected {
            mismatches.push(format!(
                "cluster type is {} but {} was expected",
                description.cluster_type(),
                expected
            ));
        }
    }

    let Some(servers) = &outcome.servers else {
        return mismatches;
    };
    for (endpoint, expected) in servers {
        let Some(actual) = description.server(endpoint) else {
            mismatches.push(format!("{endpoint} is not tracked"));
            continue;
        };
        if actual.server_type() != expected.server_type {
            mismatches.push(format!(
                "{endpoint} has type {} but {} was expected",
                actual.server_type(),
                expected.server_type
            ));
        }
        if let Some(name) = &expected.set_name {
            let reported = actual.replica_set_config().and_then(|c| c.name.as_deref());
            if reported != Some(name.as_str()) {
                mismatches.push(format!(
                    "{endpoint} reports replica set {reported:?} but '{name}' was expected"
                ));
            }
        }
    }
    for endpoint in description.endpoints() {
        if !servers.contains_key(endpoint) {
            mismatches.push(format!("{endpoint} is tracked but was not expected"));
        }
    }
    mismatches
}
