//! Configuration data types.

use crate::description::{ClusterType, EndPoint};
use crate::selector::ServerSelector;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Global settings
    #[serde(default)]
    pub global: GlobalConfig,

    /// Cluster monitoring and selection settings
    #[serde(default)]
    pub cluster: ClusterSettings,
}

/// Global configuration settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GlobalConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// How the endpoint list is interpreted.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionScheme {
    /// Endpoints are dialed directly.
    #[default]
    Standard,
    /// The single endpoint host is an SRV lookup domain.
    Srv,
}

/// Which topology implementation a cluster uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterKind {
    /// Direct connection to one server.
    Single,
    /// Discovery across replica sets and sharded clusters.
    Multi,
    /// One fronting load balancer.
    LoadBalanced,
}

/// Settings for one cluster.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClusterSettings {
    /// Seed list, or the SRV lookup host
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<EndPoint>,

    /// standard or srv
    #[serde(default)]
    pub scheme: ConnectionScheme,

    /// Service name used for SRV lookups
    #[serde(default = "default_srv_service_name")]
    pub srv_service_name: String,

    /// Maximum number of SRV hosts to track (0 = unlimited)
    #[serde(default)]
    pub srv_max_hosts: usize,

    /// Talk to exactly one server without discovery
    #[serde(default)]
    pub direct_connection: bool,

    /// Required replica set name
    #[serde(default)]
    pub replica_set_name: Option<String>,

    /// Connect through a single load balancer
    #[serde(default)]
    pub load_balanced: bool,

    /// How long selection may wait for a suitable server
    #[serde(default = "default_server_selection_timeout", with = "humantime_serde")]
    pub server_selection_timeout: Duration,

    /// Width of the latency window above the fastest server
    #[serde(default = "default_local_threshold", with = "humantime_serde")]
    pub local_threshold: Duration,

    /// Regular heartbeat period of each server monitor
    #[serde(default = "default_heartbeat_interval", with = "humantime_serde")]
    pub heartbeat_interval: Duration,

    /// Heartbeat period while a selection is waiting
    #[serde(default = "default_min_heartbeat_interval", with = "humantime_serde")]
    pub min_heartbeat_interval: Duration,

    /// Maximum number of selections allowed to wait at once
    #[serde(default = "default_max_wait_queue_size")]
    pub max_server_selection_wait_queue_size: usize,

    /// Selector applied before the caller's selector
    #[serde(skip)]
    pub pre_server_selector: Option<Arc<dyn ServerSelector>>,

    /// Selector applied after the caller's selector
    #[serde(skip)]
    pub post_server_selector: Option<Arc<dyn ServerSelector>>,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            endpoints: default_endpoints(),
            scheme: ConnectionScheme::Standard,
            srv_service_name: default_srv_service_name(),
            srv_max_hosts: 0,
            direct_connection: false,
            replica_set_name: None,
            load_balanced: false,
            server_selection_timeout: default_server_selection_timeout(),
            local_threshold: default_local_threshold(),
            heartbeat_interval: default_heartbeat_interval(),
            min_heartbeat_interval: default_min_heartbeat_interval(),
            max_server_selection_wait_queue_size: default_max_wait_queue_size(),
            pre_server_selector: None,
            post_server_selector: None,
        }
    }
}

impl ClusterSettings {
    /// Settings seeded with the given endpoints.
    pub fn with_endpoints(endpoints: Vec<EndPoint>) -> Self {
        Self {
            endpoints,
            ..Self::default()
        }
    }

    pub fn is_srv(&self) -> bool {
        self.scheme == ConnectionScheme::Srv
    }

    /// The topology implementation these settings call for.
    pub fn cluster_kind(&self) -> ClusterKind {
        if self.load_balanced {
            ClusterKind::LoadBalanced
        } else if self.direct_connection {
            ClusterKind::Single
        } else {
            ClusterKind::Multi
        }
    }

    /// Type of the first published description.
    pub fn initial_cluster_type(&self) -> ClusterType {
        if self.load_balanced {
            ClusterType::LoadBalanced
        } else if self.direct_connection {
            ClusterType::Unknown
        } else if self.replica_set_name.is_some() {
            ClusterType::ReplicaSet
        } else {
            ClusterType::Unknown
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Json
}

fn default_endpoints() -> Vec<EndPoint> {
    vec![EndPoint::new("localhost", crate::description::DEFAULT_PORT)]
}

fn default_srv_service_name() -> String {
    "mongodb".to_string()
}

fn default_server_selection_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_local_threshold() -> Duration {
    Duration::from_millis(15)
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_min_heartbeat_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_max_wait_queue_size() -> usize {
    500
}

/// Durations written as humantime strings ("500ms", "30s").
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&humantime::format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
