//! rustsdam - cluster topology monitoring and server selection
//!
//! This crate provides the core of a document database driver that decides
//! which server an operation goes to:
//! - Discovery and classification of standalone, replica set, sharded and
//!   load-balanced deployments
//! - Stale primary detection by (setVersion, electionId) ordering
//! - Composable server selectors with blocking and async selection
//! - DNS SRV polling for seed lists
//! - SDAM events for logging and monitoring
//!
//! The wire protocol stays outside: servers are plugged in through
//! [`server::ClusterableServer`] and [`server::HeartbeatProber`].

pub mod clock;
pub mod cluster;
pub mod config;
pub mod description;
pub mod dns;
pub mod error;
pub mod events;
pub mod replay;
pub mod selector;
pub mod server;
pub mod util;

pub use cluster::{Cluster, ClusterBuilder};
pub use config::{ClusterSettings, Config};
pub use error::ClusterError;
