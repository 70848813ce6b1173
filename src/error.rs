//! Errors surfaced by clusters and server selection.

use std::time::Duration;
use thiserror::Error;

/// Errors returned by cluster operations.
#[derive(Debug, Clone, Error)]
pub enum ClusterError {
    #[error(
        "A timeout occurred after {}ms selecting a server{}. Client view of cluster state is {description}.",
        .elapsed.as_millis(),
        .selector.as_ref().map(|s| format!(" using {}", s)).unwrap_or_default()
    )]
    Timeout {
        /// Time spent before giving up.
        elapsed: Duration,
        /// Description of the selector, absent in load-balanced mode.
        selector: Option<String>,
        /// Last cluster description seen.
        description: String,
    },

    #[error("The wait queue for server selection is full (maximum size {max_size}).")]
    WaitQueueFull { max_size: usize },

    #[error("{0}")]
    IncompatibleDriver(String),

    #[error("the cluster has been disposed")]
    Disposed,

    #[error("the cluster must be initialized before servers can be selected")]
    NotInitialized,

    #[error("invalid cluster configuration: {0}")]
    InvalidConfiguration(String),

    #[error("{0}")]
    InvalidDnsResults(String),

    #[error("a tokio runtime is required to initialize the cluster")]
    NoRuntime,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ClusterError {
    /// True for errors that end selection without retrying.
    pub fn is_selection_fatal(&self) -> bool {
        matches!(
            self,
            ClusterError::Timeout { .. }
                | ClusterError::WaitQueueFull { .. }
                | ClusterError::IncompatibleDriver(_)
        )
    }
}
