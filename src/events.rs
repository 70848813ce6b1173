//! SDAM event stream.
//!
//! Every event is logged through `tracing` and broadcast to subscribers.
//! Slow subscribers lag and miss events; they never block the cluster.

use crate::description::{ClusterDescription, ClusterId, EndPoint};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Capacity of the per-cluster event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Topology and selection events emitted by a cluster.
#[derive(Debug, Clone)]
pub enum SdamEvent {
    ClusterOpening {
        cluster_id: ClusterId,
    },
    ClusterOpened {
        cluster_id: ClusterId,
        duration: Duration,
    },
    ClusterClosing {
        cluster_id: ClusterId,
    },
    ClusterClosed {
        cluster_id: ClusterId,
        duration: Duration,
    },
    ClusterAddingServer {
        cluster_id: ClusterId,
        endpoint: EndPoint,
    },
    ClusterAddedServer {
        cluster_id: ClusterId,
        endpoint: EndPoint,
        duration: Duration,
    },
    ClusterRemovingServer {
        cluster_id: ClusterId,
        endpoint: EndPoint,
        reason: String,
    },
    ClusterRemovedServer {
        cluster_id: ClusterId,
        endpoint: EndPoint,
        reason: String,
        duration: Duration,
    },
    ClusterDescriptionChanged {
        old: Arc<ClusterDescription>,
        new: Arc<ClusterDescription>,
    },
    SelectingServer {
        cluster_id: ClusterId,
        operation_id: uuid::Uuid,
        selector: String,
    },
    SelectedServer {
        cluster_id: ClusterId,
        operation_id: uuid::Uuid,
        endpoint: EndPoint,
        duration: Duration,
    },
    SelectingServerFailed {
        cluster_id: ClusterId,
        operation_id: uuid::Uuid,
        error: String,
        duration: Duration,
    },
    EnteredSelectionWaitQueue {
        cluster_id: ClusterId,
        operation_id: uuid::Uuid,
        remaining_time: Duration,
    },
    Information {
        cluster_id: ClusterId,
        message: String,
    },
}

/// Logs and broadcasts events for one cluster.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<SdamEvent>,
}

impl EventPublisher {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SdamEvent> {
        self.sender.subscribe()
    }

    /// Log the event and hand it to subscribers.
    pub fn publish(&self, event: SdamEvent) {
        log_event(&event);
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    /// Shorthand for an `Information` event.
    pub fn information(&self, cluster_id: ClusterId, message: impl Into<String>) {
        self.publish(SdamEvent::Information {
            cluster_id,
            message: message.into(),
        });
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}

fn log_event(event: &SdamEvent) {
    match event {
        SdamEvent::ClusterOpening { cluster_id } => {
            debug!(cluster_id = %cluster_id, "cluster opening");
        }
        SdamEvent::ClusterOpened { cluster_id, duration } => {
            info!(cluster_id = %cluster_id, duration = ?duration, "cluster opened");
        }
        SdamEvent::ClusterClosing { cluster_id } => {
            debug!(cluster_id = %cluster_id, "cluster closing");
        }
        SdamEvent::ClusterClosed { cluster_id, duration } => {
            info!(cluster_id = %cluster_id, duration = ?duration, "cluster closed");
        }
        SdamEvent::ClusterAddingServer { cluster_id, endpoint } => {
            debug!(cluster_id = %cluster_id, endpoint = %endpoint, "adding server");
        }
        SdamEvent::ClusterAddedServer { cluster_id, endpoint, .. } => {
            info!(cluster_id = %cluster_id, endpoint = %endpoint, "added server");
        }
        SdamEvent::ClusterRemovingServer { cluster_id, endpoint, reason } => {
            debug!(cluster_id = %cluster_id, endpoint = %endpoint, reason = %reason, "removing server");
        }
        SdamEvent::ClusterRemovedServer { cluster_id, endpoint, reason, .. } => {
            info!(cluster_id = %cluster_id, endpoint = %endpoint, reason = %reason, "removed server");
        }
        SdamEvent::ClusterDescriptionChanged { new, .. } => {
            info!(
                cluster_id = %new.cluster_id(),
                cluster_type = %new.cluster_type(),
                servers = new.servers().len(),
                "cluster description changed"
            );
        }
        SdamEvent::SelectingServer { cluster_id, operation_id, selector } => {
            debug!(cluster_id = %cluster_id, operation_id = %operation_id, selector = %selector, "selecting server");
        }
        SdamEvent::SelectedServer { cluster_id, operation_id, endpoint, duration } => {
            debug!(
                cluster_id = %cluster_id,
                operation_id = %operation_id,
                endpoint = %endpoint,
                duration = ?duration,
                "selected server"
            );
        }
        SdamEvent::SelectingServerFailed { cluster_id, operation_id, error, .. } => {
            warn!(cluster_id = %cluster_id, operation_id = %operation_id, error = %error, "server selection failed");
        }
        SdamEvent::EnteredSelectionWaitQueue { cluster_id, operation_id, remaining_time } => {
            debug!(
                cluster_id = %cluster_id,
                operation_id = %operation_id,
                remaining = ?remaining_time,
                "waiting for a suitable server"
            );
        }
        SdamEvent::Information { cluster_id, message } => {
            info!(cluster_id = %cluster_id, "{}", message);
        }
    }
}
