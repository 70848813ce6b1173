//! Server selection wait queue and rapid heartbeats.
//!
//! Selectors that find nothing take a slot in the queue while they wait.
//! While the queue is non-empty every server is asked for a heartbeat each
//! `min_heartbeat_interval`, so that a blocked caller sees a new topology
//! sooner than the normal heartbeat interval would allow.

use super::registry::ServerRegistry;
use crate::error::ClusterError;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Bounded count of waiting selectors.
#[derive(Debug)]
pub(crate) struct WaitQueue {
    size: Mutex<usize>,
    max_size: usize,
    rapid_heartbeats: watch::Sender<bool>,
}

impl WaitQueue {
    pub fn new(max_size: usize) -> Self {
        let (rapid_heartbeats, _) = watch::channel(false);
        Self {
            size: Mutex::new(0),
            max_size,
            rapid_heartbeats,
        }
    }

    /// Take a slot, or fail with `WaitQueueFull`.
    pub fn enter(&self) -> Result<WaitQueueEntry<'_>, ClusterError> {
        let mut size = self.size.lock();
        if *size >= self.max_size {
            return Err(ClusterError::WaitQueueFull {
                max_size: self.max_size,
            });
        }
        *size += 1;
        if *size == 1 {
            self.rapid_heartbeats.send_replace(true);
        }
        Ok(WaitQueueEntry { queue: self })
    }

    pub fn len(&self) -> usize {
        *self.size.lock()
    }

    /// Receiver for the rapid heartbeat switch.
    pub fn rapid_heartbeats(&self) -> watch::Receiver<bool> {
        self.rapid_heartbeats.subscribe()
    }

    fn leave(&self) {
        let mut size = self.size.lock();
        *size = size.saturating_sub(1);
        if *size == 0 {
            self.rapid_heartbeats.send_replace(false);
        }
    }
}

/// A slot in the wait queue, released on drop.
#[derive(Debug)]
pub(crate) struct WaitQueueEntry<'a> {
    queue: &'a WaitQueue,
}

impl Drop for WaitQueueEntry<'_> {
    fn drop(&mut self) {
        self.queue.leave();
    }
}

/// Request heartbeats from every server while the switch is on.
pub(crate) async fn run_rapid_heartbeats(
    registry: Arc<ServerRegistry>,
    mut enabled: watch::Receiver<bool>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        // Wait for the first waiter
        loop {
            let on = *enabled.borrow_and_update();
            if on {
                break;
            }
            tokio::select! {
                changed = enabled.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = shutdown.recv() => return,
            }
        }

        debug!(cluster_id = %registry.cluster_id(), "rapid heartbeats on");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => registry.request_heartbeats(),
                changed = enabled.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    let on = *enabled.borrow_and_update();
                    if !on {
                        break;
                    }
                }
                _ = shutdown.recv() => return,
            }
        }
        debug!(cluster_id = %registry.cluster_id(), "rapid heartbeats off");
    }
}
