//! The published description and its change signal.
//!
//! Each published [`ClusterDescription`] is paired with a one-shot
//! [`ChangeSignal`] that fires when the next description replaces it.
//! Selection loops snapshot both, evaluate the snapshot, and wait on the
//! signal if nothing matched. The signal can be waited on from async code
//! or from a plain thread.

use super::registry::ServerRegistry;
use crate::description::{ClusterDescription, EndPoint, ServerDescription};
use crate::server::ServerHandle;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Notify;

/// Fires once. Waiters that arrive after firing return immediately.
#[derive(Debug, Default)]
pub(crate) struct ChangeSignal {
    fired: Mutex<bool>,
    condvar: Condvar,
    notify: Notify,
}

impl ChangeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fire(&self) {
        {
            let mut fired = self.fired.lock();
            if *fired {
                return;
            }
            *fired = true;
        }
        self.condvar.notify_all();
        self.notify.notify_waiters();
    }

    pub fn is_fired(&self) -> bool {
        *self.fired.lock()
    }

    /// Park the current thread until the signal fires or `deadline` passes.
    ///
    /// Returns true if the signal fired.
    pub fn wait_blocking(&self, deadline: Instant) -> bool {
        let mut fired = self.fired.lock();
        while !*fired {
            if self.condvar.wait_until(&mut fired, deadline).timed_out() {
                return *fired;
            }
        }
        true
    }

    /// Suspend until the signal fires or `deadline` passes.
    ///
    /// Returns true if the signal fired.
    pub async fn wait(&self, deadline: Instant) -> bool {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent fire is not lost
        notified.as_mut().enable();
        if self.is_fired() {
            return true;
        }
        tokio::time::timeout_at(tokio::time::Instant::from_std(deadline), notified)
            .await
            .is_ok()
    }
}

/// One published snapshot.
#[derive(Debug)]
pub(crate) struct DescriptionSource {
    description: Arc<ClusterDescription>,
    changed: Arc<ChangeSignal>,
    /// Connected entries that still have a live server, as
    /// (index into `description.servers()`, handle).
    connected: Vec<(usize, ServerHandle)>,
}

impl DescriptionSource {
    pub fn new(description: Arc<ClusterDescription>, registry: &ServerRegistry) -> Self {
        let connected = description
            .servers()
            .iter()
            .enumerate()
            .filter(|(_, server)| server.is_connected())
            .filter_map(|(index, server)| registry.get(server.endpoint()).map(|handle| (index, handle)))
            .collect();
        Self {
            description,
            changed: Arc::new(ChangeSignal::new()),
            connected,
        }
    }

    /// A snapshot with no live servers.
    pub fn detached(description: Arc<ClusterDescription>) -> Self {
        Self {
            description,
            changed: Arc::new(ChangeSignal::new()),
            connected: Vec::new(),
        }
    }

    pub fn description(&self) -> &Arc<ClusterDescription> {
        &self.description
    }

    pub fn changed(&self) -> &Arc<ChangeSignal> {
        &self.changed
    }

    /// Descriptions of the connected servers, in description order.
    pub fn connected_descriptions(&self) -> Vec<&ServerDescription> {
        let servers = self.description.servers();
        self.connected.iter().map(|(index, _)| &servers[*index]).collect()
    }

    /// Connected descriptions paired with their handles.
    pub fn connected_servers(&self) -> impl Iterator<Item = (&ServerDescription, &ServerHandle)> {
        let servers = self.description.servers();
        self.connected
            .iter()
            .map(move |(index, handle)| (&servers[*index], handle))
    }

    /// The live handle for a connected endpoint in this snapshot.
    pub fn server(&self, endpoint: &EndPoint) -> Option<ServerHandle> {
        self.connected_servers()
            .find(|(description, _)| description.endpoint() == endpoint)
            .map(|(_, handle)| Arc::clone(handle))
    }
}
