//! The server selection loop.
//!
//! One attempt is a sequence of steps. Each step snapshots the published
//! description, runs the selector chain, and either returns a server or
//! the signal to wait on before trying again. The async and blocking entry
//! points on [`Cluster`](super::Cluster) differ only in how they wait.

use super::ClusterShared;
use super::lifecycle::LifecycleState;
use super::load_balanced::ServerReady;
use super::source::{ChangeSignal, DescriptionSource};
use super::wait_queue::WaitQueueEntry;
use crate::description::ClusterDescription;
use crate::error::ClusterError;
use crate::events::SdamEvent;
use crate::selector::{
    LatencyLimitingServerSelector, OperationsCountServerSelector, ServerSelector, describe_chain,
    run_chain,
};
use crate::server::ServerHandle;
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Outcome of one step.
pub(super) enum Step {
    Selected(ServerHandle),
    /// Nothing matched; try again once this fires or the deadline passes.
    Wait(Arc<ChangeSignal>),
}

pub(super) struct SelectionAttempt<'a> {
    shared: &'a ClusterShared,
    selector: &'a dyn ServerSelector,
    operation_id: Uuid,
    started: Instant,
    deadline: Instant,
    /// The decorated chain as shown in timeout errors. `None` when
    /// selectors do not apply (load-balanced mode).
    chain_description: Option<String>,
    last_description: Option<Arc<ClusterDescription>>,
    slot: Option<WaitQueueEntry<'a>>,
}

impl<'a> SelectionAttempt<'a> {
    pub fn begin(
        shared: &'a ClusterShared,
        selector: &'a dyn ServerSelector,
        timeout: Option<Duration>,
    ) -> Result<Self, ClusterError> {
        match shared.lifecycle.state() {
            LifecycleState::Initial => return Err(ClusterError::NotInitialized),
            LifecycleState::Disposed => return Err(ClusterError::Disposed),
            LifecycleState::Open => {}
        }

        let configured = shared.settings.server_selection_timeout;
        let timeout = timeout.map_or(configured, |t| t.min(configured));
        let started = Instant::now();
        let chain_description = shared
            .server_ready
            .is_none()
            .then(|| shared.describe_selection(selector));
        let attempt = Self {
            shared,
            selector,
            operation_id: Uuid::new_v4(),
            started,
            deadline: started + timeout,
            chain_description,
            last_description: None,
            slot: None,
        };

        shared.events.publish(SdamEvent::SelectingServer {
            cluster_id: shared.cluster_id,
            operation_id: attempt.operation_id,
            selector: attempt
                .chain_description
                .clone()
                .unwrap_or_else(|| selector.to_string()),
        });
        Ok(attempt)
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn step(&mut self) -> Result<Step, ClusterError> {
        let shared = self.shared;
        if shared.lifecycle.is_disposed() {
            return Err(ClusterError::Disposed);
        }
        match &shared.server_ready {
            Some(ready) => self.step_load_balanced(ready),
            None => self.step_general(),
        }
    }

    fn step_general(&mut self) -> Result<Step, ClusterError> {
        let shared = self.shared;
        let source = shared.source.load_full();
        self.last_description = Some(Arc::clone(source.description()));
        source.description().check_compatible()?;

        if let Some(server) = shared.select_from(&source, self.selector) {
            return Ok(Step::Selected(server));
        }

        self.check_deadline()?;
        if self.slot.is_none() {
            self.slot = Some(shared.wait_queue.enter()?);
            shared.events.publish(SdamEvent::EnteredSelectionWaitQueue {
                cluster_id: shared.cluster_id,
                operation_id: self.operation_id,
                remaining_time: self.deadline.saturating_duration_since(Instant::now()),
            });
        }
        Ok(Step::Wait(Arc::clone(source.changed())))
    }

    /// The lone server is returned as soon as it has reported once.
    fn step_load_balanced(&mut self, ready: &ServerReady) -> Result<Step, ClusterError> {
        if let Some(server) = ready.server() {
            return Ok(Step::Selected(server));
        }
        self.last_description = Some(self.shared.description());
        self.check_deadline()?;
        Ok(Step::Wait(Arc::clone(ready.signal())))
    }

    fn check_deadline(&self) -> Result<(), ClusterError> {
        if Instant::now() < self.deadline {
            return Ok(());
        }
        Err(ClusterError::Timeout {
            elapsed: self.started.elapsed(),
            selector: self.chain_description.clone(),
            description: self
                .last_description
                .as_ref()
                .map(|d| d.to_string())
                .unwrap_or_default(),
        })
    }

    pub fn succeed(self, server: ServerHandle) -> ServerHandle {
        self.shared.events.publish(SdamEvent::SelectedServer {
            cluster_id: self.shared.cluster_id,
            operation_id: self.operation_id,
            endpoint: server.endpoint().clone(),
            duration: self.started.elapsed(),
        });
        server
    }

    pub fn fail(self, error: ClusterError) -> ClusterError {
        self.shared.events.publish(SdamEvent::SelectingServerFailed {
            cluster_id: self.shared.cluster_id,
            operation_id: self.operation_id,
            error: error.to_string(),
            duration: self.started.elapsed(),
        });
        error
    }
}

impl ClusterShared {
    /// Run the decorated chain over one snapshot and pick a live server.
    pub(super) fn select_from(
        &self,
        source: &DescriptionSource,
        selector: &dyn ServerSelector,
    ) -> Option<ServerHandle> {
        let latency = LatencyLimitingServerSelector::new(self.settings.local_threshold);
        let operations: OperationsCountServerSelector = source
            .connected_servers()
            .map(|(description, server)| (description.endpoint().clone(), server.operations().count()))
            .collect();

        let mut chain: Vec<&dyn ServerSelector> = Vec::with_capacity(5);
        if let Some(pre) = &self.settings.pre_server_selector {
            chain.push(pre.as_ref());
        }
        chain.push(selector);
        if let Some(post) = &self.settings.post_server_selector {
            chain.push(post.as_ref());
        }
        chain.push(&latency);
        chain.push(&operations);

        let candidates = run_chain(&chain, source.description(), source.connected_descriptions());
        let chosen = candidates.choose(&mut rand::thread_rng())?;
        source.server(chosen.endpoint())
    }

    /// The chain `select_from` runs, as text.
    pub(super) fn describe_selection(&self, selector: &dyn ServerSelector) -> String {
        let latency = LatencyLimitingServerSelector::new(self.settings.local_threshold);
        let operations = OperationsCountServerSelector::default();

        let mut chain: Vec<&dyn ServerSelector> = Vec::with_capacity(5);
        if let Some(pre) = &self.settings.pre_server_selector {
            chain.push(pre.as_ref());
        }
        chain.push(selector);
        if let Some(post) = &self.settings.post_server_selector {
            chain.push(post.as_ref());
        }
        chain.push(&latency);
        chain.push(&operations);

        format!("CompositeServerSelector{{ Selectors = {} }}", describe_chain(&chain))
    }
}
