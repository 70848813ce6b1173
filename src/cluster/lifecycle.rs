//! Cluster lifecycle: Initial → Open → Disposed.

use std::sync::atomic::{AtomicU8, Ordering};

const INITIAL: u8 = 0;
const OPEN: u8 = 1;
const DISPOSED: u8 = 2;

/// Observable lifecycle state of a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Initial,
    Open,
    Disposed,
}

/// Forward-only state cell. Each transition happens at most once.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    state: AtomicU8,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(INITIAL),
        }
    }

    pub fn state(&self) -> LifecycleState {
        match self.state.load(Ordering::Acquire) {
            INITIAL => LifecycleState::Initial,
            OPEN => LifecycleState::Open,
            _ => LifecycleState::Disposed,
        }
    }

    /// Initial → Open. False if the cluster was already opened or disposed.
    pub fn try_open(&self) -> bool {
        self.state
            .compare_exchange(INITIAL, OPEN, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Any state → Disposed. True only for the call that disposed.
    pub fn try_dispose(&self) -> bool {
        self.state.swap(DISPOSED, Ordering::AcqRel) != DISPOSED
    }

    pub fn is_disposed(&self) -> bool {
        self.state.load(Ordering::Acquire) == DISPOSED
    }
}
