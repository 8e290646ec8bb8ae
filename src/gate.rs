//! One-shot readiness signal.
//!
//! The engine fires the gate once the first chunk's segments are committed;
//! the playback side polls [`ReadinessGate::is_fired`] and starts playback.
//! The gate is re-armed at the start of every run.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct GateState {
    fired: bool,
    fire_count: u64,
}

#[derive(Debug, Default)]
pub struct ReadinessGate {
    state: Mutex<GateState>,
    cond: Condvar,
}

impl ReadinessGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset to armed. Idempotent.
    pub fn arm(&self) {
        let mut state = self.lock();
        state.fired = false;
        state.fire_count = 0;
    }

    /// Transition armed→fired. Returns `true` only for the call that
    /// performed the transition; firing a fired gate is a no-op.
    pub fn fire(&self) -> bool {
        let mut state = self.lock();
        if state.fired {
            return false;
        }
        state.fired = true;
        state.fire_count += 1;
        drop(state);
        self.cond.notify_all();
        true
    }

    #[must_use]
    pub fn is_fired(&self) -> bool {
        self.lock().fired
    }

    /// Number of armed→fired transitions since the last `arm`. Never exceeds 1.
    #[must_use]
    pub fn fire_count(&self) -> u64 {
        self.lock().fire_count
    }

    /// Block until fired.
    pub fn wait(&self) {
        let mut state = self.lock();
        while !state.fired {
            state = self
                .cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until fired or `timeout` elapses. Returns whether the gate fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        while !state.fired {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (next, _) = self
                .cond
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = next;
        }
        true
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        // The state is two plain fields; a panic elsewhere cannot leave it
        // half-written.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
