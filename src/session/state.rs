use std::time::Duration;
use std::time::Instant;

use parking_lot::Condvar;
use parking_lot::Mutex;

use super::SessionState;

/// Current session state plus the condition threads wait on for transitions
pub(crate) struct StateCell {
    state: Mutex<SessionState>,
    changed: Condvar,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::Disconnected),
            changed: Condvar::new(),
        }
    }

    pub(crate) fn get(&self) -> SessionState {
        *self.state.lock()
    }

    /// Stores `next`, wakes all waiters and returns the previous state.
    pub(crate) fn set(
        &self,
        next: SessionState,
    ) -> SessionState {
        let mut state = self.state.lock();
        let previous = std::mem::replace(&mut *state, next);
        self.changed.notify_all();
        previous
    }

    /// Blocks until `done` accepts the current state or `timeout` elapses.
    ///
    /// Returns the state that satisfied `done`, or `None` on timeout. A
    /// timeout too large to form a deadline waits without one.
    pub(crate) fn wait_until(
        &self,
        timeout: Duration,
        done: impl Fn(SessionState) -> bool,
    ) -> Option<SessionState> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();
        loop {
            if done(*state) {
                return Some(*state);
            }
            let Some(deadline) = deadline else {
                self.changed.wait(&mut state);
                continue;
            };
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return done(*state).then_some(*state);
            }
        }
    }
}
