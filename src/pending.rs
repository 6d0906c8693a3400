//! Pending requests: synchronizing async transport completions back onto the
//! calling thread.
//!
//! Each outstanding call owns a [`PendingRequest`] (result slot + condition
//! variable). The issuing thread blocks on that request's own condition
//! variable; no shared lock is held while it waits. The per-session
//! [`PendingTable`] keeps a type-erased reference to every outstanding
//! request so session teardown can release all waiters with a terminal error.
//! A table that has been failed stays closed: requests registered afterwards
//! fail immediately with the same error.
//!
//! Request state machine: `Issued -> {Completed | Failed | TimedOut}`. The
//! first outcome wins; a completion arriving after a timeout is dropped.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Condvar;
use parking_lot::Mutex;
use tracing::trace;

use crate::Error;
use crate::Result;
use crate::SessionError;

/// Terminal failure injected into a request that is still waiting.
pub(crate) trait Cancel: Send + Sync {
    /// Returns false if the request had already been resolved.
    fn fail(
        &self,
        error: Error,
    ) -> bool;
}

enum Slot<T> {
    Issued,
    Ready(Result<T>),
    /// The waiter has returned; later outcomes are dropped
    Closed,
}

impl<T> Slot<T> {
    /// Takes a delivered outcome, closing the slot.
    fn take_ready(&mut self) -> Option<Result<T>> {
        match std::mem::replace(self, Slot::Closed) {
            Slot::Ready(result) => Some(result),
            other => {
                *self = other;
                None
            }
        }
    }
}

/// One outstanding request and the slot its completion lands in
pub(crate) struct PendingRequest<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

impl<T> PendingRequest<T> {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Issued),
            ready: Condvar::new(),
        }
    }

    /// Stores the outcome and wakes the waiter. The first outcome wins.
    pub(crate) fn complete(
        &self,
        result: Result<T>,
    ) -> bool {
        let mut slot = self.slot.lock();
        if !matches!(*slot, Slot::Issued) {
            return false;
        }
        *slot = Slot::Ready(result);
        self.ready.notify_all();
        true
    }

    /// Blocks until an outcome arrives or `timeout` elapses.
    ///
    /// A timeout too large to form a deadline waits without one.
    pub(crate) fn wait(
        &self,
        operation: &'static str,
        timeout: Duration,
    ) -> Result<T> {
        let deadline = Instant::now().checked_add(timeout);
        let mut slot = self.slot.lock();
        loop {
            if let Some(result) = slot.take_ready() {
                return result;
            }
            let Some(deadline) = deadline else {
                self.ready.wait(&mut slot);
                continue;
            };
            if self.ready.wait_until(&mut slot, deadline).timed_out() {
                return slot.take_ready().unwrap_or_else(|| {
                    *slot = Slot::Closed;
                    Err(Error::Timeout {
                        operation,
                        duration: timeout,
                    })
                });
            }
        }
    }
}

impl<T: Send> Cancel for PendingRequest<T> {
    fn fail(
        &self,
        error: Error,
    ) -> bool {
        self.complete(Err(error))
    }
}

/// Outstanding requests of one session, keyed by a monotonically increasing id
#[derive(Default)]
pub(crate) struct PendingTable {
    next_id: AtomicU64,
    entries: DashMap<u64, Arc<dyn Cancel>>,
    /// Set once by `fail_all`
    closed: Mutex<Option<SessionError>>,
}

impl PendingTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register<T: Send + 'static>(&self) -> (u64, Arc<PendingRequest<T>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = Arc::new(PendingRequest::new());

        let closed = self.closed.lock();
        match closed.as_ref() {
            Some(error) => {
                request.fail(error.clone().into());
            }
            None => {
                self.entries.insert(id, request.clone() as Arc<dyn Cancel>);
            }
        }
        (id, request)
    }

    pub(crate) fn remove(
        &self,
        id: u64,
    ) {
        self.entries.remove(&id);
    }

    /// Fails every outstanding request and closes the table; returns how many
    /// waiters were released.
    pub(crate) fn fail_all(
        &self,
        error: SessionError,
    ) -> usize {
        *self.closed.lock() = Some(error.clone());

        let ids: Vec<u64> = self.entries.iter().map(|entry| *entry.key()).collect();
        let mut released = 0;
        for id in ids {
            if let Some((_, request)) = self.entries.remove(&id) {
                if request.fail(error.clone().into()) {
                    released += 1;
                }
            }
        }
        trace!(released, "Pending requests failed");
        released
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
