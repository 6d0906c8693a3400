//! Per-session event dispatcher
//!
//! Single consumer of the session's delivery queue. Every state change and
//! watch fire is handled here, serially and in arrival order, so handler
//! invocations never run concurrently with each other.

use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;

use crossbeam_channel::bounded;
use crossbeam_channel::Receiver;
use crossbeam_channel::Sender;
use tracing::debug;
use tracing::warn;

use super::SessionShared;
use crate::pending::PendingTable;
use crate::transport::TransportEvent;
use crate::Result;

pub(crate) struct EventDispatcher {
    shutdown_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl EventDispatcher {
    /// Starts the dispatcher thread for one session.
    pub(crate) fn spawn(
        session_id: i64,
        events: Receiver<TransportEvent>,
        shared: Arc<SessionShared>,
        pending: Arc<PendingTable>,
    ) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let handle = thread::Builder::new()
            .name(format!("zk-events-{session_id}"))
            .spawn(move || {
                debug!(session_id, "Event dispatcher started");

                loop {
                    crossbeam_channel::select! {
                        recv(events) -> result => {
                            // a stop requested by a handler on this thread wins
                            // over events still queued for the old session
                            if shutdown_rx.try_recv().is_ok() {
                                debug!(session_id, "Event dispatcher received shutdown signal");
                                break;
                            }
                            match result {
                                Ok(event) => shared.handle_event(event, &pending),
                                Err(_) => {
                                    warn!(session_id, "Transport event channel closed");
                                    break;
                                }
                            }
                        }
                        recv(shutdown_rx) -> _ => {
                            debug!(session_id, "Event dispatcher received shutdown signal");
                            break;
                        }
                    }
                }

                debug!(session_id, "Event dispatcher stopped");
            })?;

        Ok(Self {
            shutdown_tx,
            handle: Some(handle),
        })
    }

    /// Signals the thread and waits for it to exit.
    ///
    /// When called from a handler running on the dispatcher thread itself the
    /// thread is detached instead; it exits once the handler returns.
    pub(crate) fn stop(mut self) {
        let _ = self.shutdown_tx.send(());

        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                debug!("Dispatcher stopped from its own thread, detaching");
                return;
            }
            if handle.join().is_err() {
                warn!("Event dispatcher thread panicked");
            }
        }
    }
}
