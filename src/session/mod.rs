//! Logical session to the coordination ensemble
//!
//! [`SessionManager`] owns connect/close, the immutable session settings,
//! the single session-event handler slot and the blocking "wait for state"
//! primitive. Transport notifications are consumed by a per-session event
//! dispatcher thread, which applies state transitions and routes watch fires
//! to the node side.

mod dispatcher;
mod host_list;
mod manager;
mod state;

pub use host_list::*;
pub use manager::*;
pub(crate) use state::StateCell;


use serde::Deserialize;
use serde::Serialize;

use crate::NodeEventKind;

/// Connection state of the logical session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    /// Invalidated by the ensemble; only a fresh `initialize` recovers
    Expired,
}

/// Receives session state transitions.
///
/// Runs on the event dispatcher thread. Implementations must return promptly:
/// log, signal or queue work, never block on the same session.
pub trait SessionEventHandler: Send + Sync {
    fn on_connected(
        &self,
        _host: &str,
    ) {
    }

    fn on_connecting(
        &self,
        _host: &str,
    ) {
    }

    fn on_disconnected(
        &self,
        _host: &str,
    ) {
    }

    fn on_expired(
        &self,
        _host: &str,
    ) {
    }
}

/// Node-side consumer of watch fires and session teardown
pub(crate) trait WatchListener: Send + Sync {
    fn on_watch_fired(
        &self,
        path: &str,
        kind: NodeEventKind,
    );

    /// The session's watches can no longer fire.
    fn on_session_ended(&self);
}
