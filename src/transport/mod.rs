//! Boundary with the coordination transport
//!
//! The transport is an opaque async client that owns sockets, heartbeats and
//! server failover. The core consumes it through two traits:
//!
//! - [`CoordinationTransport`] opens one session per `connect` call.
//! - [`TransportHandle`] issues callback-based requests on that session.
//!
//! Session-state changes and watch fires travel the other way as
//! [`TransportEvent`]s posted into an [`EventSink`]. The sink feeds a single
//! consumer (the session's event dispatcher), so the transport never calls
//! into the managers directly.
pub mod memory;


use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Sender;
#[cfg(test)]
use mockall::automock;
use tracing::warn;

use crate::Error;
use crate::NodeError;
use crate::NodeEventKind;
use crate::NodeType;
use crate::Result;
use crate::SessionError;
use crate::SessionState;
use crate::TransportError;

/// Callback receiving the outcome of one request. Invoked exactly once.
pub type Completion<T> = Box<dyn FnOnce(std::result::Result<T, ReplyError>) + Send>;

/// Result codes reported by the ensemble for a failed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyError {
    NoNode,
    NodeExists,
    NotEmpty,
    NoChildrenForEphemerals,
    SessionExpired,
    ConnectionLoss,
    Closing,
    BadArguments,
    System(String),
}

impl ReplyError {
    /// Maps a reply code into the crate error for the request on `path`.
    pub fn into_error(
        self,
        path: &str,
    ) -> Error {
        let path = path.to_string();
        match self {
            ReplyError::NoNode => NodeError::NoNode { path }.into(),
            ReplyError::NodeExists => NodeError::NodeExists { path }.into(),
            ReplyError::NotEmpty => NodeError::NotEmpty { path }.into(),
            ReplyError::NoChildrenForEphemerals => NodeError::NoChildrenForEphemerals { path }.into(),
            ReplyError::SessionExpired => SessionError::Expired.into(),
            ReplyError::ConnectionLoss => TransportError::ConnectionLoss.into(),
            ReplyError::Closing => TransportError::Closing.into(),
            ReplyError::BadArguments => TransportError::Rejected(format!("bad arguments for <{path}>")).into(),
            ReplyError::System(message) => TransportError::System(message).into(),
        }
    }
}

/// Notification delivered by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    StateChanged { state: SessionState, host: String },
    WatchFired { path: String, kind: NodeEventKind },
}

/// Producer side of a session's delivery queue
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: Sender<TransportEvent>,
}

impl EventSink {
    pub fn new(sender: Sender<TransportEvent>) -> Self {
        Self { sender }
    }

    /// Queues an event for the dispatcher. Never blocks.
    ///
    /// Returns false if the session behind this sink is gone.
    pub fn post(
        &self,
        event: TransportEvent,
    ) -> bool {
        match self.sender.send(event) {
            Ok(()) => true,
            Err(e) => {
                warn!(event = ?e.0, "Event dropped, session dispatcher is gone");
                false
            }
        }
    }
}

/// Parameters for opening a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Servers in the order they must be tried
    pub hosts: Vec<String>,
    pub connection_timeout: Duration,
    pub expiration_timeout: Duration,
    pub deterministic_order: bool,
}

#[cfg_attr(test, automock)]
pub trait CoordinationTransport: Send + Sync {
    /// Opens a session. Must not block until connected; the outcome of the
    /// connection attempt is reported through `events`.
    fn connect(
        &self,
        request: ConnectRequest,
        events: EventSink,
    ) -> Result<Arc<dyn TransportHandle>>;
}

/// One open session on the ensemble
#[cfg_attr(test, automock)]
pub trait TransportHandle: Send + Sync {
    fn session_id(&self) -> i64;

    fn get(
        &self,
        path: &str,
        watch: bool,
        done: Completion<Vec<u8>>,
    );

    fn get_children(
        &self,
        path: &str,
        watch: bool,
        done: Completion<Vec<String>>,
    );

    fn exists(
        &self,
        path: &str,
        watch: bool,
        done: Completion<bool>,
    );

    /// Completes with the path actually created (differs for sequential types).
    fn create(
        &self,
        path: &str,
        data: &[u8],
        node_type: NodeType,
        done: Completion<String>,
    );

    fn set_data(
        &self,
        path: &str,
        data: &[u8],
        done: Completion<()>,
    );

    fn delete(
        &self,
        path: &str,
        done: Completion<()>,
    );

    /// Closes the session on the ensemble. Ephemeral nodes go with it.
    fn close(&self);
}
