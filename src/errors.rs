//! Coordination Client Error Hierarchy
//!
//! Every public operation either returns a well-defined result or fails with
//! exactly one of the typed errors below, grouped by the layer that detected
//! the failure.

use std::time::Duration;

use config::ConfigError;

use crate::SessionState;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Misuse of registration or initialization ordering
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Settings file or environment overlay could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Session is not usable for the requested operation
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Node-level precondition violated
    #[error(transparent)]
    Node(#[from] NodeError),

    /// Local wait exceeded its bound
    #[error("{operation} timed out after {duration:?}")]
    Timeout {
        operation: &'static str,
        duration: Duration,
    },

    /// Unclassified lower-layer failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Operating system refused a resource (e.g. thread spawn)
    #[error("System error: {0}")]
    System(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Session already initialized")]
    AlreadyInitialized,

    #[error("Event handler already registered")]
    AlreadyRegistered,

    #[error("Event handler not registered")]
    NotRegistered,

    #[error("Invalid host list <{hosts}>: {reason}")]
    InvalidHostList { hosts: String, reason: String },

    #[error("Invalid setting: {0}")]
    InvalidSetting(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Operation attempted outside the Connected state
    #[error("Session not connected (state: {state:?})")]
    NotConnected { state: SessionState },

    /// The cluster invalidated the session; a fresh `initialize` is required
    #[error("Session expired")]
    Expired,

    /// The session was closed while the request was outstanding
    #[error("Session closed")]
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("Node <{path}> does not exist")]
    NoNode { path: String },

    #[error("Node <{path}> already exists")]
    NodeExists { path: String },

    #[error("Node <{path}> has children")]
    NotEmpty { path: String },

    #[error("Node <{path}> is ephemeral and cannot have children")]
    NoChildrenForEphemerals { path: String },

    #[error("Invalid path <{path}>: {reason}")]
    InvalidPath { path: String, reason: &'static str },
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Connection to the ensemble was lost while the request was in flight
    #[error("Connection lost")]
    ConnectionLoss,

    /// The transport handle is shutting down
    #[error("Transport is closing")]
    Closing,

    /// The server rejected the request arguments
    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Transport failure: {0}")]
    System(String),
}

impl Error {
    /// Whether retrying an idempotent operation later can succeed without a
    /// fresh `initialize`.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Session(SessionError::NotConnected { .. })
                | Error::Transport(TransportError::ConnectionLoss)
                | Error::Timeout { .. }
        )
    }

    pub fn is_no_node(&self) -> bool {
        matches!(self, Error::Node(NodeError::NoNode { .. }))
    }

    pub fn is_session_expired(&self) -> bool {
        matches!(self, Error::Session(SessionError::Expired))
    }
}
