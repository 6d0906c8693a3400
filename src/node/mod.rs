//! Node CRUD and the per-path watch registry
//!
//! [`NodeManager`] turns callback-based transport requests into blocking
//! calls and owns the [`WatchRegistry`]. Watches are one-shot: a fired
//! registration is removed before its handler runs, and the manager never
//! re-arms on its own. Handlers that want continued notification re-register
//! from the callback or through a later watched read.

mod manager;
mod registry;

pub use manager::*;
pub use registry::*;


use serde::Deserialize;
use serde::Serialize;

/// Lifetime and naming policy of a created node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    /// Lives until explicitly deleted
    Persistent,
    /// Bound to the creating session
    Ephemeral,
    /// Persistent, with a server-assigned monotonic suffix
    PersistentSequential,
    /// Ephemeral, with a server-assigned monotonic suffix
    EphemeralSequential,
}

impl NodeType {
    pub fn is_ephemeral(self) -> bool {
        matches!(self, NodeType::Ephemeral | NodeType::EphemeralSequential)
    }

    pub fn is_sequential(self) -> bool {
        matches!(self, NodeType::PersistentSequential | NodeType::EphemeralSequential)
    }

    /// The sequential counterpart with the same lifetime.
    pub fn sequential(self) -> Self {
        if self.is_ephemeral() {
            NodeType::EphemeralSequential
        } else {
            NodeType::PersistentSequential
        }
    }
}

/// What happened at a watched path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeEventKind {
    Created,
    Changed,
    Deleted,
    /// A direct child was added or removed
    ChildrenChanged,
}

/// Which cluster-side watch a registration was armed with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchKind {
    /// Armed by a data read or an existence check
    Data,
    /// Armed by a children listing
    Children,
}

impl WatchKind {
    /// Whether an event of `kind` is delivered by this watch.
    ///
    /// A deletion fires both kinds.
    pub fn fires_on(
        self,
        kind: NodeEventKind,
    ) -> bool {
        match kind {
            NodeEventKind::Deleted => true,
            NodeEventKind::ChildrenChanged => self == WatchKind::Children,
            NodeEventKind::Created | NodeEventKind::Changed => self == WatchKind::Data,
        }
    }
}

/// Receives node watch notifications.
///
/// Runs on the session's event dispatcher thread and must return promptly.
/// Each registration is consumed by the first event it receives.
pub trait NodeEventHandler: Send + Sync {
    fn on_node_created(
        &self,
        _path: &str,
    ) {
    }

    fn on_node_changed(
        &self,
        _path: &str,
    ) {
    }

    fn on_node_deleted(
        &self,
        _path: &str,
    ) {
    }

    fn on_children_changed(
        &self,
        _path: &str,
    ) {
    }
}
