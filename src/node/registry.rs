use std::fmt;
use std::panic::catch_unwind;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;
use tracing::error;
use tracing::trace;

use super::NodeEventHandler;
use super::NodeEventKind;
use super::WatchKind;
use crate::session::WatchListener;

/// Watch state of one path
#[derive(Clone)]
pub enum Registration {
    None,
    Active(Arc<dyn NodeEventHandler>, WatchKind),
}

impl Registration {
    pub fn is_active(&self) -> bool {
        matches!(self, Registration::Active(..))
    }

    /// Whether this registration holds exactly `handler`.
    pub fn holds(
        &self,
        handler: &Arc<dyn NodeEventHandler>,
    ) -> bool {
        match self {
            Registration::Active(current, _) => Arc::ptr_eq(current, handler),
            Registration::None => false,
        }
    }

    pub fn watch(&self) -> Option<WatchKind> {
        match self {
            Registration::Active(_, watch) => Some(*watch),
            Registration::None => None,
        }
    }
}

impl fmt::Debug for Registration {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Registration::None => f.write_str("None"),
            Registration::Active(_, watch) => write!(f, "Active({watch:?})"),
        }
    }
}

struct Armed {
    handler: Arc<dyn NodeEventHandler>,
    watch: WatchKind,
}

impl From<Armed> for Registration {
    fn from(armed: Armed) -> Self {
        Registration::Active(armed.handler, armed.watch)
    }
}

/// Path-keyed registry of node event handlers, at most one per path
///
/// Every mutation is an explicit transition returning the registration it
/// replaced, so callers can audit or roll back re-arm races. A registration
/// remembers which watch armed it and is only consumed by events that watch
/// delivers.
#[derive(Default)]
pub struct WatchRegistry {
    handlers: DashMap<String, Armed>,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None | Active(old) -> Active(handler)`; returns the previous state.
    pub fn install(
        &self,
        path: &str,
        handler: Arc<dyn NodeEventHandler>,
        watch: WatchKind,
    ) -> Registration {
        let previous = self.handlers.insert(path.to_string(), Armed { handler, watch });
        trace!(path, ?watch, replaced = previous.is_some(), "Watch registration installed");
        previous.map_or(Registration::None, Registration::from)
    }

    /// `Active(_) -> None`; returns the previous state.
    pub fn remove(
        &self,
        path: &str,
    ) -> Registration {
        self.handlers
            .remove(path)
            .map_or(Registration::None, |(_, armed)| armed.into())
    }

    /// Puts `previous` back if `installed` is still the current registration.
    ///
    /// Used when the watched read that armed `installed` failed.
    pub fn rollback(
        &self,
        path: &str,
        installed: &Arc<dyn NodeEventHandler>,
        previous: Registration,
    ) {
        match previous {
            Registration::Active(handler, watch) => {
                if let Some(mut current) = self.handlers.get_mut(path) {
                    if Arc::ptr_eq(&current.handler, installed) {
                        *current = Armed { handler, watch };
                    }
                }
            }
            Registration::None => {
                self.handlers
                    .remove_if(path, |_, current| Arc::ptr_eq(&current.handler, installed));
            }
        }
    }

    pub fn get(
        &self,
        path: &str,
    ) -> Registration {
        self.handlers.get(path).map_or(Registration::None, |entry| {
            Registration::Active(entry.handler.clone(), entry.watch)
        })
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn clear(&self) {
        self.handlers.clear();
    }

    /// Consumes the registration for `path` and runs its handler.
    ///
    /// An event the registration's watch does not deliver (a stale watch of
    /// the other kind) leaves it in place. A panicking handler is logged and
    /// swallowed so the dispatcher keeps delivering. Returns whether a
    /// handler ran.
    pub fn dispatch(
        &self,
        path: &str,
        kind: NodeEventKind,
    ) -> bool {
        let Some((_, armed)) = self.handlers.remove_if(path, |_, armed| armed.watch.fires_on(kind)) else {
            trace!(path, ?kind, "Watch fired without matching registration");
            return false;
        };

        debug!(path, ?kind, "Dispatching node event");
        let handler = armed.handler;
        let outcome = catch_unwind(AssertUnwindSafe(|| match kind {
            NodeEventKind::Created => handler.on_node_created(path),
            NodeEventKind::Changed => handler.on_node_changed(path),
            NodeEventKind::Deleted => handler.on_node_deleted(path),
            NodeEventKind::ChildrenChanged => handler.on_children_changed(path),
        }));
        if outcome.is_err() {
            error!(path, ?kind, "Node event handler panicked");
        }
        true
    }
}

impl WatchListener for WatchRegistry {
    fn on_watch_fired(
        &self,
        path: &str,
        kind: NodeEventKind,
    ) {
        self.dispatch(path, kind);
    }

    fn on_session_ended(&self) {
        let dropped = self.len();
        self.clear();
        debug!(dropped, "Watch registrations dropped with session");
    }
}
