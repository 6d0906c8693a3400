use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use tracing::trace;

use super::NodeEventHandler;
use super::NodeEventKind;
use super::NodeType;
use super::Registration;
use super::WatchKind;
use super::WatchRegistry;
use crate::transport::Completion;
use crate::transport::TransportHandle;
use crate::utils::path::validate_path;
use crate::utils::scoped_timer::ScopedTimer;
use crate::Error;
use crate::NodeError;
use crate::Result;
use crate::SessionManager;

/// Blocking node operations over the session's transport handle.
///
/// Every call fails with `SessionError::NotConnected` unless the session is
/// Connected, and waits at most `request_timeout` for its reply. Nothing is
/// retried here.
pub struct NodeManager {
    session: Arc<SessionManager>,
    watches: Arc<WatchRegistry>,
    request_timeout: Duration,
}

impl NodeManager {
    /// Creates the manager and routes the session's watch fires to its registry.
    pub fn new(
        session: Arc<SessionManager>,
        request_timeout: Duration,
    ) -> Self {
        let watches = Arc::new(WatchRegistry::new());
        session.attach_watch_listener(watches.clone());

        Self {
            session,
            watches,
            request_timeout,
        }
    }

    /// Issues one request and blocks on its pending slot.
    fn call<T, F>(
        &self,
        operation: &'static str,
        path: &str,
        issue: F,
    ) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn TransportHandle, Completion<T>),
    {
        let session = self.session.connected_session()?;
        let _timer = ScopedTimer::new(operation);

        let (id, request) = session.pending.register::<T>();
        let slot = request.clone();
        let reply_path = path.to_string();
        issue(
            session.handle.as_ref(),
            Box::new(move |reply| {
                if !slot.complete(reply.map_err(|e| e.into_error(&reply_path))) {
                    trace!(path = %reply_path, "Late reply dropped");
                }
            }),
        );

        let result = request.wait(operation, self.request_timeout);
        session.pending.remove(id);

        if let Err(e) = &result {
            debug!(operation, path, "Request failed: {}", e);
        }
        result
    }

    pub fn get_node(
        &self,
        path: &str,
    ) -> Result<Vec<u8>> {
        validate_path(path, false)?;
        self.call("get_node", path, |handle, done| handle.get(path, false, done))
    }

    /// Reads the payload and arms a one-shot watch delivered to `handler`.
    ///
    /// Replaces any registration already held for `path`.
    pub fn get_node_with_watch(
        &self,
        path: &str,
        handler: Arc<dyn NodeEventHandler>,
    ) -> Result<Vec<u8>> {
        validate_path(path, false)?;
        self.watched(path, handler, WatchKind::Data, |manager| {
            manager.call("get_node", path, |handle, done| handle.get(path, true, done))
        })
    }

    /// Names of the direct children of `path`, ordered by name.
    pub fn get_node_children(
        &self,
        path: &str,
    ) -> Result<Vec<String>> {
        validate_path(path, false)?;
        let mut children = self.call("get_node_children", path, |handle, done| {
            handle.get_children(path, false, done)
        })?;
        children.sort();
        Ok(children)
    }

    /// Like [`get_node_children`](Self::get_node_children), and arms a watch
    /// that fires once on the next child added or removed under `path`.
    pub fn get_node_children_with_watch(
        &self,
        path: &str,
        handler: Arc<dyn NodeEventHandler>,
    ) -> Result<Vec<String>> {
        validate_path(path, false)?;
        let mut children = self.watched(path, handler, WatchKind::Children, |manager| {
            manager.call("get_node_children", path, |handle, done| {
                handle.get_children(path, true, done)
            })
        })?;
        children.sort();
        Ok(children)
    }

    /// Creates `path`. Returns `false` if a non-sequential node already exists.
    pub fn create_node(
        &self,
        path: &str,
        data: &[u8],
        node_type: NodeType,
    ) -> Result<bool> {
        validate_path(path, node_type.is_sequential())?;
        let outcome = self.call("create_node", path, |handle, done| {
            handle.create(path, data, node_type, done)
        });

        match outcome {
            Ok(created) => {
                debug!(path = %created, ?node_type, "Node created");
                Ok(true)
            }
            Err(Error::Node(NodeError::NodeExists { .. })) if !node_type.is_sequential() => {
                debug!(path, "Node already exists");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Creates a node under a server-assigned suffix and returns its full path.
    pub fn create_sequential_node(
        &self,
        path: &str,
        data: &[u8],
        node_type: NodeType,
    ) -> Result<String> {
        validate_path(path, true)?;
        let node_type = node_type.sequential();
        let created = self.call("create_sequential_node", path, |handle, done| {
            handle.create(path, data, node_type, done)
        })?;
        debug!(base = path, path = %created, "Sequential node created");
        Ok(created)
    }

    /// Overwrites the payload regardless of its version.
    pub fn change_node(
        &self,
        path: &str,
        data: &[u8],
    ) -> Result<()> {
        validate_path(path, false)?;
        self.call("change_node", path, |handle, done| handle.set_data(path, data, done))
    }

    pub fn delete_node(
        &self,
        path: &str,
    ) -> Result<()> {
        validate_path(path, false)?;
        self.call("delete_node", path, |handle, done| handle.delete(path, done))
    }

    pub fn node_exists(
        &self,
        path: &str,
    ) -> Result<bool> {
        validate_path(path, false)?;
        self.call("node_exists", path, |handle, done| handle.exists(path, false, done))
    }

    /// Registers `handler` for `path` without fetching data.
    ///
    /// Arms an existence watch at the cluster, so a node that does not exist
    /// yet reports `on_node_created`.
    pub fn add_event_handler(
        &self,
        path: &str,
        handler: Arc<dyn NodeEventHandler>,
    ) -> Result<()> {
        validate_path(path, false)?;
        let exists = self.watched(path, handler, WatchKind::Data, |manager| {
            manager.call("add_event_handler", path, |handle, done| handle.exists(path, true, done))
        })?;
        debug!(path, exists, "Node event handler added");
        Ok(())
    }

    /// Drops the registration for `path`. Returns whether one was held.
    ///
    /// The cluster-side watch stays armed; when it fires it reaches only a
    /// later registration armed by the same kind of watch.
    pub fn remove_event_handler(
        &self,
        path: &str,
    ) -> bool {
        let removed = self.watches.remove(path).is_active();
        debug!(path, removed, "Node event handler removed");
        removed
    }

    /// Delivers a fired watch: a registration armed by a matching watch is
    /// consumed, then its handler runs.
    ///
    /// Normally driven by the session's event dispatcher.
    pub fn on_watch_fired(
        &self,
        path: &str,
        kind: NodeEventKind,
    ) {
        self.watches.dispatch(path, kind);
    }

    pub fn registration(
        &self,
        path: &str,
    ) -> Registration {
        self.watches.get(path)
    }

    /// Number of paths holding a registration.
    pub fn watch_count(&self) -> usize {
        self.watches.len()
    }

    /// Installs `handler` before `read` runs and restores the previous
    /// registration if the read fails.
    fn watched<T>(
        &self,
        path: &str,
        handler: Arc<dyn NodeEventHandler>,
        watch: WatchKind,
        read: impl FnOnce(&Self) -> Result<T>,
    ) -> Result<T> {
        let previous = self.watches.install(path, handler.clone(), watch);
        let result = read(self);
        if result.is_err() {
            trace!(path, ?previous, "Watched read failed, rolling back registration");
            self.watches.rollback(path, &handler, previous);
        }
        result
    }
}
