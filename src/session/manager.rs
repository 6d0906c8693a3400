use std::panic::catch_unwind;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use parking_lot::RwLock;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::dispatcher::EventDispatcher;
use super::HostList;
use super::SessionEventHandler;
use super::SessionState;
use super::StateCell;
use super::WatchListener;
use crate::pending::PendingTable;
use crate::transport::ConnectRequest;
use crate::transport::CoordinationTransport;
use crate::transport::EventSink;
use crate::transport::TransportEvent;
use crate::transport::TransportHandle;
use crate::ConfigurationError;
use crate::Error;
use crate::Result;
use crate::SessionConfig;
use crate::SessionError;

/// State shared between the manager and the session's dispatcher thread
pub(crate) struct SessionShared {
    state: StateCell,
    handler: RwLock<Option<Arc<dyn SessionEventHandler>>>,
    watch_listener: RwLock<Option<Arc<dyn WatchListener>>>,
    connected_host: Mutex<Option<String>>,
}

impl SessionShared {
    fn new() -> Self {
        Self {
            state: StateCell::new(),
            handler: RwLock::new(None),
            watch_listener: RwLock::new(None),
            connected_host: Mutex::new(None),
        }
    }

    pub(crate) fn handle_event(
        &self,
        event: TransportEvent,
        pending: &PendingTable,
    ) {
        match event {
            TransportEvent::StateChanged { state, host } => self.apply_state_change(state, &host, Some(pending)),
            TransportEvent::WatchFired { path, kind } => match self.listener() {
                Some(listener) => listener.on_watch_fired(&path, kind),
                None => trace!(path, ?kind, "Watch fired with no listener attached"),
            },
        }
    }

    /// Applies a transition reported by the transport.
    ///
    /// Locks are released before the handler runs.
    fn apply_state_change(
        &self,
        state: SessionState,
        host: &str,
        pending: Option<&PendingTable>,
    ) {
        // expiry side effects land before waiters observe Expired
        if state == SessionState::Expired {
            let released = pending.map_or(0, |pending| pending.fail_all(SessionError::Expired));
            if let Some(listener) = self.listener() {
                listener.on_session_ended();
            }
            warn!(host, released, "Session expired, a fresh initialize is required");
        }

        *self.connected_host.lock() = (state == SessionState::Connected).then(|| host.to_string());
        let previous = self.state.set(state);
        info!(?previous, ?state, host, "Session state changed");

        let handler = self.handler.read().clone();
        let Some(handler) = handler else {
            return;
        };
        let outcome = catch_unwind(AssertUnwindSafe(|| match state {
            SessionState::Connected => handler.on_connected(host),
            SessionState::Connecting => handler.on_connecting(host),
            SessionState::Disconnected => handler.on_disconnected(host),
            SessionState::Expired => handler.on_expired(host),
        }));
        if outcome.is_err() {
            error!(?state, host, "Session event handler panicked");
        }
    }

    fn listener(&self) -> Option<Arc<dyn WatchListener>> {
        self.watch_listener.read().clone()
    }
}

/// An open transport session and its outstanding requests
pub(crate) struct ActiveSession {
    pub(crate) handle: Arc<dyn TransportHandle>,
    pub(crate) pending: Arc<PendingTable>,
}

/// Owns the logical session: connect/close, the session-event handler slot
/// and the blocking wait for state transitions.
///
/// Configuration accessors read immutable settings and never lock.
pub struct SessionManager {
    config: SessionConfig,
    hosts: HostList,
    transport: Arc<dyn CoordinationTransport>,
    shared: Arc<SessionShared>,
    active: ArcSwapOption<ActiveSession>,
    /// Serializes initialize/uninitialize and owns the dispatcher thread
    lifecycle: Mutex<Option<EventDispatcher>>,
}

impl SessionManager {
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn CoordinationTransport>,
    ) -> Result<Self> {
        config.validate()?;
        let hosts = HostList::parse(&config.hosts)?;

        Ok(Self {
            config,
            hosts,
            transport,
            shared: Arc::new(SessionShared::new()),
            active: ArcSwapOption::empty(),
            lifecycle: Mutex::new(None),
        })
    }

    /// Opens the transport session without waiting for the connection.
    ///
    /// Connection progress is observed through state callbacks and
    /// [`wait_until_connected`](Self::wait_until_connected). An expired
    /// session is replaced; any other initialized session is an error.
    pub fn initialize(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();

        if let Some(active) = self.active.load_full() {
            if self.state() != SessionState::Expired {
                return Err(ConfigurationError::AlreadyInitialized.into());
            }
            info!(session_id = active.handle.session_id(), "Replacing expired session");
            self.teardown(&mut lifecycle, active, SessionError::Expired);
        }

        self.shared.state.set(SessionState::Disconnected);

        // Events queue up in the channel until the dispatcher starts, so the
        // handle is published before any handler can observe Connected.
        let (sender, receiver) = crossbeam_channel::unbounded();
        let request = ConnectRequest {
            hosts: self.hosts.ordered(self.config.deterministic_connection_order),
            connection_timeout: self.connection_timeout(),
            expiration_timeout: self.expiration_timeout(),
            deterministic_order: self.config.deterministic_connection_order,
        };
        debug!(hosts = ?request.hosts, "Opening session");

        let handle = self.transport.connect(request, EventSink::new(sender)).map_err(|e| {
            error!("Failed to open session: {}", e);
            e
        })?;
        let session_id = handle.session_id();
        let pending = Arc::new(PendingTable::new());
        self.active.store(Some(Arc::new(ActiveSession {
            handle: handle.clone(),
            pending: pending.clone(),
        })));

        match EventDispatcher::spawn(session_id, receiver, self.shared.clone(), pending) {
            Ok(dispatcher) => *lifecycle = Some(dispatcher),
            Err(e) => {
                error!(session_id, "Failed to start event dispatcher: {}", e);
                self.active.store(None);
                handle.close();
                return Err(e);
            }
        }

        info!(session_id, hosts = self.hosts.as_str(), "Session initialized");
        Ok(())
    }

    /// Closes the session and releases every blocked caller with
    /// `SessionError::Closed`. Safe to call when never initialized.
    pub fn uninitialize(&self) {
        let mut lifecycle = self.lifecycle.lock();

        match self.active.load_full() {
            Some(active) => {
                let session_id = active.handle.session_id();
                let released = self.teardown(&mut lifecycle, active, SessionError::Closed);
                info!(session_id, released, "Session uninitialized");
            }
            None => {
                self.shared.state.set(SessionState::Disconnected);
                debug!("Uninitialize without an open session");
            }
        }
    }

    fn teardown(
        &self,
        lifecycle: &mut Option<EventDispatcher>,
        active: Arc<ActiveSession>,
        error: SessionError,
    ) -> usize {
        self.active.store(None);

        // Waiters are released before the join: a handler may be blocked in a
        // request on the dispatcher thread. They see the session-level error,
        // not the transport's own failure of in-flight calls during close.
        let released = active.pending.fail_all(error);
        if let Some(dispatcher) = lifecycle.take() {
            dispatcher.stop();
        }
        active.handle.close();

        self.shared.state.set(SessionState::Disconnected);
        *self.shared.connected_host.lock() = None;
        if let Some(listener) = self.shared.listener() {
            listener.on_session_ended();
        }
        released
    }

    /// Installs the session-event handler. At most one may be registered.
    pub fn register_event_handler(
        &self,
        handler: Arc<dyn SessionEventHandler>,
    ) -> Result<()> {
        let mut slot = self.shared.handler.write();
        if slot.is_some() {
            return Err(ConfigurationError::AlreadyRegistered.into());
        }
        *slot = Some(handler);
        debug!("Session event handler registered");
        Ok(())
    }

    pub fn unregister_event_handler(&self) -> Result<()> {
        let mut slot = self.shared.handler.write();
        if slot.take().is_none() {
            return Err(ConfigurationError::NotRegistered.into());
        }
        debug!("Session event handler unregistered");
        Ok(())
    }

    /// Applies a session transition as if the transport had reported it.
    ///
    /// Normally driven by the dispatcher thread.
    pub fn on_session_state_changed(
        &self,
        state: SessionState,
        host: &str,
    ) {
        let active = self.active.load_full();
        self.shared
            .apply_state_change(state, host, active.as_deref().map(|active| active.pending.as_ref()));
    }

    /// Blocks until the session reaches `target`.
    ///
    /// Fails early with `SessionError::Expired` if the session expires first.
    pub fn wait_for_state(
        &self,
        target: SessionState,
        timeout: Duration,
    ) -> Result<()> {
        let reached = self
            .shared
            .state
            .wait_until(timeout, |state| state == target || state == SessionState::Expired);

        match reached {
            Some(state) if state == target => Ok(()),
            Some(_) => Err(SessionError::Expired.into()),
            None => {
                warn!(?target, ?timeout, state = ?self.state(), "Timed out waiting for session state");
                Err(Error::Timeout {
                    operation: "wait_for_state",
                    duration: timeout,
                })
            }
        }
    }

    /// Waits at most the connection timeout for the session to connect.
    pub fn wait_until_connected(&self) -> Result<()> {
        self.wait_for_state(SessionState::Connected, self.connection_timeout())
    }

    /// The open session if it is usable for requests.
    pub(crate) fn connected_session(&self) -> Result<Arc<ActiveSession>> {
        match self.state() {
            SessionState::Connected => self.active.load_full().ok_or_else(|| {
                SessionError::NotConnected {
                    state: SessionState::Disconnected,
                }
                .into()
            }),
            SessionState::Expired => Err(SessionError::Expired.into()),
            state => Err(SessionError::NotConnected { state }.into()),
        }
    }

    pub(crate) fn attach_watch_listener(
        &self,
        listener: Arc<dyn WatchListener>,
    ) {
        *self.shared.watch_listener.write() = Some(listener);
    }

    pub fn state(&self) -> SessionState {
        self.shared.state.get()
    }

    pub fn is_initialized(&self) -> bool {
        self.active.load().is_some()
    }

    /// Id assigned by the ensemble to the open session.
    pub fn session_id(&self) -> Option<i64> {
        self.active.load().as_ref().map(|active| active.handle.session_id())
    }

    /// Server the session is currently connected to.
    pub fn connected_host(&self) -> Option<String> {
        self.shared.connected_host.lock().clone()
    }

    /// Requests still waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        self.active.load().as_ref().map_or(0, |active| active.pending.len())
    }

    /// Connection string as configured.
    pub fn host(&self) -> &str {
        self.hosts.as_str()
    }

    pub fn host_list(&self) -> &HostList {
        &self.hosts
    }

    pub fn connection_timeout(&self) -> Duration {
        self.config.connection_timeout()
    }

    pub fn expiration_timeout(&self) -> Duration {
        self.config.expiration_timeout()
    }

    pub fn deterministic_connection_order(&self) -> bool {
        self.config.deterministic_connection_order
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if self.is_initialized() {
            self.uninitialize();
        }
    }
}
