//! In-process ensemble
//!
//! [`MemoryEnsemble`] implements [`CoordinationTransport`] without sockets so
//! the session and node managers can run end-to-end inside one process. It
//! keeps the cluster-side invariants the client relies on:
//!
//! - hierarchical tree rooted at `/`, parents must exist, ephemeral nodes
//!   cannot have children
//! - ephemeral nodes vanish when their owning session closes or expires
//! - sequential suffixes are 10-digit, zero padded and strictly increasing
//!   per parent
//! - watches are one-shot and deduplicated per session and path
//!
//! Fault injection (`expire_session`, `drop_connection`, `pause`, ...) lets
//! tests drive the state transitions a real ensemble produces.
//!
//! Requests execute on the calling thread. Watch events are posted to the
//! affected sessions' sinks before the completion runs, so a client observes
//! a watch event before the reply of the request that triggered it.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Weak;

use parking_lot::Mutex;
use tracing::debug;
use tracing::info;
use tracing::trace;

use super::Completion;
use super::ConnectRequest;
use super::CoordinationTransport;
use super::EventSink;
use super::ReplyError;
use super::TransportEvent;
use super::TransportHandle;
use crate::utils::path::child_path;
use crate::utils::path::node_name;
use crate::utils::path::parent_path;
use crate::NodeEventKind;
use crate::NodeType;
use crate::Result;
use crate::SessionState;

type Reply<T> = std::result::Result<T, ReplyError>;

/// A request parked while the ensemble is paused.
/// Receives `None` to run, or the error to fail with.
type Stalled = Box<dyn FnOnce(Option<ReplyError>) + Send>;

#[derive(Debug, Default)]
struct ZNode {
    data: Vec<u8>,
    ephemeral_owner: Option<i64>,
    children: BTreeSet<String>,
    next_sequence: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    /// No reachable server yet
    Waiting,
    Connected,
    Disconnected,
    Expired,
}

struct SessionRecord {
    events: EventSink,
    candidates: Vec<String>,
    host: Option<String>,
    link: Link,
    data_watches: HashSet<String>,
    exist_watches: HashSet<String>,
    child_watches: HashSet<String>,
}

impl SessionRecord {
    fn watch_count(&self) -> usize {
        self.data_watches.len() + self.exist_watches.len() + self.child_watches.len()
    }
}

/// Events collected under the ensemble lock and delivered after release.
#[derive(Default)]
struct Outbox {
    events: Vec<(EventSink, TransportEvent)>,
}

impl Outbox {
    fn push(
        &mut self,
        sink: &EventSink,
        event: TransportEvent,
    ) {
        self.events.push((sink.clone(), event));
    }

    fn deliver(self) {
        for (sink, event) in self.events {
            sink.post(event);
        }
    }
}

struct EnsembleState {
    servers: BTreeSet<String>,
    nodes: BTreeMap<String, ZNode>,
    sessions: HashMap<i64, SessionRecord>,
    next_session_id: i64,
    paused: bool,
    stalled: Vec<(i64, Stalled)>,
}

impl EnsembleState {
    fn new(servers: BTreeSet<String>) -> Self {
        let mut nodes = BTreeMap::new();
        let mut root = ZNode::default();
        root.children.insert("zookeeper".to_string());
        nodes.insert("/".to_string(), root);
        nodes.insert("/zookeeper".to_string(), ZNode::default());

        Self {
            servers,
            nodes,
            sessions: HashMap::new(),
            next_session_id: 1,
            paused: false,
            stalled: Vec::new(),
        }
    }

    fn check_session(
        &self,
        session_id: i64,
    ) -> Reply<()> {
        match self.sessions.get(&session_id).map(|record| record.link) {
            Some(Link::Connected) => Ok(()),
            Some(Link::Expired) => Err(ReplyError::SessionExpired),
            Some(Link::Waiting) | Some(Link::Disconnected) => Err(ReplyError::ConnectionLoss),
            None => Err(ReplyError::Closing),
        }
    }

    /// Fires and disarms the watches a change at `path` triggers.
    fn trigger(
        &mut self,
        path: &str,
        kind: NodeEventKind,
        outbox: &mut Outbox,
    ) {
        for record in self.sessions.values_mut() {
            let hit = match kind {
                NodeEventKind::Created | NodeEventKind::Changed => {
                    record.data_watches.remove(path) | record.exist_watches.remove(path)
                }
                NodeEventKind::Deleted => {
                    record.data_watches.remove(path)
                        | record.exist_watches.remove(path)
                        | record.child_watches.remove(path)
                }
                NodeEventKind::ChildrenChanged => record.child_watches.remove(path),
            };
            if hit && record.link != Link::Expired {
                outbox.push(
                    &record.events,
                    TransportEvent::WatchFired {
                        path: path.to_string(),
                        kind,
                    },
                );
            }
        }
    }

    fn get(
        &mut self,
        session_id: i64,
        path: &str,
        watch: bool,
    ) -> Reply<Vec<u8>> {
        let data = self.nodes.get(path).ok_or(ReplyError::NoNode)?.data.clone();
        if watch {
            self.arm(session_id, |record| record.data_watches.insert(path.to_string()));
        }
        Ok(data)
    }

    fn get_children(
        &mut self,
        session_id: i64,
        path: &str,
        watch: bool,
    ) -> Reply<Vec<String>> {
        let children = self
            .nodes
            .get(path)
            .ok_or(ReplyError::NoNode)?
            .children
            .iter()
            .cloned()
            .collect();
        if watch {
            self.arm(session_id, |record| record.child_watches.insert(path.to_string()));
        }
        Ok(children)
    }

    fn exists(
        &mut self,
        session_id: i64,
        path: &str,
        watch: bool,
    ) -> Reply<bool> {
        let found = self.nodes.contains_key(path);
        if watch {
            if found {
                self.arm(session_id, |record| record.data_watches.insert(path.to_string()));
            } else {
                self.arm(session_id, |record| record.exist_watches.insert(path.to_string()));
            }
        }
        Ok(found)
    }

    fn create(
        &mut self,
        session_id: i64,
        path: &str,
        data: &[u8],
        node_type: NodeType,
        outbox: &mut Outbox,
    ) -> Reply<String> {
        let parent = parent_path(path).ok_or(ReplyError::BadArguments)?.to_string();
        let parent_node = self.nodes.get_mut(&parent).ok_or(ReplyError::NoNode)?;
        if parent_node.ephemeral_owner.is_some() {
            return Err(ReplyError::NoChildrenForEphemerals);
        }

        let name = if node_type.is_sequential() {
            format!("{}{:010}", node_name(path), parent_node.next_sequence)
        } else {
            node_name(path).to_string()
        };
        let created = child_path(&parent, &name);
        if parent_node.children.contains(&name) {
            return Err(ReplyError::NodeExists);
        }

        parent_node.next_sequence += 1;
        parent_node.children.insert(name);
        self.nodes.insert(
            created.clone(),
            ZNode {
                data: data.to_vec(),
                ephemeral_owner: node_type.is_ephemeral().then_some(session_id),
                ..Default::default()
            },
        );

        self.trigger(&created, NodeEventKind::Created, outbox);
        self.trigger(&parent, NodeEventKind::ChildrenChanged, outbox);
        Ok(created)
    }

    fn set_data(
        &mut self,
        path: &str,
        data: &[u8],
        outbox: &mut Outbox,
    ) -> Reply<()> {
        let node = self.nodes.get_mut(path).ok_or(ReplyError::NoNode)?;
        node.data = data.to_vec();
        self.trigger(path, NodeEventKind::Changed, outbox);
        Ok(())
    }

    fn delete(
        &mut self,
        path: &str,
        outbox: &mut Outbox,
    ) -> Reply<()> {
        let parent = parent_path(path).ok_or(ReplyError::BadArguments)?.to_string();
        let node = self.nodes.get(path).ok_or(ReplyError::NoNode)?;
        if !node.children.is_empty() {
            return Err(ReplyError::NotEmpty);
        }

        self.nodes.remove(path);
        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            parent_node.children.remove(node_name(path));
        }

        self.trigger(path, NodeEventKind::Deleted, outbox);
        self.trigger(&parent, NodeEventKind::ChildrenChanged, outbox);
        Ok(())
    }

    fn remove_ephemerals(
        &mut self,
        session_id: i64,
        outbox: &mut Outbox,
    ) -> usize {
        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.ephemeral_owner == Some(session_id))
            .map(|(path, _)| path.clone())
            .collect();
        for path in &owned {
            // ephemerals never have children, so this cannot fail
            let _ = self.delete(path, outbox);
        }
        owned.len()
    }

    fn take_stalled(
        &mut self,
        session_id: i64,
    ) -> Vec<Stalled> {
        let (matching, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.stalled)
            .into_iter()
            .partition(|(id, _)| *id == session_id);
        self.stalled = rest;
        matching.into_iter().map(|(_, request)| request).collect()
    }

    fn arm(
        &mut self,
        session_id: i64,
        insert: impl FnOnce(&mut SessionRecord) -> bool,
    ) {
        if let Some(record) = self.sessions.get_mut(&session_id) {
            insert(record);
        }
    }
}

/// Ensemble of coordination servers living in this process
///
/// Cloning yields another handle to the same ensemble.
#[derive(Clone)]
pub struct MemoryEnsemble {
    state: Arc<Mutex<EnsembleState>>,
}

impl MemoryEnsemble {
    /// Creates an ensemble serving the given `host:port` names.
    pub fn new<I, S>(servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let servers = servers.into_iter().map(Into::into).collect();
        Self {
            state: Arc::new(Mutex::new(EnsembleState::new(servers))),
        }
    }

    /// Brings a server online and connects sessions that were waiting for it.
    pub fn start_server(
        &self,
        host: &str,
    ) {
        let mut outbox = Outbox::default();
        {
            let mut state = self.state.lock();
            state.servers.insert(host.to_string());
            for record in state.sessions.values_mut() {
                if record.link == Link::Waiting && record.candidates.iter().any(|candidate| candidate == host) {
                    record.link = Link::Connected;
                    record.host = Some(host.to_string());
                    outbox.push(
                        &record.events,
                        TransportEvent::StateChanged {
                            state: SessionState::Connected,
                            host: host.to_string(),
                        },
                    );
                }
            }
        }
        info!(host, "Server started");
        outbox.deliver();
    }

    /// Invalidates a session the way the ensemble does after missed heartbeats.
    pub fn expire_session(
        &self,
        session_id: i64,
    ) {
        let mut outbox = Outbox::default();
        let stalled = {
            let mut state = self.state.lock();
            let Some(record) = state.sessions.get_mut(&session_id) else {
                return;
            };
            record.link = Link::Expired;
            record.data_watches.clear();
            record.exist_watches.clear();
            record.child_watches.clear();
            let host = record.host.clone().unwrap_or_default();
            let events = record.events.clone();

            let removed = state.remove_ephemerals(session_id, &mut outbox);
            debug!(session_id, removed, "Session expired, ephemeral nodes removed");

            outbox.push(
                &events,
                TransportEvent::StateChanged {
                    state: SessionState::Expired,
                    host,
                },
            );
            state.take_stalled(session_id)
        };
        outbox.deliver();
        for request in stalled {
            request(Some(ReplyError::SessionExpired));
        }
    }

    /// Severs the connection of a live session; it reports `Connecting`.
    pub fn drop_connection(
        &self,
        session_id: i64,
    ) {
        let mut outbox = Outbox::default();
        let stalled = {
            let mut state = self.state.lock();
            let Some(record) = state.sessions.get_mut(&session_id) else {
                return;
            };
            if record.link != Link::Connected {
                return;
            }
            record.link = Link::Disconnected;
            outbox.push(
                &record.events,
                TransportEvent::StateChanged {
                    state: SessionState::Connecting,
                    host: record.host.clone().unwrap_or_default(),
                },
            );
            state.take_stalled(session_id)
        };
        outbox.deliver();
        for request in stalled {
            request(Some(ReplyError::ConnectionLoss));
        }
    }

    /// Reconnects a session severed by [`drop_connection`](Self::drop_connection).
    pub fn restore_connection(
        &self,
        session_id: i64,
    ) {
        let mut outbox = Outbox::default();
        {
            let mut state = self.state.lock();
            let Some(record) = state.sessions.get_mut(&session_id) else {
                return;
            };
            if record.link != Link::Disconnected {
                return;
            }
            record.link = Link::Connected;
            outbox.push(
                &record.events,
                TransportEvent::StateChanged {
                    state: SessionState::Connected,
                    host: record.host.clone().unwrap_or_default(),
                },
            );
        }
        outbox.deliver();
    }

    /// Parks every subsequent request until [`resume`](Self::resume).
    pub fn pause(&self) {
        self.state.lock().paused = true;
    }

    /// Runs the requests parked since [`pause`](Self::pause).
    pub fn resume(&self) {
        let stalled = {
            let mut state = self.state.lock();
            state.paused = false;
            std::mem::take(&mut state.stalled)
        };
        for (_, request) in stalled {
            request(None);
        }
    }

    pub fn contains(
        &self,
        path: &str,
    ) -> bool {
        self.state.lock().nodes.contains_key(path)
    }

    pub fn data(
        &self,
        path: &str,
    ) -> Option<Vec<u8>> {
        self.state.lock().nodes.get(path).map(|node| node.data.clone())
    }

    /// Ids of sessions that are neither closed nor expired.
    pub fn session_ids(&self) -> Vec<i64> {
        let state = self.state.lock();
        let mut ids: Vec<i64> = state
            .sessions
            .iter()
            .filter(|(_, record)| record.link != Link::Expired)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Number of watches currently armed for a session.
    pub fn watch_count(
        &self,
        session_id: i64,
    ) -> usize {
        self.state
            .lock()
            .sessions
            .get(&session_id)
            .map(SessionRecord::watch_count)
            .unwrap_or(0)
    }

    fn close_session(
        &self,
        session_id: i64,
    ) {
        let mut outbox = Outbox::default();
        let stalled = {
            let mut state = self.state.lock();
            if state.sessions.remove(&session_id).is_none() {
                return;
            }
            let removed = state.remove_ephemerals(session_id, &mut outbox);
            debug!(session_id, removed, "Session closed, ephemeral nodes removed");
            state.take_stalled(session_id)
        };
        outbox.deliver();
        for request in stalled {
            request(Some(ReplyError::Closing));
        }
    }

    /// Runs `op` against the tree, or parks it while paused.
    fn submit<T, F>(
        &self,
        session_id: i64,
        op: F,
        done: Completion<T>,
    ) where
        T: Send + 'static,
        F: FnOnce(&mut EnsembleState, &mut Outbox) -> Reply<T> + Send + 'static,
    {
        let mut state = self.state.lock();
        if state.paused {
            trace!(session_id, "Request parked");
            let ensemble: Weak<Mutex<EnsembleState>> = Arc::downgrade(&self.state);
            state.stalled.push((
                session_id,
                Box::new(move |failure| match (failure, ensemble.upgrade()) {
                    (Some(e), _) => done(Err(e)),
                    (None, Some(state)) => MemoryEnsemble { state }.submit(session_id, op, done),
                    (None, None) => done(Err(ReplyError::ConnectionLoss)),
                }),
            ));
            return;
        }

        let mut outbox = Outbox::default();
        let result = match state.check_session(session_id) {
            Ok(()) => op(&mut *state, &mut outbox),
            Err(e) => Err(e),
        };
        drop(state);

        outbox.deliver();
        done(result);
    }
}

impl CoordinationTransport for MemoryEnsemble {
    fn connect(
        &self,
        request: ConnectRequest,
        events: EventSink,
    ) -> Result<Arc<dyn TransportHandle>> {
        let session_id = {
            let mut state = self.state.lock();
            let session_id = state.next_session_id;
            state.next_session_id += 1;

            let host = request
                .hosts
                .iter()
                .find(|candidate| state.servers.contains(*candidate))
                .cloned();
            match &host {
                Some(host) => {
                    debug!(session_id, host = %host, "Session connected");
                    events.post(TransportEvent::StateChanged {
                        state: SessionState::Connected,
                        host: host.clone(),
                    });
                }
                None => debug!(session_id, hosts = ?request.hosts, "No reachable server, session waiting"),
            }

            state.sessions.insert(
                session_id,
                SessionRecord {
                    events,
                    candidates: request.hosts,
                    link: if host.is_some() { Link::Connected } else { Link::Waiting },
                    host,
                    data_watches: HashSet::new(),
                    exist_watches: HashSet::new(),
                    child_watches: HashSet::new(),
                },
            );
            session_id
        };

        Ok(Arc::new(MemorySession {
            session_id,
            ensemble: self.clone(),
        }))
    }
}

/// Session handle issued by [`MemoryEnsemble`]
pub struct MemorySession {
    session_id: i64,
    ensemble: MemoryEnsemble,
}

impl TransportHandle for MemorySession {
    fn session_id(&self) -> i64 {
        self.session_id
    }

    fn get(
        &self,
        path: &str,
        watch: bool,
        done: Completion<Vec<u8>>,
    ) {
        let id = self.session_id;
        let path = path.to_string();
        self.ensemble
            .submit(id, move |state, _| state.get(id, &path, watch), done);
    }

    fn get_children(
        &self,
        path: &str,
        watch: bool,
        done: Completion<Vec<String>>,
    ) {
        let id = self.session_id;
        let path = path.to_string();
        self.ensemble
            .submit(id, move |state, _| state.get_children(id, &path, watch), done);
    }

    fn exists(
        &self,
        path: &str,
        watch: bool,
        done: Completion<bool>,
    ) {
        let id = self.session_id;
        let path = path.to_string();
        self.ensemble
            .submit(id, move |state, _| state.exists(id, &path, watch), done);
    }

    fn create(
        &self,
        path: &str,
        data: &[u8],
        node_type: NodeType,
        done: Completion<String>,
    ) {
        let id = self.session_id;
        let path = path.to_string();
        let data = data.to_vec();
        self.ensemble.submit(
            id,
            move |state, outbox| state.create(id, &path, &data, node_type, outbox),
            done,
        );
    }

    fn set_data(
        &self,
        path: &str,
        data: &[u8],
        done: Completion<()>,
    ) {
        let path = path.to_string();
        let data = data.to_vec();
        self.ensemble.submit(
            self.session_id,
            move |state, outbox| state.set_data(&path, &data, outbox),
            done,
        );
    }

    fn delete(
        &self,
        path: &str,
        done: Completion<()>,
    ) {
        let path = path.to_string();
        self.ensemble
            .submit(self.session_id, move |state, outbox| state.delete(&path, outbox), done);
    }

    fn close(&self) {
        self.ensemble.close_session(self.session_id);
    }
}
