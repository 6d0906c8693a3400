#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;
use crossbeam_channel::Sender;
use zk_coordinator::transport::memory::MemoryEnsemble;
use zk_coordinator::Client;
use zk_coordinator::NodeEventHandler;
use zk_coordinator::NodeEventKind;
use zk_coordinator::SessionEventHandler;
use zk_coordinator::SessionState;

pub const HOST: &str = "127.0.0.1:2181";

/// How long a test waits for an event that must arrive
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a test waits to conclude an event will not arrive
pub const QUIET_PERIOD: Duration = Duration::from_millis(200);

pub fn ensemble() -> MemoryEnsemble {
    MemoryEnsemble::new([HOST])
}

pub fn client(ensemble: &MemoryEnsemble) -> Client {
    Client::builder(HOST)
        .connection_timeout(Duration::from_secs(2))
        .deterministic_connection_order(true)
        .build(Arc::new(ensemble.clone()))
        .expect("build client")
}

/// A client whose session is already Connected.
pub fn connected_client(ensemble: &MemoryEnsemble) -> Client {
    let client = client(ensemble);
    client.initialize().expect("initialize");
    client.wait_until_connected().expect("connect");
    client
}

pub fn session_id(client: &Client) -> i64 {
    client.session().session_id().expect("session is open")
}

/// Forwards every node event into a channel
pub struct NodeEvents {
    tx: Sender<(NodeEventKind, String)>,
}

impl NodeEvents {
    pub fn new() -> (Arc<Self>, Receiver<(NodeEventKind, String)>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Arc::new(Self { tx }), rx)
    }

    fn send(
        &self,
        kind: NodeEventKind,
        path: &str,
    ) {
        let _ = self.tx.send((kind, path.to_string()));
    }
}

impl NodeEventHandler for NodeEvents {
    fn on_node_created(
        &self,
        path: &str,
    ) {
        self.send(NodeEventKind::Created, path);
    }

    fn on_node_changed(
        &self,
        path: &str,
    ) {
        self.send(NodeEventKind::Changed, path);
    }

    fn on_node_deleted(
        &self,
        path: &str,
    ) {
        self.send(NodeEventKind::Deleted, path);
    }

    fn on_children_changed(
        &self,
        path: &str,
    ) {
        self.send(NodeEventKind::ChildrenChanged, path);
    }
}

/// Forwards every session transition into a channel
pub struct SessionEvents {
    tx: Sender<(SessionState, String)>,
}

impl SessionEvents {
    pub fn new() -> (Arc<Self>, Receiver<(SessionState, String)>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Arc::new(Self { tx }), rx)
    }

    fn send(
        &self,
        state: SessionState,
        host: &str,
    ) {
        let _ = self.tx.send((state, host.to_string()));
    }
}

impl SessionEventHandler for SessionEvents {
    fn on_connected(
        &self,
        host: &str,
    ) {
        self.send(SessionState::Connected, host);
    }

    fn on_connecting(
        &self,
        host: &str,
    ) {
        self.send(SessionState::Connecting, host);
    }

    fn on_disconnected(
        &self,
        host: &str,
    ) {
        self.send(SessionState::Disconnected, host);
    }

    fn on_expired(
        &self,
        host: &str,
    ) {
        self.send(SessionState::Expired, host);
    }
}

/// Waits for the next state reported to a [`SessionEvents`] handler.
pub fn next_state(events: &Receiver<(SessionState, String)>) -> SessionState {
    events.recv_timeout(EVENT_TIMEOUT).expect("session event").0
}
