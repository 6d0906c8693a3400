mod common;

use std::sync::Arc;
use std::sync::Weak;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use common::connected_client;
use common::ensemble;
use common::session_id;
use common::NodeEvents;
use common::EVENT_TIMEOUT;
use common::QUIET_PERIOD;
use crossbeam_channel::Sender;
use zk_coordinator::transport::memory::MemoryEnsemble;
use zk_coordinator::Client;
use zk_coordinator::Error;
use zk_coordinator::NodeEventHandler;
use zk_coordinator::NodeEventKind;
use zk_coordinator::NodeType;
use zk_coordinator::Result;
use zk_coordinator::SessionError;
use zk_coordinator::SessionState;

struct Exploding;

impl NodeEventHandler for Exploding {
    fn on_node_changed(
        &self,
        _path: &str,
    ) {
        panic!("node handler failure");
    }
}

#[derive(Clone, Copy)]
enum Rearm {
    Read,
    Handler,
}

/// Re-registers itself from `on_node_changed` for continued notification.
struct Rearming {
    me: Weak<Rearming>,
    client: Weak<Client>,
    rearm: Rearm,
    tx: Sender<String>,
}

impl Rearming {
    fn new(
        client: &Arc<Client>,
        rearm: Rearm,
        tx: Sender<String>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            client: Arc::downgrade(client),
            rearm,
            tx,
        })
    }
}

impl NodeEventHandler for Rearming {
    fn on_node_changed(
        &self,
        path: &str,
    ) {
        let (Some(client), Some(me)) = (self.client.upgrade(), self.me.upgrade()) else {
            return;
        };
        let rearmed = match self.rearm {
            Rearm::Read => client.get_node_with_watch(path, me).map(|_| ()),
            Rearm::Handler => client.add_event_handler(path, me),
        };
        rearmed.unwrap();
        let _ = self.tx.send(path.to_string());
    }
}

/// Stalls the ensemble, then blocks re-arming from inside the callback.
struct StalledRearm {
    ensemble: MemoryEnsemble,
    client: Weak<Client>,
    tx: Sender<Result<Vec<u8>>>,
}

impl NodeEventHandler for StalledRearm {
    fn on_node_changed(
        &self,
        path: &str,
    ) {
        let Some(client) = self.client.upgrade() else {
            return;
        };
        self.ensemble.pause();
        let (handler, _events) = NodeEvents::new();
        let rearmed = client.get_node_with_watch(path, handler);
        let _ = self.tx.send(rearmed);
    }
}

#[test]
fn test_data_watch_fires_at_most_once_per_arm() {
    let ensemble = ensemble();
    let client = connected_client(&ensemble);
    client.create_node("/w", b"v0", NodeType::Persistent).unwrap();
    let (handler, events) = NodeEvents::new();

    assert_eq!(client.get_node_with_watch("/w", handler.clone()).unwrap(), b"v0");
    client.change_node("/w", b"v1").unwrap();
    client.change_node("/w", b"v2").unwrap();

    assert_eq!(
        events.recv_timeout(EVENT_TIMEOUT).unwrap(),
        (NodeEventKind::Changed, "/w".to_string())
    );
    assert!(events.recv_timeout(QUIET_PERIOD).is_err());

    // a fresh read re-arms
    assert_eq!(client.get_node_with_watch("/w", handler).unwrap(), b"v2");
    client.delete_node("/w").unwrap();
    assert_eq!(
        events.recv_timeout(EVENT_TIMEOUT).unwrap(),
        (NodeEventKind::Deleted, "/w".to_string())
    );
}

#[test]
fn test_removed_handler_never_fires() {
    let ensemble = ensemble();
    let client = connected_client(&ensemble);
    client.create_node("/quiet", b"", NodeType::Persistent).unwrap();
    let (handler, events) = NodeEvents::new();

    client.get_node_with_watch("/quiet", handler).unwrap();
    assert!(client.remove_event_handler("/quiet"));
    client.change_node("/quiet", b"changed").unwrap();

    assert!(events.recv_timeout(QUIET_PERIOD).is_err());
    // the fired registration is gone; removing again is not an error
    assert!(!client.remove_event_handler("/quiet"));
}

#[test]
fn test_newer_registration_replaces_older() {
    let ensemble = ensemble();
    let client = connected_client(&ensemble);
    client.create_node("/shared", b"", NodeType::Persistent).unwrap();
    let (old, old_events) = NodeEvents::new();
    let (new, new_events) = NodeEvents::new();

    client.get_node_with_watch("/shared", old).unwrap();
    client.add_event_handler("/shared", new).unwrap();
    client.change_node("/shared", b"x").unwrap();

    assert_eq!(
        new_events.recv_timeout(EVENT_TIMEOUT).unwrap(),
        (NodeEventKind::Changed, "/shared".to_string())
    );
    assert!(old_events.recv_timeout(QUIET_PERIOD).is_err());
}

#[test]
fn test_children_watch_fires_on_membership_change_only() {
    let ensemble = ensemble();
    let client = connected_client(&ensemble);
    client.create_node("/group", b"", NodeType::Persistent).unwrap();
    client.create_node("/group/a", b"", NodeType::Persistent).unwrap();
    let (handler, events) = NodeEvents::new();

    assert_eq!(client.get_node_children_with_watch("/group", handler.clone()).unwrap(), vec!["a"]);
    client.change_node("/group/a", b"payload").unwrap();
    assert!(events.recv_timeout(QUIET_PERIOD).is_err());

    client.create_node("/group/b", b"", NodeType::Ephemeral).unwrap();
    assert_eq!(
        events.recv_timeout(EVENT_TIMEOUT).unwrap(),
        (NodeEventKind::ChildrenChanged, "/group".to_string())
    );

    assert_eq!(client.get_node_children_with_watch("/group", handler).unwrap(), vec!["a", "b"]);
    client.delete_node("/group/a").unwrap();
    assert_eq!(
        events.recv_timeout(EVENT_TIMEOUT).unwrap(),
        (NodeEventKind::ChildrenChanged, "/group".to_string())
    );
}

#[test]
fn test_handler_added_before_creation_sees_created() {
    let ensemble = ensemble();
    let watcher = connected_client(&ensemble);
    let creator = connected_client(&ensemble);
    let (handler, events) = NodeEvents::new();

    watcher.add_event_handler("/election/leader", handler).unwrap();
    creator.create_node("/election", b"", NodeType::Persistent).unwrap();
    creator
        .create_node("/election/leader", b"me", NodeType::Ephemeral)
        .unwrap();

    assert_eq!(
        events.recv_timeout(EVENT_TIMEOUT).unwrap(),
        (NodeEventKind::Created, "/election/leader".to_string())
    );
    assert!(!watcher.remove_event_handler("/election/leader"));
}

#[test]
fn test_ephemeral_owner_close_notifies_watchers() {
    let ensemble = ensemble();
    let watcher = connected_client(&ensemble);
    let owner = connected_client(&ensemble);
    owner.create_node("/lease", b"", NodeType::Ephemeral).unwrap();
    let (handler, events) = NodeEvents::new();
    watcher.add_event_handler("/lease", handler).unwrap();

    owner.uninitialize();

    assert_eq!(
        events.recv_timeout(EVENT_TIMEOUT).unwrap(),
        (NodeEventKind::Deleted, "/lease".to_string())
    );
}

#[test]
fn test_panicking_handler_does_not_stop_delivery() {
    let ensemble = ensemble();
    let client = connected_client(&ensemble);
    client.create_node("/boom", b"", NodeType::Persistent).unwrap();
    client.create_node("/fine", b"", NodeType::Persistent).unwrap();
    let (handler, events) = NodeEvents::new();

    client.get_node_with_watch("/boom", Arc::new(Exploding)).unwrap();
    client.get_node_with_watch("/fine", handler).unwrap();
    client.change_node("/boom", b"x").unwrap();
    client.change_node("/fine", b"y").unwrap();

    assert_eq!(
        events.recv_timeout(EVENT_TIMEOUT).unwrap(),
        (NodeEventKind::Changed, "/fine".to_string())
    );
    assert_eq!(client.state(), SessionState::Connected);
    assert!(client.node_exists("/boom").unwrap());
}

#[test]
fn test_expiry_drops_registrations() {
    let ensemble = ensemble();
    let client = connected_client(&ensemble);
    client.create_node("/persisted", b"", NodeType::Persistent).unwrap();
    let (handler, events) = NodeEvents::new();
    client.get_node_with_watch("/persisted", handler).unwrap();
    assert_eq!(client.nodes().watch_count(), 1);

    ensemble.expire_session(session_id(&client));
    client
        .session()
        .wait_for_state(SessionState::Expired, EVENT_TIMEOUT)
        .unwrap();

    assert_eq!(client.nodes().watch_count(), 0);
    let other = connected_client(&ensemble);
    other.change_node("/persisted", b"after expiry").unwrap();
    assert!(events.recv_timeout(QUIET_PERIOD).is_err());
}

#[test]
fn test_handler_rearming_from_callback_sees_every_change() {
    for rearm in [Rearm::Read, Rearm::Handler] {
        let ensemble = ensemble();
        let client = Arc::new(connected_client(&ensemble));
        client.create_node("/feed", b"v0", NodeType::Persistent).unwrap();
        let (tx, changes) = crossbeam_channel::unbounded();

        client.get_node_with_watch("/feed", Rearming::new(&client, rearm, tx)).unwrap();

        for version in [b"v1", b"v2"] {
            client.change_node("/feed", version).unwrap();
            assert_eq!(changes.recv_timeout(EVENT_TIMEOUT).unwrap(), "/feed");
            assert!(changes.recv_timeout(QUIET_PERIOD).is_err());
        }
        assert_eq!(client.nodes().watch_count(), 1);
    }
}

#[test]
fn test_uninitialize_releases_handler_blocked_in_rearm() {
    let ensemble = ensemble();
    let client = Arc::new(connected_client(&ensemble));
    client.create_node("/w", b"", NodeType::Persistent).unwrap();
    let (tx, rearmed) = crossbeam_channel::unbounded();
    let handler = Arc::new(StalledRearm {
        ensemble: ensemble.clone(),
        client: Arc::downgrade(&client),
        tx,
    });

    client.get_node_with_watch("/w", handler).unwrap();
    client.change_node("/w", b"x").unwrap();

    let deadline = Instant::now() + EVENT_TIMEOUT;
    while client.session().pending_requests() < 1 {
        assert!(Instant::now() < deadline, "handler never blocked");
        thread::sleep(Duration::from_millis(5));
    }

    let started = Instant::now();
    client.uninitialize();

    // released by teardown, not by the 10s request timeout
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(matches!(
        rearmed.recv_timeout(EVENT_TIMEOUT).unwrap(),
        Err(Error::Session(SessionError::Closed))
    ));
    ensemble.resume();
}

#[test]
fn test_stale_children_watch_does_not_consume_data_registration() {
    let ensemble = ensemble();
    let client = connected_client(&ensemble);
    client.create_node("/p", b"", NodeType::Persistent).unwrap();
    let (children_handler, children_events) = NodeEvents::new();
    let (data_handler, data_events) = NodeEvents::new();

    client.get_node_children_with_watch("/p", children_handler).unwrap();
    client.get_node_with_watch("/p", data_handler).unwrap();

    // fires the children watch armed first; nothing holds a children registration
    client.create_node("/p/c", b"", NodeType::Persistent).unwrap();
    assert!(data_events.recv_timeout(QUIET_PERIOD).is_err());

    client.change_node("/p", b"changed").unwrap();
    assert_eq!(
        data_events.recv_timeout(EVENT_TIMEOUT).unwrap(),
        (NodeEventKind::Changed, "/p".to_string())
    );
    assert!(children_events.recv_timeout(QUIET_PERIOD).is_err());
}
