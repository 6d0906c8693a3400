use std::sync::Arc;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use crate::pending::Cancel;
use crate::pending::PendingRequest;
use crate::pending::PendingTable;
use crate::Error;
use crate::SessionError;

#[test]
fn test_wait_returns_completed_value() {
    let request = PendingRequest::<u32>::new();
    assert!(request.complete(Ok(7)));

    let value = request.wait("get_node", Duration::from_millis(10)).unwrap();
    assert_eq!(value, 7);
}

#[test]
fn test_first_outcome_wins() {
    let request = PendingRequest::<u32>::new();
    assert!(request.complete(Ok(1)));
    assert!(!request.complete(Ok(2)));
    assert!(!request.fail(SessionError::Closed.into()));

    assert_eq!(request.wait("get_node", Duration::from_millis(10)).unwrap(), 1);
}

#[test]
fn test_wait_times_out_without_completion() {
    let request = PendingRequest::<()>::new();
    let started = Instant::now();

    let err = request.wait("delete_node", Duration::from_millis(50)).unwrap_err();

    assert!(started.elapsed() >= Duration::from_millis(50));
    match err {
        Error::Timeout { operation, duration } => {
            assert_eq!(operation, "delete_node");
            assert_eq!(duration, Duration::from_millis(50));
        }
        other => panic!("expected timeout, got {:?}", other),
    }
}

#[test]
fn test_completion_from_another_thread_wakes_waiter() {
    let request = Arc::new(PendingRequest::<String>::new());
    let completer = request.clone();

    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        completer.complete(Ok("done".to_string()));
    });

    let value = request.wait("get_node", Duration::from_secs(5)).unwrap();
    assert_eq!(value, "done");
    handle.join().unwrap();
}

#[test]
fn test_fail_all_releases_every_waiter() {
    let table = Arc::new(PendingTable::new());
    let mut waiters = Vec::new();

    for _ in 0..4 {
        let (_, request) = table.register::<Vec<u8>>();
        waiters.push(thread::spawn(move || request.wait("get_node", Duration::from_secs(10))));
    }
    assert_eq!(table.len(), 4);

    thread::sleep(Duration::from_millis(20));
    let released = table.fail_all(SessionError::Closed);
    assert_eq!(released, 4);
    assert_eq!(table.len(), 0);

    for waiter in waiters {
        let result = waiter.join().unwrap();
        assert!(matches!(result, Err(Error::Session(SessionError::Closed))));
    }
}

#[test]
fn test_fail_all_skips_resolved_requests() {
    let table = PendingTable::new();
    let (_, done) = table.register::<u8>();
    let (_, _open) = table.register::<u8>();
    done.complete(Ok(1));

    assert_eq!(table.fail_all(SessionError::Expired), 1);
}

#[test]
fn test_remove_forgets_request() {
    let table = PendingTable::new();
    let (id, _request) = table.register::<u8>();
    table.remove(id);

    assert_eq!(table.len(), 0);
    assert_eq!(table.fail_all(SessionError::Closed), 0);
}

#[test]
fn test_completion_after_timeout_is_dropped() {
    let request = PendingRequest::<u8>::new();

    assert!(request.wait("get_node", Duration::from_millis(10)).is_err());

    assert!(!request.complete(Ok(1)));
    assert!(!request.fail(SessionError::Closed.into()));
}

#[test]
fn test_register_after_fail_all_fails_immediately() {
    let table = PendingTable::new();
    table.fail_all(SessionError::Closed);

    let (_, request) = table.register::<u8>();
    let started = Instant::now();

    assert!(matches!(
        request.wait("get_node", Duration::from_secs(10)),
        Err(Error::Session(SessionError::Closed))
    ));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(table.len(), 0);
}

#[test]
fn test_unbounded_timeout_waits_for_completion() {
    let request = Arc::new(PendingRequest::<u8>::new());
    let completer = request.clone();

    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        completer.complete(Ok(3));
    });

    assert_eq!(request.wait("get_node", Duration::MAX).unwrap(), 3);
    handle.join().unwrap();
}
