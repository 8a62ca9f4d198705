//! Delivery guarantees: at-most-once, write-once responses, timeouts

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mailbridge::{
    Affinity, BridgeError, Params, Request, RequestId, Response, RetireMode,
};
use serde_json::json;

use crate::common::*;

fn counting(bridge: &TestBridge) -> Arc<AtomicUsize> {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    bridge.registry().register("count", Affinity::AnyThread, move |_| {
        Ok(json!(counter.fetch_add(1, Ordering::SeqCst) + 1))
    });
    calls
}

#[test]
fn test_request_processed_once_across_restart() {
    let bridge = TestBridge::new();
    let calls = counting(&bridge);
    let mailbox = bridge.mailbox(0);

    let server = bridge.start();
    let id = RequestId::generate();
    mailbox
        .write_request(&Request::new(id.clone(), "count", Params::new()))
        .unwrap();
    assert!(eventually(Duration::from_secs(2), || mailbox.is_retired(&id)));
    server.stop();

    // A crash before retirement would leave the request file behind
    fs::copy(mailbox.processed_path(&id), mailbox.request_path(&id)).unwrap();

    let server = bridge.start();
    assert!(eventually(Duration::from_secs(2), || {
        !mailbox.request_path(&id).exists()
    }));
    server.stop();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(assert_response(&mailbox, &id).result, Some(json!(1)));
}

#[test]
fn test_existing_response_is_never_overwritten() {
    let bridge = TestBridge::new();
    let calls = counting(&bridge);
    let mailbox = bridge.mailbox(0);

    let id = RequestId::generate();
    mailbox
        .publish_response(&Response::success(id.clone(), json!("first")))
        .unwrap();
    let before = fs::read(mailbox.response_path(&id)).unwrap();
    mailbox
        .write_request(&Request::new(id.clone(), "count", Params::new()))
        .unwrap();

    let server = bridge.start();
    assert!(eventually(Duration::from_secs(2), || {
        !mailbox.request_path(&id).exists()
    }));
    server.stop();

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(fs::read(mailbox.response_path(&id)).unwrap(), before);
}

#[test]
fn test_consumed_response_before_restart_is_not_rerun() {
    let bridge = TestBridge::new();
    let calls = counting(&bridge);
    let mailbox = bridge.mailbox(0);

    // Server answered, then stopped before retiring the request
    let id = RequestId::generate();
    mailbox
        .write_request(&Request::new(id.clone(), "count", Params::new()))
        .unwrap();
    mailbox
        .publish_response(&Response::success(id.clone(), json!(1)))
        .unwrap();

    let client = bridge.client(0);
    assert_eq!(client.check_response(&id).unwrap(), Some(json!(1)));
    assert!(!mailbox.request_path(&id).exists());
    assert!(!mailbox.has_response(&id));

    let server = bridge.start();
    assert!(eventually(Duration::from_secs(2), || {
        server.poller_status().ticks >= 2
    }));
    server.stop();

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!mailbox.has_response(&id));
}

#[test]
fn test_timeout_without_server_leaves_only_request() {
    let bridge = TestBridge::new();
    let client = bridge.client(0);

    let err = client
        .call("echo", Params::new(), Duration::from_millis(200))
        .unwrap_err();
    let BridgeError::ClientTimeout { id, waited_ms } = err else {
        panic!("expected timeout, got {:?}", err);
    };
    assert!(waited_ms >= 200);

    assert_eq!(bridge.files(0), vec![format!("command_{}.json", id)]);
}

#[test]
fn test_late_response_retrievable_after_timeout() {
    let bridge = TestBridge::new();
    let client = bridge.client(0);

    let pending = client.submit("echo", Params::new()).unwrap();
    let id = pending.id().clone();
    assert!(pending.wait(Duration::from_millis(50)).is_err());

    // Server comes up after the client gave up
    let server = bridge.start();
    let value = client.wait_response(&id, Duration::from_secs(2)).unwrap();
    assert_eq!(value, json!({}));
    server.stop();
}

#[test]
fn test_unidentifiable_request_dropped() {
    let bridge = TestBridge::new();
    let mailbox = bridge.mailbox(0);
    let nameless = mailbox.root().join("command_.json");
    fs::write(&nameless, r#"{"command": "echo"}"#).unwrap();

    let server = bridge.start();
    assert!(eventually(Duration::from_secs(2), || !nameless.exists()));
    server.stop();

    assert!(bridge.files(0).iter().all(|f| !f.starts_with("response_")));
}

#[test]
fn test_delete_retire_mode() {
    let bridge = TestBridge::new().configure(|c| c.retire = RetireMode::Delete);
    let server = bridge.start();
    let client = bridge.client(0).keep_responses(true);

    let pending = client.submit("echo", Params::new()).unwrap();
    let id = pending.id().clone();
    pending.wait(Duration::from_secs(2)).unwrap();
    assert!(eventually(Duration::from_secs(1), || {
        !client.mailbox().request_path(&id).exists()
    }));
    server.stop();

    assert!(!client.mailbox().is_retired(&id));
    assert_retired(client.mailbox(), &id);
}

#[test]
fn test_every_mailbox_is_served() {
    let bridge = TestBridge::with_mailboxes(&["workspace", "addon"]);
    let server = bridge.start();

    for index in 0..2 {
        let client = bridge.client(index);
        let mut params = Params::new();
        params.insert("mailbox".to_string(), json!(index));
        let result = client.call("echo", params, Duration::from_secs(2)).unwrap();
        assert_eq!(result["mailbox"], json!(index));
    }

    // Each response lands next to its own request only
    let status = server.poller_status();
    assert!(status.handled >= 2);
    server.stop();
}

#[test]
fn test_many_concurrent_clients() {
    let bridge = TestBridge::new();
    let server = bridge.start();

    let handles: Vec<_> = (0..8)
        .map(|n| {
            let client = bridge.client(0);
            std::thread::spawn(move || {
                let mut params = Params::new();
                params.insert("n".to_string(), json!(n));
                client.call("echo", params, Duration::from_secs(5))
            })
        })
        .collect();

    for (n, handle) in handles.into_iter().enumerate() {
        let result = handle.join().unwrap().unwrap();
        assert_eq!(result["n"], json!(n));
    }
    server.stop();
}
