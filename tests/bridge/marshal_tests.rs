//! Host-thread handlers through the thread marshal

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mailbridge::{host_channel, Affinity, BridgeError, InlineMarshal, Params};
use serde_json::json;

use crate::common::*;

fn register_thread_probe(bridge: &TestBridge) {
    bridge
        .registry()
        .register("whoami", Affinity::HostThread, |_| {
            Ok(json!(thread::current().name().unwrap_or("unnamed")))
        });
}

#[test]
fn test_host_thread_handler_runs_on_pump_thread() {
    let (marshal, pump) = host_channel();
    let bridge = TestBridge::new().marshal(Arc::new(marshal));
    register_thread_probe(&bridge);
    let server = bridge.start();
    let client = bridge.client(0);

    let done = Arc::new(AtomicBool::new(false));
    let caller_done = Arc::clone(&done);
    let caller = thread::Builder::new()
        .name("test-client".to_string())
        .spawn(move || {
            let result = client.call("whoami", Params::new(), Duration::from_secs(5));
            caller_done.store(true, Ordering::SeqCst);
            result
        })
        .unwrap();

    // This test thread plays the host's privileged thread
    let host_name = thread::current().name().map(str::to_string);
    pump.run_until(Duration::from_millis(10), || done.load(Ordering::SeqCst));

    let result = caller.join().unwrap().unwrap();
    assert_eq!(result.as_str(), host_name.as_deref().or(Some("unnamed")));
    server.stop();
}

#[test]
fn test_host_thread_gone_yields_error_response() {
    let (marshal, pump) = host_channel();
    drop(pump);
    let bridge = TestBridge::new().marshal(Arc::new(marshal));
    register_thread_probe(&bridge);
    let server = bridge.start();
    let client = bridge.client(0);

    match client.call("whoami", Params::new(), Duration::from_secs(2)) {
        Err(BridgeError::Remote { message, .. }) => {
            assert!(message.contains("Host thread unavailable"), "{}", message)
        }
        other => panic!("expected remote error, got {:?}", other),
    }

    // Poller survives and still answers
    assert!(client.call("echo", Params::new(), Duration::from_secs(2)).is_ok());
    server.stop();
}

#[test]
fn test_host_thread_handler_without_marshal() {
    let bridge = TestBridge::new();
    register_thread_probe(&bridge);
    let server = bridge.start();

    let err = bridge
        .client(0)
        .call("whoami", Params::new(), Duration::from_secs(2))
        .unwrap_err();
    assert!(err.to_string().contains("no host-thread marshal"));
    server.stop();
}

#[test]
fn test_inline_marshal_runs_on_poller_thread() {
    let bridge = TestBridge::new().marshal(Arc::new(InlineMarshal));
    register_thread_probe(&bridge);
    let server = bridge.start();

    let result = bridge
        .client(0)
        .call("whoami", Params::new(), Duration::from_secs(2))
        .unwrap();
    assert_eq!(result, json!("mailbridge-poller"));
    server.stop();
}
