//! Server lifecycle, beacons, and probing

use std::fs;
use std::time::Duration;

use mailbridge::mailbox::{READY_FILE, STATUS_FILE};
use mailbridge::server::{read_beacon, read_status};
use mailbridge::{BridgeError, LifecycleState, StartOutcome, StopOutcome};

use crate::common::*;

#[test]
fn test_double_start_spawns_one_poller() {
    let bridge = TestBridge::new();
    let server = bridge.server();

    assert_eq!(server.start().unwrap(), StartOutcome::Started);
    assert_eq!(
        server.start().unwrap(),
        StartOutcome::AlreadyRunning(LifecycleState::Running)
    );

    // A second server on the same mailbox is refused outright
    let rival = bridge.server();
    assert!(matches!(
        rival.start(),
        Err(BridgeError::AlreadyActive { .. })
    ));

    assert_eq!(server.stop(), StopOutcome::Stopped);
    assert_eq!(server.state(), LifecycleState::Stopped);
}

#[test]
fn test_stop_is_prompt() {
    let bridge = TestBridge::new().configure(|c| c.poll_interval_ms = 200);
    let server = bridge.start();

    let started = std::time::Instant::now();
    assert_eq!(server.stop(), StopOutcome::Stopped);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_beacons_written_everywhere_and_removed() {
    let bridge = TestBridge::with_mailboxes(&["a", "b"]);
    let extra = bridge.path().join("host").join("ready.txt");
    let extra_for_config = extra.clone();
    let bridge = bridge.configure(move |c| {
        c.beacon_paths.push(extra_for_config);
        c.ready_status = "Test host ready".to_string();
    });

    let server = bridge.start();
    for path in [
        bridge.mailbox_dir(0).join(READY_FILE),
        bridge.mailbox_dir(1).join(READY_FILE),
        extra.clone(),
    ] {
        let beacon = read_beacon(&path).unwrap_or_else(|| panic!("no beacon at {}", path.display()));
        assert_eq!(beacon.status, "Test host ready");
    }

    let status = read_status(&bridge.mailbox_dir(0).join(STATUS_FILE)).unwrap();
    assert_eq!(status.mailboxes.len(), 2);
    assert!(status.commands.iter().any(|c| c.name == "echo"));

    server.stop();
    assert!(!bridge.mailbox_dir(0).join(READY_FILE).exists());
    assert!(!bridge.mailbox_dir(1).join(READY_FILE).exists());
    assert!(!extra.exists());
    assert!(read_status(&bridge.mailbox_dir(0).join(STATUS_FILE))
        .unwrap()
        .is_stopped());
}

#[test]
fn test_unwritable_beacon_path_is_skipped() {
    let bridge = TestBridge::new();
    let blocker = bridge.path().join("blocker");
    fs::write(&blocker, "file, not a directory").unwrap();
    let bad = blocker.join("ready.txt");
    let bridge = bridge.configure(move |c| c.beacon_paths.push(bad));

    let server = bridge.start();
    assert!(server.is_running());
    assert_eq!(server.beacons().len(), 1);
    server.stop();
}

#[test]
fn test_client_probe_and_ping() {
    let bridge = TestBridge::new();
    let client = bridge.client(0);
    assert!(!client.probe().is_live());

    let server = bridge.start();
    let probe = client
        .wait_for_ready(Duration::from_secs(2))
        .expect("server should look live");
    assert!(probe.newest_beacon().is_some());
    assert!(probe.status.unwrap().pid > 0);
    assert!(client.ping(Duration::from_secs(2)).is_ok());

    server.stop();
    assert!(!client.probe().is_live());
}

#[test]
fn test_missing_mailbox_recreated_while_running() {
    let bridge = TestBridge::new();
    let server = bridge.start();
    let client = bridge.client(0);

    fs::remove_dir_all(bridge.mailbox_dir(0)).unwrap();
    assert!(eventually(Duration::from_secs(2), || bridge.mailbox_dir(0).is_dir()));

    let result = client
        .call("ping", mailbridge::Params::new(), Duration::from_secs(2))
        .unwrap();
    assert_eq!(result["pong"], serde_json::json!(true));
    assert!(server.last_error().is_none());
    server.stop();
}

#[test]
fn test_one_bad_mailbox_does_not_block_start() {
    let bridge = TestBridge::with_mailboxes(&["good", "bad"]);
    fs::write(bridge.mailbox_dir(1), "in the way").unwrap();

    let server = bridge.start();
    assert!(server.is_running());
    let result = bridge
        .client(0)
        .call("echo", mailbridge::Params::new(), Duration::from_secs(2));
    assert!(result.is_ok());
    server.stop();
}
