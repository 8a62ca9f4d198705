//! Fire-and-forget signal files

use std::sync::Arc;
use std::time::Duration;

use mailbridge::mailbox::DEFAULT_SIGNAL_FILE;
use mailbridge::Affinity;
use parking_lot::Mutex;

use crate::common::*;

fn recording(bridge: &TestBridge, file_name: &str) -> Arc<Mutex<Vec<String>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    bridge
        .registry()
        .register_signal(file_name, Affinity::AnyThread, move |text| {
            sink.lock().push(text.to_string());
            Ok(())
        });
    seen
}

#[test]
fn test_signal_consumed_exactly_once() {
    let bridge = TestBridge::new();
    let seen = recording(&bridge, DEFAULT_SIGNAL_FILE);
    let server = bridge.start();
    let client = bridge.client(0);

    client.send_signal(DEFAULT_SIGNAL_FILE, "hello host").unwrap();
    assert!(client.wait_signal_consumed(DEFAULT_SIGNAL_FILE, Duration::from_secs(2)));

    // Several more ticks must not replay it
    std::thread::sleep(FAST_TICK * 5);
    server.stop();

    assert_eq!(*seen.lock(), vec!["hello host".to_string()]);
    let processed: Vec<_> = bridge
        .files(0)
        .into_iter()
        .filter(|f| f.starts_with("processed_message_box_") && f.ends_with(".txt"))
        .collect();
    assert_eq!(processed.len(), 1);
}

#[test]
fn test_successive_signals_each_delivered() {
    let bridge = TestBridge::new();
    let seen = recording(&bridge, DEFAULT_SIGNAL_FILE);
    let server = bridge.start();
    let client = bridge.client(0);

    for text in ["one", "two", "three"] {
        client.send_signal(DEFAULT_SIGNAL_FILE, text).unwrap();
        assert!(client.wait_signal_consumed(DEFAULT_SIGNAL_FILE, Duration::from_secs(2)));
    }
    server.stop();

    assert_eq!(*seen.lock(), vec!["one", "two", "three"]);
}

#[test]
fn test_custom_signal_file() {
    let bridge = TestBridge::new().configure(|c| c.signal_files.push("reload.flag".to_string()));
    let seen = recording(&bridge, "reload.flag");
    let server = bridge.start();
    let client = bridge.client(0);

    client.send_signal("reload.flag", "now").unwrap();
    assert!(client.wait_signal_consumed("reload.flag", Duration::from_secs(2)));
    server.stop();

    assert_eq!(*seen.lock(), vec!["now"]);
}

#[test]
fn test_unwatched_signal_file_untouched() {
    let bridge = TestBridge::new();
    let seen = recording(&bridge, "elsewhere.txt");
    let server = bridge.start();
    let client = bridge.client(0);

    // Handler exists but the file is not a configured channel
    client.send_signal("elsewhere.txt", "ignored").unwrap();
    assert!(!client.wait_signal_consumed("elsewhere.txt", FAST_TICK * 5));
    server.stop();

    assert!(seen.lock().is_empty());
}
