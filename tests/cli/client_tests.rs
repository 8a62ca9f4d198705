//! Tests for `call`, `check`, `signal`, and `status` against an in-process server

use std::time::Duration;

use mailbridge::{Params, Request, RequestId, Response};
use serde_json::{json, Value};

use crate::common::*;

fn mailbox_arg(bridge: &TestBridge) -> String {
    bridge.mailbox_dir(0).to_string_lossy().to_string()
}

#[test]
fn test_call_prints_result() {
    let bridge = TestBridge::new();
    let server = bridge.start();
    let mailbox = mailbox_arg(&bridge);

    let stdout = bridge.run_cli_success(&[
        "call", "echo", "--params", r#"{"x": 1}"#, "--mailbox", &mailbox, "--timeout", "5",
    ]);
    let result: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(result, json!({"x": 1}));
    server.stop();
}

#[test]
fn test_call_json_format_includes_id() {
    let bridge = TestBridge::new();
    let server = bridge.start();
    let mailbox = mailbox_arg(&bridge);

    let stdout = bridge.run_cli_success(&[
        "--format", "json", "call", "ping", "--mailbox", &mailbox, "--timeout", "5",
    ]);
    let output: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(output["success"], json!(true));
    assert!(RequestId::parse(output["id"].as_str().unwrap()).is_some());
    server.stop();
}

#[test]
fn test_call_unknown_command_exit_code() {
    let bridge = TestBridge::new();
    let server = bridge.start();
    let mailbox = mailbox_arg(&bridge);

    let (code, stderr) =
        bridge.run_cli_failure(&["call", "nope", "--mailbox", &mailbox, "--timeout", "5"]);
    assert_eq!(code, Some(4));
    assert!(stderr.contains("Unknown command: nope"));
    server.stop();
}

#[test]
fn test_call_timeout_exit_code() {
    let bridge = TestBridge::new();
    let mailbox = mailbox_arg(&bridge);

    let (code, stderr) =
        bridge.run_cli_failure(&["call", "echo", "--mailbox", &mailbox, "--timeout", "0.2"]);
    assert_eq!(code, Some(5));
    assert!(stderr.contains("Timed out"));
    assert_eq!(bridge.files(0).len(), 1);
}

#[test]
fn test_call_rejects_non_object_params() {
    let bridge = TestBridge::new();
    let mailbox = mailbox_arg(&bridge);

    let (code, _) =
        bridge.run_cli_failure(&["call", "echo", "--params", "[1]", "--mailbox", &mailbox]);
    assert_eq!(code, Some(2));
}

#[test]
fn test_check_pending_then_answered() {
    let bridge = TestBridge::new();
    let mailbox = bridge.mailbox(0);
    let id = RequestId::generate();
    mailbox
        .write_request(&Request::new(id.clone(), "echo", Params::new()))
        .unwrap();
    let dir = mailbox_arg(&bridge);

    let stdout = bridge.run_cli_success(&["check", id.as_str(), "--mailbox", &dir]);
    assert!(stdout.contains("no response yet"));

    mailbox
        .publish_response(&Response::success(id.clone(), json!({"late": true})))
        .unwrap();
    let stdout = bridge.run_cli_success(&["check", id.as_str(), "--mailbox", &dir]);
    let result: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(result, json!({"late": true}));
    assert!(!mailbox.has_response(&id));
}

#[test]
fn test_check_rejects_bad_id() {
    let bridge = TestBridge::new();
    let dir = mailbox_arg(&bridge);
    let (code, _) = bridge.run_cli_failure(&["check", "../escape", "--mailbox", &dir]);
    assert_eq!(code, Some(2));
}

#[test]
fn test_signal_written_and_consumed() {
    let bridge = TestBridge::new();
    let seen = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = std::sync::Arc::clone(&seen);
    bridge.registry().register_signal(
        mailbridge::mailbox::DEFAULT_SIGNAL_FILE,
        mailbridge::Affinity::AnyThread,
        move |text| {
            sink.lock().push(text.to_string());
            Ok(())
        },
    );
    let server = bridge.start();
    let dir = mailbox_arg(&bridge);

    let stdout = bridge.run_cli_success(&["signal", "from the cli", "--mailbox", &dir, "--wait", "5"]);
    assert!(stdout.contains("consumed"));
    server.stop();

    assert_eq!(*seen.lock(), vec!["from the cli"]);
}

#[test]
fn test_status_reports_live_server() {
    let bridge = TestBridge::new();
    let dir = mailbox_arg(&bridge);

    let stdout = bridge.run_cli_success(&["status", "--mailbox", &dir]);
    assert!(stdout.contains("live: no"));

    let server = bridge.start();
    let stdout = bridge.run_cli_success(&[
        "--format", "json", "status", "--mailbox", &dir, "--ping", "--wait", "2",
    ]);
    let output: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(output["live"], json!(true));
    assert!(output["ping_ms"].is_u64());
    assert_eq!(output["status"]["pid"], json!(std::process::id()));
    server.stop();

    // Give the stopped record a moment to land
    assert!(eventually(Duration::from_secs(1), || {
        bridge
            .run_cli_success(&["status", "--mailbox", &dir])
            .contains("live: no")
    }));
}
