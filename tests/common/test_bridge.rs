//! TestBridge builder: a server and a client sharing temporary mailboxes

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use mailbridge::registry::builtin;
use mailbridge::{
    BridgeClient, BridgeServer, HandlerRegistry, Mailbox, ServerConfig, ThreadMarshal,
};
use tempfile::TempDir;

/// Poll interval used by test servers
pub const FAST_TICK: Duration = Duration::from_millis(20);

/// Owns the temp directory; the server and client point into it
pub struct TestBridge {
    dir: TempDir,
    config: ServerConfig,
    registry: Arc<HandlerRegistry>,
    marshal: Option<Arc<dyn ThreadMarshal>>,
}

impl TestBridge {
    /// One mailbox named `box`, built-ins plus `echo`
    pub fn new() -> Self {
        Self::with_mailboxes(&["box"])
    }

    /// Several mailboxes, relative to the temp directory
    pub fn with_mailboxes(names: &[&str]) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let config = ServerConfig {
            poll_interval_ms: FAST_TICK.as_millis() as u64,
            stop_timeout_ms: 2000,
            ..ServerConfig::with_mailboxes(names.iter().map(|n| dir.path().join(n)))
        };
        let registry = HandlerRegistry::with_builtins();
        builtin::install_echo(&registry);
        Self {
            dir,
            config,
            registry,
            marshal: None,
        }
    }

    pub fn configure(mut self, f: impl FnOnce(&mut ServerConfig)) -> Self {
        f(&mut self.config);
        self
    }

    pub fn marshal(mut self, marshal: Arc<dyn ThreadMarshal>) -> Self {
        self.marshal = Some(marshal);
        self
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn mailbox_dir(&self, index: usize) -> PathBuf {
        self.config.mailboxes[index].clone()
    }

    pub fn mailbox(&self, index: usize) -> Mailbox {
        Mailbox::open(self.mailbox_dir(index)).expect("Failed to open mailbox")
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// A server over this bridge's mailboxes (not started)
    pub fn server(&self) -> BridgeServer {
        let server = BridgeServer::new(self.config.clone(), Arc::clone(&self.registry));
        match &self.marshal {
            Some(marshal) => server.with_marshal(Arc::clone(marshal)),
            None => server,
        }
    }

    /// A started server
    pub fn start(&self) -> BridgeServer {
        let server = self.server();
        server.start().expect("Failed to start server");
        server
    }

    /// A client on mailbox `index` with a short poll interval
    pub fn client(&self, index: usize) -> BridgeClient {
        BridgeClient::new(self.mailbox_dir(index))
            .expect("Failed to open client mailbox")
            .with_poll_interval(Duration::from_millis(10))
    }

    /// File names in mailbox `index`, sorted
    pub fn files(&self, index: usize) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(self.mailbox_dir(index))
            .expect("Failed to list mailbox")
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    /// Run the mailbridge binary with `--mailbox` pointing at mailbox 0
    pub fn run_cli(&self, args: &[&str]) -> std::io::Result<Output> {
        Command::new(env!("CARGO_BIN_EXE_mailbridge"))
            .current_dir(self.path())
            .env("MAILBRIDGE_CONFIG", self.path().join("no-config.toml"))
            .env_remove("RUST_LOG")
            .args(args)
            .output()
    }

    /// Run CLI and expect success, return stdout
    pub fn run_cli_success(&self, args: &[&str]) -> String {
        let output = self.run_cli(args).expect("Failed to run CLI");
        assert!(
            output.status.success(),
            "CLI command {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).to_string()
    }

    /// Run CLI and expect failure, return (exit code, stderr)
    pub fn run_cli_failure(&self, args: &[&str]) -> (Option<i32>, String) {
        let output = self.run_cli(args).expect("Failed to run CLI");
        assert!(
            !output.status.success(),
            "CLI command {:?} should have failed",
            args
        );
        (
            output.status.code(),
            String::from_utf8_lossy(&output.stderr).to_string(),
        )
    }
}

impl Default for TestBridge {
    fn default() -> Self {
        Self::new()
    }
}

/// Poll `check` until it holds or `budget` runs out
pub fn eventually<F: FnMut() -> bool>(budget: Duration, mut check: F) -> bool {
    let deadline = Instant::now() + budget;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    check()
}
