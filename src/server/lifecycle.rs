//! Server lifecycle: start, stop, and the one-poller-per-mailbox claim
//!
//! ```text
//!            start()                 poller spawned
//! Stopped ───────────► Starting ────────────────────► Running
//!    ▲                    │ no mailbox / claim taken      │
//!    └────────────────────┘                               │ stop()
//!    ▲                                                    ▼
//!    └──────────── thread joined (or timed out) ◄── StoppingRequested
//! ```
//!
//! `start()` and `stop()` are serialized by a control lock; observers read
//! the state without taking it.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::config::ServerConfig;
use crate::error::{BridgeError, Result};
use crate::fs_utils;
use crate::mailbox::Mailbox;
use crate::marshal::ThreadMarshal;
use crate::registry::HandlerRegistry;

use super::beacon::{BeaconRecord, ReadyBeacon, ServerStatusRecord};
use super::poller::{DirectoryPoller, PollerStatus};

/// Lifecycle of a [`BridgeServer`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    #[default]
    Stopped,
    Starting,
    Running,
    StoppingRequested,
}

/// Result of [`BridgeServer::start`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// Nothing was spawned; the server was already in this state
    AlreadyRunning(LifecycleState),
}

/// Result of [`BridgeServer::stop`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NotRunning,
    /// The poller did not exit within the stop timeout and was detached.
    /// It exits after its current tick and releases its mailboxes then.
    TimedOut,
}

/// Canonical paths of every mailbox with a live poller in this process
static ACTIVE_MAILBOXES: Lazy<Mutex<HashSet<PathBuf>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// Exclusive claim on a set of mailboxes, released on drop
#[derive(Debug)]
struct MailboxClaim {
    keys: Vec<PathBuf>,
}

impl MailboxClaim {
    fn acquire(mailboxes: &[Mailbox]) -> Result<Self> {
        let keys: Vec<PathBuf> = mailboxes
            .iter()
            .map(|m| fs_utils::canonical_key(m.root()))
            .collect();

        let mut active = ACTIVE_MAILBOXES.lock();
        if let Some(taken) = keys.iter().find(|key| active.contains(*key)) {
            return Err(BridgeError::AlreadyActive {
                path: taken.clone(),
            });
        }
        active.extend(keys.iter().cloned());
        Ok(Self { keys })
    }
}

impl Drop for MailboxClaim {
    fn drop(&mut self) {
        let mut active = ACTIVE_MAILBOXES.lock();
        for key in &self.keys {
            active.remove(key);
        }
    }
}

/// Everything that only exists while the poller runs
struct Running {
    flag: Arc<AtomicBool>,
    worker: JoinHandle<()>,
    beacon: ReadyBeacon,
    record: ServerStatusRecord,
}

/// Owns a directory poller and its thread
pub struct BridgeServer {
    config: ServerConfig,
    registry: Arc<HandlerRegistry>,
    marshal: Option<Arc<dyn ThreadMarshal>>,
    state: RwLock<LifecycleState>,
    control: Mutex<Option<Running>>,
    status: RwLock<Arc<Mutex<PollerStatus>>>,
    beacons: RwLock<Vec<BeaconRecord>>,
}

impl BridgeServer {
    pub fn new(config: ServerConfig, registry: Arc<HandlerRegistry>) -> Self {
        Self {
            config,
            registry,
            marshal: None,
            state: RwLock::new(LifecycleState::Stopped),
            control: Mutex::new(None),
            status: RwLock::new(Arc::new(Mutex::new(PollerStatus::default()))),
            beacons: RwLock::new(Vec::new()),
        }
    }

    /// Route `HostThread` handlers through this marshal
    pub fn with_marshal(mut self, marshal: Arc<dyn ThreadMarshal>) -> Self {
        self.marshal = Some(marshal);
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.read()
    }

    pub fn is_running(&self) -> bool {
        self.state() == LifecycleState::Running
    }

    /// Counters of the current (or last) poller
    pub fn poller_status(&self) -> PollerStatus {
        self.status.read().lock().clone()
    }

    /// Set when every mailbox has been failing for `failure_threshold` ticks
    pub fn last_error(&self) -> Option<String> {
        self.poller_status().last_error
    }

    /// Beacons written by the last successful start
    pub fn beacons(&self) -> Vec<BeaconRecord> {
        self.beacons.read().clone()
    }

    fn transition(&self, next: LifecycleState) {
        let mut state = self.state.write();
        if *state != next {
            tracing::debug!("Server state {:?} -> {:?}", *state, next);
            *state = next;
        }
    }

    /// Start polling.
    ///
    /// Idempotent: a running (or starting) server reports
    /// [`StartOutcome::AlreadyRunning`] and spawns nothing.
    pub fn start(&self) -> Result<StartOutcome> {
        let mut control = self.control.lock();
        let current = self.state();
        if current != LifecycleState::Stopped {
            tracing::debug!("Start ignored, server is {:?}", current);
            return Ok(StartOutcome::AlreadyRunning(current));
        }

        self.transition(LifecycleState::Starting);
        match self.launch() {
            Ok(running) => {
                *control = Some(running);
                self.transition(LifecycleState::Running);
                Ok(StartOutcome::Started)
            }
            Err(e) => {
                tracing::error!("Server failed to start: {}", e);
                self.transition(LifecycleState::Stopped);
                Err(e)
            }
        }
    }

    fn launch(&self) -> Result<Running> {
        self.config.validate()?;
        let mailboxes = self.open_mailboxes()?;
        let claim = MailboxClaim::acquire(&mailboxes)?;

        let mut poller =
            DirectoryPoller::new(mailboxes.clone(), Arc::clone(&self.registry), self.config.poller_config());
        if let Some(marshal) = &self.marshal {
            poller = poller.with_marshal(Arc::clone(marshal));
        }
        *self.status.write() = poller.status_handle();

        let flag = Arc::new(AtomicBool::new(true));
        let thread_flag = Arc::clone(&flag);
        let worker = thread::Builder::new()
            .name("mailbridge-poller".to_string())
            .spawn(move || {
                // Released only once the loop has really exited
                let _claim = claim;
                poller.run(&thread_flag);
            })?;

        let mut record = ServerStatusRecord::new(
            self.config.ready_status.clone(),
            mailboxes.iter().map(|m| m.root().to_path_buf()).collect(),
        );
        record.commands = self.registry.commands();
        record.signals = self.config.signal_files.clone();

        let beacon = ReadyBeacon::for_mailboxes(&mailboxes, &self.config.beacon_paths);
        *self.beacons.write() = beacon.announce(&record);

        tracing::info!(
            "Server running on {} mailbox(es): {}",
            mailboxes.len(),
            mailboxes
                .iter()
                .map(|m| m.root().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(Running {
            flag,
            worker,
            beacon,
            record,
        })
    }

    /// Open (creating if needed) every configured mailbox.
    ///
    /// Mailboxes that cannot be created are logged and left out; it is an
    /// error only when none can be.
    fn open_mailboxes(&self) -> Result<Vec<Mailbox>> {
        let mut seen = HashSet::new();
        let mut mailboxes = Vec::new();
        let mut last_err = None;

        for path in &self.config.mailboxes {
            match Mailbox::open(path) {
                Ok(mailbox) => {
                    if seen.insert(fs_utils::canonical_key(mailbox.root())) {
                        mailboxes.push(mailbox);
                    }
                }
                Err(e) => {
                    tracing::warn!("Mailbox {} unavailable: {}", path.display(), e);
                    last_err = Some(e);
                }
            }
        }

        match (mailboxes.is_empty(), last_err) {
            (true, Some(e)) => Err(e),
            (true, None) => Err(BridgeError::Config {
                message: "no mailbox directories configured".to_string(),
            }),
            (false, _) => Ok(mailboxes),
        }
    }

    /// Ask the poller to stop and wait up to the configured stop timeout
    pub fn stop(&self) -> StopOutcome {
        self.stop_within(self.config.stop_timeout())
    }

    /// Ask the poller to stop and wait up to `timeout`.
    ///
    /// An overrun is logged, not fatal: the thread is detached and exits
    /// after its current tick.
    pub fn stop_within(&self, timeout: Duration) -> StopOutcome {
        let mut control = self.control.lock();
        let Some(running) = control.take() else {
            return StopOutcome::NotRunning;
        };

        self.transition(LifecycleState::StoppingRequested);
        running.flag.store(false, Ordering::SeqCst);

        let outcome = join_within(running.worker, timeout);
        running.beacon.retract(&running.record);
        self.beacons.write().clear();
        self.transition(LifecycleState::Stopped);

        match outcome {
            StopOutcome::TimedOut => tracing::warn!(
                "Poller did not exit within {:?}; detached",
                timeout
            ),
            _ => tracing::info!("Server stopped"),
        }
        outcome
    }
}

impl Drop for BridgeServer {
    fn drop(&mut self) {
        if self.control.get_mut().is_some() {
            self.stop();
        }
    }
}

fn join_within(worker: JoinHandle<()>, timeout: Duration) -> StopOutcome {
    let deadline = Instant::now() + timeout;
    while !worker.is_finished() {
        if Instant::now() >= deadline {
            return StopOutcome::TimedOut;
        }
        thread::sleep(Duration::from_millis(10));
    }
    if worker.join().is_err() {
        tracing::error!("Poller thread panicked");
    }
    StopOutcome::Stopped
}
