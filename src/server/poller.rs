//! Directory poller: the dispatch loop
//!
//! Every tick the poller walks each configured mailbox and each configured
//! channel:
//!
//! - [`Channel::Requests`]: `command_<id>.json` files are parsed, resolved
//!   against the registry, answered with `response_<id>.json` and retired.
//! - [`Channel::Signal`]: a single well-known file is claimed, its text is
//!   handed to the signal handler once, and it is never looked at again.
//!
//! # Ordering
//!
//! The response is published before the request is retired. A crash
//! between the two leaves a request file next to its response; the next
//! tick sees the response, skips the handler and finishes the retirement.
//!
//! Nothing below the dispatch boundary stops the loop: parse failures,
//! unknown commands, handler errors, panics and marshal failures all
//! become error responses or log lines.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use crate::error::{BridgeError, Result};
use crate::fs_utils;
use crate::mailbox::{
    Mailbox, PendingRequest, Request, RequestId, Response, RetireMode, DEFAULT_SIGNAL_FILE,
};
use crate::marshal::{run_guarded, HostWork, MarshalError, ThreadMarshal};
use crate::registry::{Affinity, HandlerRegistry};

/// Message shape a poller watches for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Channel {
    /// Paired request/response files
    Requests,
    /// Fire-and-forget signal file with this name
    Signal(String),
}

/// Configuration for the directory poller
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Tick length (default: 500ms)
    pub interval: Duration,
    /// What to do with answered requests
    pub retire: RetireMode,
    /// Channels scanned in every mailbox
    pub channels: Vec<Channel>,
    /// Consecutive ticks with every mailbox failing before the poller
    /// reports itself unhealthy
    pub failure_threshold: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            retire: RetireMode::Rename,
            channels: vec![
                Channel::Requests,
                Channel::Signal(DEFAULT_SIGNAL_FILE.to_string()),
            ],
            failure_threshold: 20,
        }
    }
}

/// Where the poller is within a tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollerPhase {
    #[default]
    Idle,
    Scanning,
    Dispatching,
}

/// Running counters, shared with the lifecycle controller
#[derive(Debug, Clone, Default, Serialize)]
pub struct PollerStatus {
    pub phase: PollerPhase,
    pub ticks: u64,
    /// Requests answered with `success: true`
    pub handled: u64,
    /// Requests answered with `success: false`
    pub failed: u64,
    pub signals: u64,
    pub consecutive_failed_ticks: u32,
    /// Set once every mailbox has failed for `failure_threshold` ticks,
    /// cleared when one recovers
    pub last_error: Option<String>,
}

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub handled: usize,
    pub failed: usize,
    pub skipped: usize,
    pub dropped: usize,
    pub signals: usize,
    pub mailbox_errors: usize,
}

enum RequestOutcome {
    Answered { success: bool },
    Skipped,
    Dropped,
}

/// Scans mailboxes and dispatches what it finds
pub struct DirectoryPoller {
    mailboxes: Vec<Mailbox>,
    registry: Arc<HandlerRegistry>,
    marshal: Option<Arc<dyn ThreadMarshal>>,
    config: PollerConfig,
    status: Arc<Mutex<PollerStatus>>,
    /// Responses whose handler ran but whose file could not be written,
    /// keyed by request path. Retried instead of re-invoking the handler.
    unpublished: Mutex<HashMap<PathBuf, Response>>,
}

impl DirectoryPoller {
    pub fn new(mailboxes: Vec<Mailbox>, registry: Arc<HandlerRegistry>, config: PollerConfig) -> Self {
        Self {
            mailboxes,
            registry,
            marshal: None,
            config,
            status: Arc::new(Mutex::new(PollerStatus::default())),
            unpublished: Mutex::new(HashMap::new()),
        }
    }

    /// Route `HostThread` handlers through this marshal
    pub fn with_marshal(mut self, marshal: Arc<dyn ThreadMarshal>) -> Self {
        self.marshal = Some(marshal);
        self
    }

    pub fn mailboxes(&self) -> &[Mailbox] {
        &self.mailboxes
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Shared handle on the poller's counters
    pub fn status_handle(&self) -> Arc<Mutex<PollerStatus>> {
        Arc::clone(&self.status)
    }

    pub fn status(&self) -> PollerStatus {
        self.status.lock().clone()
    }

    /// Tick until `running` is cleared.
    ///
    /// The flag is checked between ticks and while sleeping, so a stop
    /// request takes effect within one interval plus the tick in progress.
    pub fn run(&self, running: &AtomicBool) {
        tracing::info!(
            "Poller started on {} mailbox(es), interval {:?}",
            self.mailboxes.len(),
            self.config.interval
        );

        while running.load(Ordering::SeqCst) {
            let report = self.poll_once();
            if report.handled + report.failed + report.signals > 0 {
                tracing::debug!("Tick: {:?}", report);
            }
            sleep_while(running, self.config.interval);
        }

        tracing::info!("Poller stopped");
    }

    /// Run a single tick: `Idle -> Scanning -> Dispatching -> Idle`
    pub fn poll_once(&self) -> TickReport {
        self.set_phase(PollerPhase::Scanning);
        let mut report = TickReport::default();

        for mailbox in &self.mailboxes {
            if let Err(e) = self.poll_mailbox(mailbox, &mut report) {
                report.mailbox_errors += 1;
                tracing::warn!("Skipping mailbox this tick: {}", e);
            }
        }

        self.finish_tick(&report);
        report
    }

    fn poll_mailbox(&self, mailbox: &Mailbox, report: &mut TickReport) -> Result<()> {
        // Recreate a mailbox that was removed underneath us
        mailbox.ensure()?;

        for channel in &self.config.channels {
            match channel {
                Channel::Requests => self.scan_requests(mailbox, report)?,
                Channel::Signal(file_name) => {
                    if let Err(e) = self.scan_signal(mailbox, file_name, report) {
                        tracing::warn!(
                            "Signal {} in {} failed: {}",
                            file_name,
                            mailbox.root().display(),
                            e
                        );
                    }
                }
            }
        }
        Ok(())
    }

    fn scan_requests(&self, mailbox: &Mailbox, report: &mut TickReport) -> Result<()> {
        for pending in mailbox.pending_requests()? {
            match self.process_request(mailbox, &pending) {
                RequestOutcome::Answered { success: true } => report.handled += 1,
                RequestOutcome::Answered { success: false } => report.failed += 1,
                RequestOutcome::Skipped => report.skipped += 1,
                RequestOutcome::Dropped => report.dropped += 1,
            }
        }
        Ok(())
    }

    fn process_request(&self, mailbox: &Mailbox, pending: &PendingRequest) -> RequestOutcome {
        let Some(id) = &pending.id else {
            tracing::warn!(
                "Dropping request file without a usable id: {}",
                pending.path.display()
            );
            if let Err(e) = fs_utils::remove_if_exists(&pending.path) {
                tracing::warn!("Could not drop {}: {}", pending.path.display(), e);
            }
            return RequestOutcome::Dropped;
        };

        // A response that could not be written on an earlier tick
        let retry = self.unpublished.lock().remove(&pending.path);
        if let Some(response) = retry {
            return self.deliver(mailbox, pending, id, response);
        }

        if mailbox.has_response(id) {
            tracing::debug!("Request {} already answered, finishing retirement", id);
            self.retire(mailbox, pending, id);
            return RequestOutcome::Skipped;
        }
        if mailbox.is_retired(id) {
            tracing::debug!("Request {} already marked processed, removing leftover", id);
            self.retire(mailbox, pending, id);
            return RequestOutcome::Skipped;
        }

        self.set_phase(PollerPhase::Dispatching);
        let response = match mailbox.read_request(&pending.path) {
            Ok(request) => self.answer(id, request),
            // Gone between listing and reading
            Err(BridgeError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return RequestOutcome::Skipped;
            }
            Err(err) => {
                tracing::warn!("Rejecting request {}: {}", id, err);
                Response::from_error(id.clone(), &err)
            }
        };

        self.deliver(mailbox, pending, id, response)
    }

    /// Publish the response, then retire the request
    fn deliver(
        &self,
        mailbox: &Mailbox,
        pending: &PendingRequest,
        id: &RequestId,
        response: Response,
    ) -> RequestOutcome {
        let success = response.success;
        match mailbox.publish_response(&response) {
            Ok(true) => {}
            Ok(false) => tracing::warn!("Response {} already existed, kept the original", id),
            Err(e) => {
                tracing::error!("Could not write response {}: {}", id, e);
                self.unpublished
                    .lock()
                    .insert(pending.path.clone(), response);
                return RequestOutcome::Skipped;
            }
        }

        self.retire(mailbox, pending, id);
        RequestOutcome::Answered { success }
    }

    fn retire(&self, mailbox: &Mailbox, pending: &PendingRequest, id: &RequestId) {
        if let Err(e) = mailbox.retire(id, &pending.path, self.config.retire) {
            // The response stays published; the client removes the request
            // when it consumes it, otherwise the next tick retries this step
            tracing::warn!("Could not retire request {}: {}", id, e);
        }
    }

    fn answer(&self, id: &RequestId, request: Request) -> Response {
        match self.invoke(id, request) {
            Ok(result) => {
                tracing::debug!("Request {} succeeded", id);
                Response::success(id.clone(), result)
            }
            Err(err) => {
                tracing::info!("Request {} failed: {}", id, err);
                Response::from_error(id.clone(), &err)
            }
        }
    }

    fn invoke(&self, id: &RequestId, request: Request) -> Result<Value> {
        if let Some(body_id) = &request.id {
            if body_id != id {
                return Err(BridgeError::Protocol {
                    message: format!("body id {} does not match file id {}", body_id, id),
                });
            }
        }

        let entry = self
            .registry
            .lookup(&request.command)
            .ok_or_else(|| BridgeError::UnknownCommand {
                name: request.command.clone(),
            })?;

        tracing::info!("Dispatching {} ({})", request.command, id);
        let handler = entry.handler();
        let params = request.params;
        self.execute(entry.affinity, Box::new(move || handler(params)))
    }

    fn scan_signal(&self, mailbox: &Mailbox, file_name: &str, report: &mut TickReport) -> Result<()> {
        let Some(entry) = self.registry.signal(file_name) else {
            if mailbox.signal_path(file_name).exists() {
                tracing::debug!("No handler registered for signal {}", file_name);
            }
            return Ok(());
        };

        let Some(claimed) = mailbox.claim_signal(file_name)? else {
            return Ok(());
        };
        report.signals += 1;

        let text = fs::read_to_string(&claimed)?.trim().to_string();
        tracing::info!("Signal {} received ({} bytes)", file_name, text.len());

        let handler = entry.handler();
        let outcome = self.execute(
            entry.affinity,
            Box::new(move || handler(&text).map(|()| Value::Null)),
        );
        if let Err(e) = outcome {
            // Fire-and-forget: nobody to answer, the file stays consumed
            tracing::warn!("Signal handler for {} failed: {}", file_name, e);
        }
        Ok(())
    }

    fn execute(&self, affinity: Affinity, work: HostWork) -> Result<Value> {
        match affinity {
            Affinity::AnyThread => Ok(run_guarded(work)?),
            Affinity::HostThread => {
                let marshal = self
                    .marshal
                    .as_ref()
                    .ok_or_else(|| MarshalError::Unavailable {
                        reason: "no host-thread marshal configured".to_string(),
                    })?;
                Ok(marshal.submit(work)??)
            }
        }
    }

    fn set_phase(&self, phase: PollerPhase) {
        self.status.lock().phase = phase;
    }

    fn finish_tick(&self, report: &TickReport) {
        // Forget responses whose request was removed by someone else
        self.unpublished.lock().retain(|path, _| path.exists());

        let mut status = self.status.lock();
        status.phase = PollerPhase::Idle;
        status.ticks += 1;
        status.handled += report.handled as u64;
        status.failed += report.failed as u64;
        status.signals += report.signals as u64;

        let all_failed = !self.mailboxes.is_empty() && report.mailbox_errors == self.mailboxes.len();
        if all_failed {
            status.consecutive_failed_ticks += 1;
            if status.consecutive_failed_ticks == self.config.failure_threshold {
                let message = format!(
                    "all {} mailbox(es) inaccessible for {} consecutive ticks",
                    self.mailboxes.len(),
                    status.consecutive_failed_ticks
                );
                tracing::error!("Poller unhealthy: {}", message);
                status.last_error = Some(message);
            }
        } else if status.consecutive_failed_ticks > 0 {
            if status.last_error.take().is_some() {
                tracing::info!("Poller recovered, mailbox access restored");
            }
            status.consecutive_failed_ticks = 0;
        }
    }
}

/// Sleep for `total`, waking early when `running` is cleared
fn sleep_while(running: &AtomicBool, total: Duration) {
    let deadline = Instant::now() + total;
    let slice = Duration::from_millis(25);
    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::sleep(slice.min(deadline - now));
    }
}
