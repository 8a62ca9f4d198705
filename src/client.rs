//! Client side of the bridge
//!
//! The client never talks to the server directly. It drops a request file,
//! then sleeps and re-checks for the matching response until it shows up
//! or the wait budget runs out.
//!
//! ```no_run
//! use std::time::Duration;
//! use mailbridge::client::BridgeClient;
//! use mailbridge::mailbox::Params;
//!
//! let client = BridgeClient::new("/tmp/mailbox")?;
//! let result = client.call("list_commands", Params::new(), Duration::from_secs(5))?;
//! println!("{}", result);
//! # Ok::<(), mailbridge::BridgeError>(())
//! ```

use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::config::ClientConfig;
use crate::error::{BridgeError, Result};
use crate::mailbox::{
    Mailbox, Params, Request, RequestId, Response, RetireMode, READY_FILE, STATUS_FILE,
};
use crate::registry::builtin;
use crate::server::beacon::{read_beacon, read_status, BeaconRecord, ServerStatusRecord};

/// What a probe found on disk
#[derive(Debug, Clone, Default)]
pub struct ServerProbe {
    pub beacons: Vec<BeaconRecord>,
    pub status: Option<ServerStatusRecord>,
}

impl ServerProbe {
    /// A beacon is present and the status record does not say stopped.
    ///
    /// Advisory: a crashed server leaves its beacons behind.
    pub fn is_live(&self) -> bool {
        !self.beacons.is_empty() && !self.status.as_ref().is_some_and(|s| s.is_stopped())
    }

    pub fn newest_beacon(&self) -> Option<&BeaconRecord> {
        self.beacons.iter().max_by_key(|b| b.written_at)
    }
}

/// Writes requests into a mailbox and waits for their responses
#[derive(Debug, Clone)]
pub struct BridgeClient {
    mailbox: Mailbox,
    poll_interval: Duration,
    default_timeout: Duration,
    beacon_paths: Vec<PathBuf>,
    keep_responses: bool,
}

impl BridgeClient {
    /// Client with default settings for the given mailbox directory
    pub fn new(mailbox_dir: impl Into<PathBuf>) -> Result<Self> {
        Self::from_config(&ClientConfig::for_mailbox(mailbox_dir))
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Ok(Self {
            mailbox: Mailbox::open(&config.mailbox)?,
            poll_interval: config.poll_interval(),
            default_timeout: config.timeout(),
            beacon_paths: config.beacon_paths.clone(),
            keep_responses: config.keep_responses,
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Leave response files on disk after reading them
    pub fn keep_responses(mut self, keep: bool) -> Self {
        self.keep_responses = keep;
        self
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Write a request and return a handle for collecting its response
    pub fn submit(&self, command: &str, params: Params) -> Result<PendingCall<'_>> {
        let id = RequestId::generate();
        let path = self
            .mailbox
            .write_request(&Request::new(id.clone(), command, params))?;
        tracing::debug!("Submitted {} as {}", command, id);
        Ok(PendingCall {
            client: self,
            id,
            path,
        })
    }

    /// Submit and wait up to `timeout` for the result.
    ///
    /// On timeout the request file stays where it is; the server may still
    /// answer it, and [`check_response`](Self::check_response) picks that up.
    pub fn call(&self, command: &str, params: Params, timeout: Duration) -> Result<Value> {
        self.submit(command, params)?.wait(timeout)
    }

    /// [`call`](Self::call) with the configured default timeout
    pub fn call_default(&self, command: &str, params: Params) -> Result<Value> {
        self.call(command, params, self.default_timeout)
    }

    /// Look once for the response to an earlier request.
    ///
    /// `Ok(None)` when it has not arrived yet. A found response is consumed
    /// unless the client keeps responses.
    pub fn check_response(&self, id: &RequestId) -> Result<Option<Value>> {
        match self.mailbox.read_response(id)? {
            Some(response) => self.finish(id, response).map(Some),
            None => Ok(None),
        }
    }

    /// Wait up to `timeout` for the response to an earlier request
    pub fn wait_response(&self, id: &RequestId, timeout: Duration) -> Result<Value> {
        let started = Instant::now();
        let deadline = started + timeout;

        loop {
            match self.mailbox.read_response(id) {
                Ok(Some(response)) => return self.finish(id, response),
                Ok(None) => {}
                // Possibly caught mid-write: not ready until the deadline says otherwise
                Err(BridgeError::Protocol { message }) => {
                    if Instant::now() >= deadline {
                        return Err(BridgeError::Protocol { message });
                    }
                }
                Err(e) => return Err(e),
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::debug!("Gave up on {} after {:?}", id, now - started);
                return Err(BridgeError::ClientTimeout {
                    id: id.to_string(),
                    waited_ms: (now - started).as_millis() as u64,
                });
            }
            thread::sleep(self.poll_interval.min(deadline - now));
        }
    }

    fn finish(&self, id: &RequestId, response: Response) -> Result<Value> {
        if &response.id != id {
            return Err(BridgeError::Protocol {
                message: format!("response for {} carries id {}", id, response.id),
            });
        }
        if !self.keep_responses {
            self.discard_answered(id);
        }
        response.into_result()
    }

    /// Remove a consumed response. The request file goes first: a server
    /// that stopped between publishing and retiring would otherwise find an
    /// unanswered request and run the handler again.
    fn discard_answered(&self, id: &RequestId) {
        let request = self.mailbox.request_path(id);
        if let Err(e) = self.mailbox.retire(id, &request, RetireMode::Delete) {
            tracing::warn!("Keeping response {}, request still present: {}", id, e);
            return;
        }
        if let Err(e) = self.mailbox.remove_response(id) {
            tracing::warn!("Could not remove response {}: {}", id, e);
        }
    }

    /// Drop a fire-and-forget signal file into the mailbox
    pub fn send_signal(&self, file_name: &str, text: &str) -> Result<PathBuf> {
        self.mailbox.write_signal(file_name, text)
    }

    /// Whether the signal file was picked up within `timeout`
    pub fn wait_signal_consumed(&self, file_name: &str, timeout: Duration) -> bool {
        let path = self.mailbox.signal_path(file_name);
        let deadline = Instant::now() + timeout;
        loop {
            if !path.exists() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(self.poll_interval.min(deadline - now));
        }
    }

    /// Collect ready beacons and the status record
    pub fn probe(&self) -> ServerProbe {
        let mut paths = vec![self.mailbox.root().join(READY_FILE)];
        paths.extend(self.beacon_paths.iter().map(|p| beacon_file(p)));

        ServerProbe {
            beacons: paths.iter().filter_map(|p| read_beacon(p)).collect(),
            status: read_status(&self.mailbox.root().join(STATUS_FILE)),
        }
    }

    /// Probe until a server looks live or `budget` runs out
    pub fn wait_for_ready(&self, budget: Duration) -> Option<ServerProbe> {
        let deadline = Instant::now() + budget;
        loop {
            let probe = self.probe();
            if probe.is_live() {
                return Some(probe);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            thread::sleep(self.poll_interval.min(deadline - now));
        }
    }

    /// Round trip through `ping`; returns how long it took
    pub fn ping(&self, timeout: Duration) -> Result<Duration> {
        let started = Instant::now();
        self.call(builtin::PING, Params::new(), timeout)?;
        Ok(started.elapsed())
    }
}

fn beacon_file(path: &Path) -> PathBuf {
    if path.is_dir() {
        path.join(READY_FILE)
    } else {
        path.to_path_buf()
    }
}

/// A submitted request whose response has not been collected yet
#[derive(Debug)]
pub struct PendingCall<'a> {
    client: &'a BridgeClient,
    id: RequestId,
    path: PathBuf,
}

impl PendingCall<'_> {
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Path of the request file as written
    pub fn request_path(&self) -> &Path {
        &self.path
    }

    /// Wait up to `timeout` for the response
    pub fn wait(self, timeout: Duration) -> Result<Value> {
        self.client.wait_response(&self.id, timeout)
    }

    /// Look once without waiting
    pub fn check(&self) -> Result<Option<Value>> {
        self.client.check_response(&self.id)
    }
}
