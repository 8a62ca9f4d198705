//! Readiness beacon and status record
//!
//! A running server keeps two kinds of artifacts on disk:
//!
//! - `server_ready.txt` in every mailbox (plus any extra configured paths):
//!   `"<status> - <RFC 2822 timestamp>"`. Advisory only; a crashed server
//!   leaves a stale one behind, and judging staleness is the reader's job.
//! - `server_status.json` in the primary mailbox: a structured snapshot of
//!   what the server listens on and answers to.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::fs_utils;
use crate::mailbox::{Mailbox, READY_FILE, STATUS_FILE};
use crate::registry::CommandInfo;

/// Status text used once the server has shut down
pub const STOPPED_STATUS: &str = "stopped";

/// One readiness beacon as found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconRecord {
    pub path: PathBuf,
    pub written_at: DateTime<FixedOffset>,
    pub status: String,
}

impl BeaconRecord {
    /// Time since the beacon was written (zero if the clock went backwards)
    pub fn age(&self) -> chrono::Duration {
        let age = Utc::now().signed_duration_since(self.written_at);
        age.max(chrono::Duration::zero())
    }
}

/// Structured server snapshot written to `server_status.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStatusRecord {
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub pid: u32,
    pub version: String,
    pub mailboxes: Vec<PathBuf>,
    #[serde(default)]
    pub commands: Vec<CommandInfo>,
    #[serde(default)]
    pub signals: Vec<String>,
}

impl ServerStatusRecord {
    pub fn new(status: impl Into<String>, mailboxes: Vec<PathBuf>) -> Self {
        let now = Utc::now();
        Self {
            status: status.into(),
            started_at: now,
            updated_at: now,
            pid: std::process::id(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            mailboxes,
            commands: Vec::new(),
            signals: Vec::new(),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.status == STOPPED_STATUS
    }
}

/// Beacon text: `"<status> - <timestamp>"`
pub fn format_beacon(status: &str, at: DateTime<Local>) -> String {
    format!("{} - {}", status, at.to_rfc2822())
}

/// Parse a beacon file; `None` when missing or unrecognizable
pub fn read_beacon(path: &Path) -> Option<BeaconRecord> {
    let content = fs::read_to_string(path).ok()?;
    let (status, stamp) = content.trim().rsplit_once(" - ")?;
    let written_at = DateTime::parse_from_rfc2822(stamp.trim()).ok()?;
    Some(BeaconRecord {
        path: path.to_path_buf(),
        written_at,
        status: status.to_string(),
    })
}

/// Parse a status record; `None` when missing or unrecognizable
pub fn read_status(path: &Path) -> Option<ServerStatusRecord> {
    let content = fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

/// Writes and retracts the readiness artifacts of one server
#[derive(Debug, Clone)]
pub struct ReadyBeacon {
    paths: Vec<PathBuf>,
    status_path: Option<PathBuf>,
}

impl ReadyBeacon {
    /// Beacons in every mailbox plus `extra`; status record in the first
    /// mailbox.
    ///
    /// An `extra` path naming an existing directory gets `server_ready.txt`
    /// inside it.
    pub fn for_mailboxes(mailboxes: &[Mailbox], extra: &[PathBuf]) -> Self {
        let mut paths: Vec<PathBuf> = mailboxes
            .iter()
            .map(|m| m.root().join(READY_FILE))
            .collect();
        for path in extra {
            let path = if path.is_dir() {
                path.join(READY_FILE)
            } else {
                path.clone()
            };
            if !paths.contains(&path) {
                paths.push(path);
            }
        }

        Self {
            paths,
            status_path: mailboxes.first().map(|m| m.root().join(STATUS_FILE)),
        }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn status_path(&self) -> Option<&Path> {
        self.status_path.as_deref()
    }

    /// Write every beacon and the status record.
    ///
    /// Failures are logged and skipped; returns the beacons that were written.
    pub fn announce(&self, record: &ServerStatusRecord) -> Vec<BeaconRecord> {
        let now = Local::now();
        let text = format_beacon(&record.status, now);
        let mut written = Vec::new();

        for path in &self.paths {
            let result = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map_or(Ok(()), fs::create_dir_all)
                .and_then(|()| fs_utils::write_atomic(path, text.as_bytes()));
            match result {
                Ok(()) => {
                    tracing::debug!("Wrote ready beacon {}", path.display());
                    written.push(BeaconRecord {
                        path: path.clone(),
                        written_at: now.with_timezone(now.offset()),
                        status: record.status.clone(),
                    });
                }
                Err(e) => tracing::warn!("Could not write ready beacon {}: {}", path.display(), e),
            }
        }

        self.write_status(record);
        written
    }

    /// Remove the beacons and mark the status record stopped
    pub fn retract(&self, record: &ServerStatusRecord) {
        for path in &self.paths {
            if let Err(e) = fs_utils::remove_if_exists(path) {
                tracing::warn!("Could not remove ready beacon {}: {}", path.display(), e);
            }
        }

        let mut stopped = record.clone();
        stopped.status = STOPPED_STATUS.to_string();
        stopped.updated_at = Utc::now();
        self.write_status(&stopped);
    }

    fn write_status(&self, record: &ServerStatusRecord) {
        let Some(path) = &self.status_path else {
            return;
        };
        let result = serde_json::to_vec_pretty(record)
            .map_err(std::io::Error::from)
            .and_then(|bytes| fs_utils::write_atomic(path, &bytes));
        if let Err(e) = result {
            tracing::warn!("Could not write status record {}: {}", path.display(), e);
        }
    }
}
