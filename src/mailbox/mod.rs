//! Mailbox directories and their file-naming convention
//!
//! A mailbox is a plain directory shared by a client and a server:
//!
//! ```text
//! mailbox/
//! ├── command_<id>.json            request, written by the client
//! ├── response_<id>.json           response, written once by the server
//! ├── processed_command_<id>.json  retired request
//! ├── message_box.txt              signal file (fire-and-forget)
//! ├── processed_message_box_<ms>_<rand>.txt
//! ├── server_ready.txt             ready beacon
//! └── server_status.json           status record
//! ```
//!
//! Requests are renamed into place from a hidden temporary, responses are
//! published with create-new semantics. Nothing else coordinates the two
//! sides.

pub mod protocol;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};
use crate::fs_utils;

pub use protocol::{Params, Request, RequestId, Response};

pub const REQUEST_PREFIX: &str = "command_";
pub const RESPONSE_PREFIX: &str = "response_";
pub const PROCESSED_PREFIX: &str = "processed_";
pub const MESSAGE_SUFFIX: &str = ".json";
pub const READY_FILE: &str = "server_ready.txt";
pub const STATUS_FILE: &str = "server_status.json";
pub const DEFAULT_SIGNAL_FILE: &str = "message_box.txt";

/// What happens to a request file once it has been answered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetireMode {
    /// Rename to `processed_command_<id>.json`
    #[default]
    Rename,
    /// Delete the request file
    Delete,
}

/// A request file found during a scan
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub path: PathBuf,
    /// `None` when no id can be recovered from the file name
    pub id: Option<RequestId>,
}

/// Classify a directory entry name.
///
/// Returns `None` for anything that is not a request file,
/// `Some(None)` for a request file whose id is unusable.
pub fn parse_request_name(name: &str) -> Option<Option<RequestId>> {
    let raw = name
        .strip_prefix(REQUEST_PREFIX)?
        .strip_suffix(MESSAGE_SUFFIX)?;
    Some(RequestId::parse(raw))
}

/// One mailbox directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    root: PathBuf,
}

impl Mailbox {
    /// Refer to a mailbox without touching the filesystem
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Refer to a mailbox, creating its directory if absent
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let mailbox = Self::new(root);
        mailbox.ensure()?;
        Ok(mailbox)
    }

    /// Create the directory if absent (idempotent)
    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.root).map_err(|e| BridgeError::transport(&self.root, &e))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn request_path(&self, id: &RequestId) -> PathBuf {
        self.root.join(format!("{}{}{}", REQUEST_PREFIX, id, MESSAGE_SUFFIX))
    }

    pub fn response_path(&self, id: &RequestId) -> PathBuf {
        self.root.join(format!("{}{}{}", RESPONSE_PREFIX, id, MESSAGE_SUFFIX))
    }

    pub fn processed_path(&self, id: &RequestId) -> PathBuf {
        self.root.join(format!(
            "{}{}{}{}",
            PROCESSED_PREFIX, REQUEST_PREFIX, id, MESSAGE_SUFFIX
        ))
    }

    pub fn signal_path(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }

    /// List request files currently in the mailbox (unordered)
    pub fn pending_requests(&self) -> Result<Vec<PendingRequest>> {
        let entries =
            fs::read_dir(&self.root).map_err(|e| BridgeError::transport(&self.root, &e))?;

        let mut pending = Vec::new();
        for entry in entries {
            // An entry vanishing between listing and inspection is normal
            let Ok(entry) = entry else { continue };
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(id) = parse_request_name(name) {
                pending.push(PendingRequest {
                    path: entry.path(),
                    id,
                });
            }
        }
        Ok(pending)
    }

    pub fn has_response(&self, id: &RequestId) -> bool {
        self.response_path(id).exists()
    }

    /// Whether a processed marker exists for this id
    pub fn is_retired(&self, id: &RequestId) -> bool {
        self.processed_path(id).exists()
    }

    /// Write a request file; it becomes visible to pollers in one step
    pub fn write_request(&self, request: &Request) -> Result<PathBuf> {
        let id = request.id.as_ref().ok_or_else(|| BridgeError::Protocol {
            message: "request written without an id".to_string(),
        })?;
        let path = self.request_path(id);
        let body = serde_json::to_vec_pretty(request)?;
        fs_utils::write_atomic(&path, &body).map_err(|e| BridgeError::transport(&self.root, &e))?;
        Ok(path)
    }

    /// Read and parse a request file
    pub fn read_request(&self, path: &Path) -> Result<Request> {
        let body = fs::read(path)?;
        serde_json::from_slice(&body).map_err(|e| BridgeError::Protocol {
            message: format!("Invalid request {}: {}", path.display(), e),
        })
    }

    /// Publish a response unless one already exists for its id.
    ///
    /// Returns `Ok(false)` when a response was already there; the existing
    /// file is never modified.
    pub fn publish_response(&self, response: &Response) -> Result<bool> {
        let path = self.response_path(&response.id);
        let body = serde_json::to_vec_pretty(response)?;
        fs_utils::publish_exclusive(&path, &body).map_err(|e| BridgeError::transport(&self.root, &e))
    }

    /// Read the response for an id, if it is there.
    ///
    /// A response that exists but does not parse is reported as a protocol
    /// error; callers still waiting may treat that as "not complete yet".
    pub fn read_response(&self, id: &RequestId) -> Result<Option<Response>> {
        let path = self.response_path(id);
        let body = match fs::read(&path) {
            Ok(body) => body,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|e| BridgeError::Protocol {
                message: format!("Invalid response {}: {}", path.display(), e),
            })
    }

    pub fn remove_response(&self, id: &RequestId) -> Result<()> {
        fs_utils::remove_if_exists(&self.response_path(id))?;
        Ok(())
    }

    /// Retire a request file so it is never matched again
    pub fn retire(&self, id: &RequestId, request_path: &Path, mode: RetireMode) -> Result<()> {
        let processed = self.processed_path(id);
        match mode {
            RetireMode::Rename if !processed.exists() => {
                fs_utils::atomic_rename(request_path, &processed)?
            }
            // A marker is already there: the straggler only needs to go
            RetireMode::Rename | RetireMode::Delete => fs_utils::remove_if_exists(request_path)?,
        }
        Ok(())
    }

    /// Write a signal file atomically
    pub fn write_signal(&self, file_name: &str, text: &str) -> Result<PathBuf> {
        let path = self.signal_path(file_name);
        fs_utils::write_atomic(&path, text.as_bytes())
            .map_err(|e| BridgeError::transport(&self.root, &e))?;
        Ok(path)
    }

    /// Claim a signal file by renaming it out of the way.
    ///
    /// Returns the claimed path, or `None` when there is no signal pending.
    /// Only one claimer can win the rename.
    pub fn claim_signal(&self, file_name: &str) -> Result<Option<PathBuf>> {
        let source = self.signal_path(file_name);
        let claimed = self.root.join(processed_signal_name(file_name));
        match fs::rename(&source, &claimed) {
            Ok(()) => Ok(Some(claimed)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// `message_box.txt` -> `processed_message_box_<millis>_<rand>.txt`
fn processed_signal_name(file_name: &str) -> String {
    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string());
    let millis = chrono::Utc::now().timestamp_millis();
    let unique = uuid::Uuid::new_v4().simple().to_string();
    match path.extension() {
        Some(ext) => format!(
            "{}{}_{}_{}.{}",
            PROCESSED_PREFIX,
            stem,
            millis,
            &unique[..6],
            ext.to_string_lossy()
        ),
        None => format!("{}{}_{}_{}", PROCESSED_PREFIX, stem, millis, &unique[..6]),
    }
}
