//! Error types and exit codes for mailbridge

use std::path::PathBuf;
use std::process::ExitCode;
use thiserror::Error;

use crate::marshal::MarshalError;
use crate::registry::HandlerError;

/// Main error type for mailbridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    /// A configured mailbox is inaccessible (missing, permissions, vanished)
    #[error("Mailbox {path} is inaccessible: {message}")]
    Transport { path: PathBuf, message: String },

    /// Malformed request or response content
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Unknown command: {name}")]
    UnknownCommand { name: String },

    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error(transparent)]
    Marshal(#[from] MarshalError),

    /// No response arrived within the client's wait budget.
    /// The request file is left in place and may still be answered.
    #[error("Timed out after {waited_ms}ms waiting for response {id}")]
    ClientTimeout { id: String, waited_ms: u64 },

    /// The server answered with `success: false`
    #[error("Request {id} failed: {message}")]
    Remote {
        id: String,
        message: String,
        traceback: Option<String>,
    },

    #[error("Another poller is already active on mailbox {path}")]
    AlreadyActive { path: PathBuf },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BridgeError {
    /// Build a transport error from an IO failure on a mailbox path
    pub fn transport(path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        Self::Transport {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// Diagnostic trace carried into error responses, when there is one
    pub fn traceback(&self) -> Option<String> {
        match self {
            Self::Handler(e) => e.traceback.clone(),
            Self::Remote { traceback, .. } => traceback.clone(),
            _ => None,
        }
    }

    /// Convert error to the CLI exit code:
    /// - 1: IO / transport failure
    /// - 2: Configuration error
    /// - 3: Protocol error (malformed files)
    /// - 4: Remote failure (unknown command, handler, marshal)
    /// - 5: Timed out waiting for a response
    /// - 6: Poller already active
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Transport { .. } | Self::Io(_) => ExitCode::from(1),
            Self::Config { .. } => ExitCode::from(2),
            Self::Protocol { .. } | Self::Json(_) => ExitCode::from(3),
            Self::UnknownCommand { .. }
            | Self::Handler(_)
            | Self::Marshal(_)
            | Self::Remote { .. } => ExitCode::from(4),
            Self::ClientTimeout { .. } => ExitCode::from(5),
            Self::AlreadyActive { .. } => ExitCode::from(6),
        }
    }
}

/// Result type alias for mailbridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;
