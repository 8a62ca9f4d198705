//! Handler registry
//!
//! Maps command names to handlers and signal file names to signal handlers.
//! Handlers never see mailbox files or ids; they get a parameter bag and
//! return a JSON value or a [`HandlerError`].
//!
//! The registry is shared behind a `RwLock`, so handlers can be registered
//! while a poller is already running.

pub mod builtin;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::mailbox::Params;

/// Failure reported by a handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    pub message: String,
    pub traceback: Option<String>,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            traceback: None,
        }
    }

    pub fn with_traceback(message: impl Into<String>, traceback: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            traceback: Some(traceback.into()),
        }
    }

    /// Error for a handler that panicked instead of returning
    pub fn panicked(payload: &(dyn std::any::Any + Send)) -> Self {
        let detail = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self::new(format!("handler panicked: {}", detail))
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HandlerError {}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        // `{:?}` on anyhow prints the cause chain and, when captured, a backtrace
        Self::with_traceback(err.to_string(), format!("{:?}", err))
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(format!("invalid parameters: {}", err))
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Which thread a handler may run on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Affinity {
    /// Safe to run on the poller thread
    AnyThread,
    /// Must run on the host's privileged thread
    HostThread,
}

pub type HandlerResult = std::result::Result<Value, HandlerError>;
pub type CommandFn = Arc<dyn Fn(Params) -> HandlerResult + Send + Sync>;
pub type SignalFn = Arc<dyn Fn(&str) -> std::result::Result<(), HandlerError> + Send + Sync>;

/// A registered command
#[derive(Clone)]
pub struct CommandEntry {
    pub name: String,
    pub description: String,
    pub affinity: Affinity,
    handler: CommandFn,
}

impl CommandEntry {
    pub fn handler(&self) -> CommandFn {
        Arc::clone(&self.handler)
    }
}

impl fmt::Debug for CommandEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandEntry")
            .field("name", &self.name)
            .field("affinity", &self.affinity)
            .finish_non_exhaustive()
    }
}

/// A registered signal handler
#[derive(Clone)]
pub struct SignalEntry {
    pub file_name: String,
    pub affinity: Affinity,
    handler: SignalFn,
}

impl SignalEntry {
    pub fn handler(&self) -> SignalFn {
        Arc::clone(&self.handler)
    }
}

/// Public description of a command, as listed by `list_commands`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandInfo {
    pub name: String,
    pub description: String,
    pub host_thread: bool,
}

/// Command and signal handler table
#[derive(Default)]
pub struct HandlerRegistry {
    commands: RwLock<BTreeMap<String, CommandEntry>>,
    signals: RwLock<BTreeMap<String, SignalEntry>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with `ping` and `list_commands`
    pub fn with_builtins() -> Arc<Self> {
        let registry = Arc::new(Self::new());
        builtin::install(&registry);
        registry
    }

    /// Register a command, replacing any previous handler of that name
    pub fn register<F>(&self, name: impl Into<String>, affinity: Affinity, handler: F)
    where
        F: Fn(Params) -> HandlerResult + Send + Sync + 'static,
    {
        self.register_described(name, "", affinity, handler);
    }

    /// Register a command with a description shown by `list_commands`
    pub fn register_described<F>(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        affinity: Affinity,
        handler: F,
    ) where
        F: Fn(Params) -> HandlerResult + Send + Sync + 'static,
    {
        let name = name.into();
        let entry = CommandEntry {
            name: name.clone(),
            description: description.into(),
            affinity,
            handler: Arc::new(handler),
        };
        if self.commands.write().insert(name.clone(), entry).is_some() {
            tracing::debug!("Replaced handler for command {}", name);
        }
    }

    /// Remove a command; returns whether it was registered
    pub fn unregister(&self, name: &str) -> bool {
        self.commands.write().remove(name).is_some()
    }

    /// Register the handler for a signal file such as `message_box.txt`
    pub fn register_signal<F>(&self, file_name: impl Into<String>, affinity: Affinity, handler: F)
    where
        F: Fn(&str) -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
    {
        let file_name = file_name.into();
        let entry = SignalEntry {
            file_name: file_name.clone(),
            affinity,
            handler: Arc::new(handler),
        };
        self.signals.write().insert(file_name, entry);
    }

    /// Exact-name lookup
    pub fn lookup(&self, name: &str) -> Option<CommandEntry> {
        self.commands.read().get(name).cloned()
    }

    pub fn signal(&self, file_name: &str) -> Option<SignalEntry> {
        self.signals.read().get(file_name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.read().contains_key(name)
    }

    /// All commands, sorted by name
    pub fn commands(&self) -> Vec<CommandInfo> {
        self.commands
            .read()
            .values()
            .map(|entry| CommandInfo {
                name: entry.name.clone(),
                description: entry.description.clone(),
                host_thread: entry.affinity == Affinity::HostThread,
            })
            .collect()
    }

    pub fn signal_files(&self) -> Vec<String> {
        self.signals.read().keys().cloned().collect()
    }
}
