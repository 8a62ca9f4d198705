//! Command modules for the mailbridge CLI
//!
//! ## Architecture
//!
//! Each command module implements one side of the bridge:
//! - `serve` - Demo host running a server on the main thread's behalf
//! - `call` - Client commands (call, check, signal)
//! - `status` - Beacon and status-record inspection
//!
//! All command handlers take their respective `Args` struct from `cli.rs`
//! and a shared `CommandContext` carrying the output format and the loaded
//! configuration. They return the text to print on stdout.

pub mod call;
pub mod serve;
pub mod status;

pub use call::{run_call, run_check, run_signal};
pub use serve::run_serve;
pub use status::run_status;

use std::time::Duration;

use crate::cli::OutputFormat;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};

/// Shared context passed to all command handlers
#[derive(Debug, Clone, Default)]
pub struct CommandContext {
    /// Output format (text or json)
    pub format: OutputFormat,
    /// Configuration file contents, before per-command flags
    pub config: BridgeConfig,
}

impl CommandContext {
    pub fn new(format: OutputFormat, config: BridgeConfig) -> Self {
        Self { format, config }
    }
}

/// Seconds from a CLI flag
pub(crate) fn secs(value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value).map_err(|_| BridgeError::Config {
        message: format!("invalid duration: {} seconds", value),
    })
}

pub(crate) fn to_json(value: &serde_json::Value) -> String {
    let mut out = serde_json::to_string_pretty(value).unwrap_or_default();
    out.push('\n');
    out
}
