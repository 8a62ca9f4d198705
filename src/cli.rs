//! CLI argument definitions using clap with subcommand architecture
//!
//! Every subcommand reads `config.toml` first; flags given here override
//! the corresponding file values.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::BridgeConfig;
use crate::mailbox::{RetireMode, DEFAULT_SIGNAL_FILE};

/// Filesystem-mailbox RPC bridge
#[derive(Parser, Debug)]
#[command(name = "mailbridge")]
#[command(about = "Request/response RPC over shared mailbox directories")]
#[command(version)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (default: <config dir>/mailbridge/config.toml)
    #[arg(long, value_name = "FILE", global = true, env = "MAILBRIDGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format (applies to all commands)
    #[arg(short, long, default_value = "text", value_enum, global = true)]
    pub format: OutputFormat,

    /// Log at debug level regardless of the configured level
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

// ============================================
// Main Commands Enum
// ============================================

/// Available subcommands for mailbridge
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a demo host: poll the mailboxes and answer requests
    Serve(ServeArgs),

    /// Send a request and wait for its response
    #[command(visible_alias = "c")]
    Call(CallArgs),

    /// Look for the response to an earlier request by id
    Check(CheckArgs),

    /// Drop a fire-and-forget signal file
    Signal(SignalArgs),

    /// Show ready beacons and the server status record
    Status(StatusArgs),
}

// ============================================
// Shared Arguments
// ============================================

/// Mailbox selection shared by the client commands
#[derive(Args, Debug, Clone, Default)]
pub struct MailboxArgs {
    /// Mailbox directory (default: from config)
    #[arg(short, long, value_name = "DIR")]
    pub mailbox: Option<PathBuf>,
}

// ============================================
// Serve Subcommand
// ============================================

/// Arguments for the serve command
#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Mailbox directory; repeat for several (default: from config)
    #[arg(short, long = "mailbox", value_name = "DIR")]
    pub mailboxes: Vec<PathBuf>,

    /// Poll interval in milliseconds
    #[arg(long, value_name = "MS")]
    pub interval_ms: Option<u64>,

    /// What to do with answered requests
    #[arg(long, value_enum)]
    pub retire: Option<RetireArg>,

    /// Extra ready-beacon location; repeat for several
    #[arg(long = "beacon", value_name = "PATH")]
    pub beacons: Vec<PathBuf>,

    /// Exit after this many seconds (default: run until a shutdown signal)
    #[arg(long, value_name = "SECS")]
    pub duration_secs: Option<u64>,
}

// ============================================
// Client Subcommands
// ============================================

/// Arguments for the call command
#[derive(Args, Debug)]
pub struct CallArgs {
    /// Command name
    #[arg(value_name = "COMMAND")]
    pub command: String,

    /// Parameters as a JSON object
    #[arg(short, long, value_name = "JSON", default_value = "{}")]
    pub params: String,

    #[command(flatten)]
    pub mailbox: MailboxArgs,

    /// Seconds to wait for the response (default: from config)
    #[arg(short, long, value_name = "SECS")]
    pub timeout: Option<f64>,

    /// Leave the response file in the mailbox
    #[arg(long)]
    pub keep: bool,
}

/// Arguments for the check command
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Request id printed by an earlier call
    #[arg(value_name = "ID")]
    pub id: String,

    #[command(flatten)]
    pub mailbox: MailboxArgs,

    /// Keep waiting this many seconds (default: look once)
    #[arg(short, long, value_name = "SECS")]
    pub wait: Option<f64>,
}

/// Arguments for the signal command
#[derive(Args, Debug)]
pub struct SignalArgs {
    /// Message text
    #[arg(value_name = "TEXT")]
    pub text: String,

    /// Signal file name
    #[arg(long, value_name = "NAME", default_value = DEFAULT_SIGNAL_FILE)]
    pub file: String,

    #[command(flatten)]
    pub mailbox: MailboxArgs,

    /// Wait this many seconds for the server to consume it
    #[arg(short, long, value_name = "SECS")]
    pub wait: Option<f64>,
}

/// Arguments for the status command
#[derive(Args, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub mailbox: MailboxArgs,

    /// Wait up to this many seconds for a live server
    #[arg(short, long, value_name = "SECS")]
    pub wait: Option<f64>,

    /// Also round-trip a ping
    #[arg(long)]
    pub ping: bool,
}

// ============================================
// Shared Types
// ============================================

/// Output format options
#[derive(Clone, Copy, Debug, Default, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text (default)
    #[default]
    Text,
    /// JSON for machine parsing
    Json,
}

/// Retirement mode as spelled on the command line
#[derive(Clone, Copy, Debug, PartialEq, ValueEnum)]
pub enum RetireArg {
    /// Rename to processed_command_<id>.json
    Rename,
    /// Delete the request file
    Delete,
}

impl From<RetireArg> for RetireMode {
    fn from(arg: RetireArg) -> Self {
        match arg {
            RetireArg::Rename => RetireMode::Rename,
            RetireArg::Delete => RetireMode::Delete,
        }
    }
}

// ============================================
// Helper Implementations
// ============================================

impl Cli {
    /// Load the config file named on the command line, or the default one
    pub fn load_config(&self) -> crate::Result<BridgeConfig> {
        match &self.config {
            Some(path) => BridgeConfig::load_from(path),
            None => BridgeConfig::load(),
        }
    }
}

impl ServeArgs {
    /// Fold the flags into a loaded configuration
    pub fn apply(&self, config: &mut BridgeConfig) {
        if !self.mailboxes.is_empty() {
            config.server.mailboxes = self.mailboxes.clone();
        }
        if let Some(ms) = self.interval_ms {
            config.server.poll_interval_ms = ms;
        }
        if let Some(retire) = self.retire {
            config.server.retire = retire.into();
        }
        config.server.beacon_paths.extend(self.beacons.iter().cloned());
    }
}

impl MailboxArgs {
    /// Fold the flag into a loaded configuration
    pub fn apply(&self, config: &mut BridgeConfig) {
        if let Some(mailbox) = &self.mailbox {
            config.client.mailbox = mailbox.clone();
        }
    }
}
