//! Mailbridge: request/response RPC over shared mailbox directories
//!
//! A host process that cannot open sockets (an embedded scripting runtime,
//! a sandboxed add-in) still usually shares a filesystem with its clients.
//! Mailbridge turns a directory into a mailbox: clients drop
//! `command_<id>.json`, a background poller in the host answers with
//! `response_<id>.json`.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use mailbridge::{BridgeClient, BridgeServer, HandlerRegistry, ServerConfig};
//! use mailbridge::mailbox::Params;
//!
//! // Host side
//! let registry = HandlerRegistry::with_builtins();
//! mailbridge::registry::builtin::install_echo(&registry);
//! let server = BridgeServer::new(ServerConfig::with_mailboxes(["/tmp/mailbox"]), registry);
//! server.start()?;
//!
//! // Client side, possibly another process
//! let client = BridgeClient::new("/tmp/mailbox")?;
//! let mut params = Params::new();
//! params.insert("x".into(), 1.into());
//! let echoed = client.call("echo", params, Duration::from_secs(5))?;
//! assert_eq!(echoed["x"], 1);
//!
//! server.stop();
//! # Ok::<(), mailbridge::BridgeError>(())
//! ```

pub mod cli;
pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod fs_utils;
pub mod mailbox;
pub mod marshal;
pub mod registry;
pub mod server;

// Re-export commonly used types
pub use cli::{Cli, OutputFormat};
pub use client::{BridgeClient, PendingCall, ServerProbe};
pub use config::{BridgeConfig, ClientConfig, LoggingConfig, ServerConfig};
pub use error::{BridgeError, Result};
pub use mailbox::{Mailbox, Params, Request, RequestId, Response, RetireMode};
pub use marshal::{host_channel, HostMarshal, HostPump, InlineMarshal, MarshalError, ThreadMarshal};
pub use registry::{Affinity, HandlerError, HandlerRegistry, HandlerResult};
pub use server::{
    BridgeServer, DirectoryPoller, LifecycleState, PollerConfig, PollerStatus, StartOutcome,
    StopOutcome,
};
