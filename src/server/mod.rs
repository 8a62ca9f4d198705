//! Mailbox server
//!
//! The server side of the bridge: a poller thread that answers requests
//! dropped into one or more mailbox directories.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          BridgeServer                            │
//! │   LifecycleState · MailboxClaim · ReadyBeacon                    │
//! │                                                                  │
//! │   ┌────────────────── poller thread ─────────────────────────┐   │
//! │   │ DirectoryPoller                                          │   │
//! │   │   for mailbox in mailboxes:                              │   │
//! │   │     Requests  ─► HandlerRegistry ─► response + retire    │   │
//! │   │     Signal(f) ─► claim ─► signal handler                 │   │
//! │   └───────────────────────────┬──────────────────────────────┘   │
//! │                               │ HostThread handlers              │
//! │                               ▼                                  │
//! │                        ThreadMarshal ──► privileged host thread  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Locking Order
//!
//! 1. `BridgeServer::control` (start/stop)
//! 2. `BridgeServer::state`
//! 3. `PollerStatus`
//!
//! Handlers run without any of these held.
//!
//! # Modules
//!
//! - `poller` - Scan/dispatch/respond loop
//! - `lifecycle` - Start/stop, single-poller claim
//! - `beacon` - Ready beacons and status record

pub mod beacon;
pub mod lifecycle;
pub mod poller;

pub use beacon::{read_beacon, read_status, BeaconRecord, ReadyBeacon, ServerStatusRecord};
pub use lifecycle::{BridgeServer, LifecycleState, StartOutcome, StopOutcome};
pub use poller::{Channel, DirectoryPoller, PollerConfig, PollerPhase, PollerStatus, TickReport};
