//! Common test utilities and fixtures for mailbridge integration tests
//!
//! This module provides:
//! - `TestBridge` builder wiring a server and clients to temporary mailboxes
//! - Custom assertions over mailbox contents

#![allow(unused_imports)]
#![allow(dead_code)]

pub mod test_bridge;

pub use assertions::*;
pub use test_bridge::{eventually, TestBridge, FAST_TICK};
