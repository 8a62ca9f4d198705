//! Built-in commands every bridge answers

use std::sync::{Arc, Weak};

use serde_json::{json, Value};

use super::{Affinity, HandlerError, HandlerRegistry};

pub const PING: &str = "ping";
pub const LIST_COMMANDS: &str = "list_commands";
pub const ECHO: &str = "echo";

/// Install `ping` and `list_commands`
pub fn install(registry: &Arc<HandlerRegistry>) {
    registry.register_described(
        PING,
        "No-op round trip used to check that a server is answering",
        Affinity::AnyThread,
        |_| Ok(json!({ "pong": true, "time": chrono::Utc::now().to_rfc3339() })),
    );

    // Weak: the registry owns this handler
    let weak: Weak<HandlerRegistry> = Arc::downgrade(registry);
    registry.register_described(
        LIST_COMMANDS,
        "List registered commands with their descriptions",
        Affinity::AnyThread,
        move |_| {
            let registry = weak
                .upgrade()
                .ok_or_else(|| HandlerError::new("registry is gone"))?;
            Ok(serde_json::to_value(registry.commands())?)
        },
    );
}

/// Install `echo`, which answers with its own parameters
pub fn install_echo(registry: &HandlerRegistry) {
    registry.register_described(
        ECHO,
        "Return the parameters unchanged",
        Affinity::AnyThread,
        |params| Ok(Value::Object(params)),
    );
}
