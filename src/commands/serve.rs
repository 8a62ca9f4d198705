//! Serve command handler
//!
//! Runs a demo host. The calling (main) thread plays the host's privileged
//! thread: it drives the [`HostPump`] while the poller runs in the
//! background, so `HostThread` handlers execute here.
//!
//! Besides the built-ins (`ping`, `list_commands`, `echo`) the demo host
//! answers:
//! - `message_box` (host thread): shows `params.message` on stderr
//! - `host_info` (host thread): reports which thread ran it
//! - signal `message_box.txt` (host thread): shows the text on stderr
//! - signal `shutdown.txt`: stops the host

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::json;

use crate::cli::{OutputFormat, ServeArgs};
use crate::commands::{to_json, CommandContext};
use crate::error::Result;
use crate::mailbox::DEFAULT_SIGNAL_FILE;
use crate::marshal::{host_channel, HostPump};
use crate::registry::{builtin, Affinity, HandlerError, HandlerRegistry};
use crate::server::{BridgeServer, PollerStatus};

/// Signal file that stops `serve`
pub const SHUTDOWN_SIGNAL: &str = "shutdown.txt";

/// Run the demo host until a shutdown signal or `--duration-secs`
pub fn run_serve(args: &ServeArgs, ctx: &CommandContext) -> Result<String> {
    let mut config = ctx.config.clone();
    args.apply(&mut config);
    let mut server_config = config.server;
    if !server_config.signal_files.iter().any(|f| f == SHUTDOWN_SIGNAL) {
        server_config.signal_files.push(SHUTDOWN_SIGNAL.to_string());
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let registry = HandlerRegistry::with_builtins();
    builtin::install_echo(&registry);
    install_demo_handlers(&registry, &shutdown);

    let (marshal, pump) = host_channel();
    let server = BridgeServer::new(server_config, registry).with_marshal(Arc::new(marshal));

    tracing::info!("Starting mailbridge demo host v{}", env!("CARGO_PKG_VERSION"));
    server.start()?;
    tracing::info!(
        "Waiting for requests; drop {} into a mailbox to stop",
        SHUTDOWN_SIGNAL
    );

    let started = Instant::now();
    let deadline = args.duration_secs.map(|s| started + Duration::from_secs(s));
    drive_host(&pump, &shutdown, deadline);

    // Anything still queued runs now; later submits fail fast instead of
    // holding up the stop
    pump.run_pending();
    drop(pump);

    let status = server.poller_status();
    server.stop();

    Ok(summary(ctx.format, &status, started.elapsed()))
}

fn drive_host(pump: &HostPump, shutdown: &AtomicBool, deadline: Option<Instant>) {
    pump.run_until(Duration::from_millis(50), || {
        shutdown.load(Ordering::SeqCst) || deadline.is_some_and(|d| Instant::now() >= d)
    });
}

fn install_demo_handlers(registry: &HandlerRegistry, shutdown: &Arc<AtomicBool>) {
    registry.register_described(
        "message_box",
        "Show params.message on the host console",
        Affinity::HostThread,
        |params| {
            let message = params
                .get("message")
                .and_then(|m| m.as_str())
                .ok_or_else(|| HandlerError::new("missing string parameter: message"))?;
            eprintln!("[message_box] {}", message);
            Ok(json!({ "shown": message }))
        },
    );

    registry.register_described(
        "host_info",
        "Report the thread and process the host runs handlers on",
        Affinity::HostThread,
        |_| {
            let current = thread::current();
            Ok(json!({
                "thread": current.name().unwrap_or("unnamed"),
                "pid": std::process::id(),
            }))
        },
    );

    registry.register_signal(DEFAULT_SIGNAL_FILE, Affinity::HostThread, |text| {
        eprintln!("[message_box] {}", text);
        Ok(())
    });

    let flag = Arc::clone(shutdown);
    registry.register_signal(SHUTDOWN_SIGNAL, Affinity::AnyThread, move |text| {
        tracing::info!("Shutdown requested: {}", text);
        flag.store(true, Ordering::SeqCst);
        Ok(())
    });
}

fn summary(format: OutputFormat, status: &PollerStatus, uptime: Duration) -> String {
    match format {
        OutputFormat::Json => to_json(&json!({
            "_type": "serve_summary",
            "uptime_secs": uptime.as_secs(),
            "poller": status,
        })),
        OutputFormat::Text => format!(
            "served {}s: {} handled, {} failed, {} signals over {} ticks\n",
            uptime.as_secs(),
            status.handled,
            status.failed,
            status.signals,
            status.ticks
        ),
    }
}
