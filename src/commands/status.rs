//! Status command handler - Inspect beacons, status record, and liveness

use serde_json::json;

use crate::cli::{OutputFormat, StatusArgs};
use crate::client::{BridgeClient, ServerProbe};
use crate::commands::{secs, to_json, CommandContext};
use crate::error::Result;

/// Run the status command
pub fn run_status(args: &StatusArgs, ctx: &CommandContext) -> Result<String> {
    let mut config = ctx.config.clone();
    args.mailbox.apply(&mut config);
    let client = BridgeClient::from_config(&config.client)?;

    let probe = match args.wait {
        Some(value) => client
            .wait_for_ready(secs(value)?)
            .unwrap_or_else(|| client.probe()),
        None => client.probe(),
    };

    let ping_ms = if args.ping {
        Some(client.ping(client.default_timeout())?.as_millis() as u64)
    } else {
        None
    };

    Ok(match ctx.format {
        OutputFormat::Json => to_json(&probe_json(&probe, ping_ms)),
        OutputFormat::Text => probe_text(&client, &probe, ping_ms),
    })
}

fn probe_json(probe: &ServerProbe, ping_ms: Option<u64>) -> serde_json::Value {
    let beacons: Vec<_> = probe
        .beacons
        .iter()
        .map(|b| {
            json!({
                "path": b.path.to_string_lossy(),
                "status": b.status,
                "written_at": b.written_at.to_rfc3339(),
                "age_secs": b.age().num_seconds(),
            })
        })
        .collect();

    json!({
        "_type": "server_status",
        "live": probe.is_live(),
        "beacons": beacons,
        "status": probe.status,
        "ping_ms": ping_ms,
    })
}

fn probe_text(client: &BridgeClient, probe: &ServerProbe, ping_ms: Option<u64>) -> String {
    let mut output = String::new();
    output.push_str(&format!("mailbox: {}\n", client.mailbox().root().display()));
    output.push_str(&format!(
        "live: {}\n",
        if probe.is_live() { "yes" } else { "no" }
    ));

    if probe.beacons.is_empty() {
        output.push_str("beacons: none\n");
    }
    for beacon in &probe.beacons {
        output.push_str(&format!(
            "beacon: {} ({}, {}s old)\n",
            beacon.path.display(),
            beacon.status,
            beacon.age().num_seconds()
        ));
    }

    if let Some(status) = &probe.status {
        output.push_str(&format!(
            "server: {} (pid {}, v{}, since {})\n",
            status.status,
            status.pid,
            status.version,
            status.started_at.to_rfc3339()
        ));
        let names: Vec<_> = status.commands.iter().map(|c| c.name.as_str()).collect();
        output.push_str(&format!("commands: {}\n", names.join(", ")));
    }

    if let Some(ms) = ping_ms {
        output.push_str(&format!("ping: {}ms\n", ms));
    }
    output
}
