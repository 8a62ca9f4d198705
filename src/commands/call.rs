//! Client command handlers - call, check, signal

use serde_json::{json, Value};

use crate::cli::{CallArgs, CheckArgs, OutputFormat, SignalArgs};
use crate::client::BridgeClient;
use crate::commands::{secs, to_json, CommandContext};
use crate::error::{BridgeError, Result};
use crate::mailbox::{Params, RequestId};

fn client_for(ctx: &CommandContext, args_mailbox: &crate::cli::MailboxArgs) -> Result<BridgeClient> {
    let mut config = ctx.config.clone();
    args_mailbox.apply(&mut config);
    BridgeClient::from_config(&config.client)
}

fn parse_params(raw: &str) -> Result<Params> {
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(params) => Ok(params),
        other => Err(BridgeError::Config {
            message: format!("--params must be a JSON object, got {}", other),
        }),
    }
}

/// Run the call command
pub fn run_call(args: &CallArgs, ctx: &CommandContext) -> Result<String> {
    let params = parse_params(&args.params)?;
    let client = client_for(ctx, &args.mailbox)?;
    let client = if args.keep { client.keep_responses(true) } else { client };
    let timeout = match args.timeout {
        Some(value) => secs(value)?,
        None => client.default_timeout(),
    };

    let pending = client.submit(&args.command, params)?;
    let id = pending.id().clone();
    tracing::info!("Calling {} as {}", args.command, id);
    let result = pending.wait(timeout)?;

    Ok(match ctx.format {
        OutputFormat::Json => to_json(&json!({ "id": id, "success": true, "result": result })),
        OutputFormat::Text => to_json(&result),
    })
}

/// Run the check command
pub fn run_check(args: &CheckArgs, ctx: &CommandContext) -> Result<String> {
    let id = RequestId::parse(&args.id).ok_or_else(|| BridgeError::Config {
        message: format!("not a valid request id: {:?}", args.id),
    })?;
    let client = client_for(ctx, &args.mailbox)?;

    let result = match args.wait {
        Some(value) => Some(client.wait_response(&id, secs(value)?)?),
        None => client.check_response(&id)?,
    };

    Ok(match (ctx.format, result) {
        (OutputFormat::Json, Some(result)) => {
            to_json(&json!({ "id": id, "success": true, "result": result }))
        }
        (OutputFormat::Json, None) => to_json(&json!({ "id": id, "pending": true })),
        (OutputFormat::Text, Some(result)) => to_json(&result),
        (OutputFormat::Text, None) => format!("{}: no response yet\n", id),
    })
}

/// Run the signal command
pub fn run_signal(args: &SignalArgs, ctx: &CommandContext) -> Result<String> {
    let client = client_for(ctx, &args.mailbox)?;
    let path = client.send_signal(&args.file, &args.text)?;

    let consumed = match args.wait {
        Some(value) => Some(client.wait_signal_consumed(&args.file, secs(value)?)),
        None => None,
    };

    Ok(match ctx.format {
        OutputFormat::Json => to_json(&json!({
            "path": path.to_string_lossy(),
            "consumed": consumed,
        })),
        OutputFormat::Text => match consumed {
            Some(true) => format!("{}: consumed\n", path.display()),
            Some(false) => format!("{}: not consumed yet\n", path.display()),
            None => format!("{}: written\n", path.display()),
        },
    })
}
