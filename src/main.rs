//! Mailbridge CLI entry point

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use mailbridge::cli::Commands;
use mailbridge::commands::{
    run_call, run_check, run_serve, run_signal, run_status, CommandContext,
};
use mailbridge::Cli;

fn main() -> ExitCode {
    match run() {
        Ok(output) => {
            print!("{}", output);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    }
}

fn run() -> mailbridge::Result<String> {
    let cli = Cli::parse();
    let config = cli.load_config()?;

    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    init_tracing(level);

    let ctx = CommandContext::new(cli.format, config);
    match &cli.command {
        Commands::Serve(args) => run_serve(args, &ctx),
        Commands::Call(args) => run_call(args, &ctx),
        Commands::Check(args) => run_check(args, &ctx),
        Commands::Signal(args) => run_signal(args, &ctx),
        Commands::Status(args) => run_status(args, &ctx),
    }
}

/// Logs go to stderr; stdout carries command output only
fn init_tracing(level: &str) {
    let mut filter = EnvFilter::from_default_env();
    match format!("mailbridge={}", level).parse() {
        Ok(directive) => filter = filter.add_directive(directive),
        Err(_) => eprintln!("Ignoring unknown log level {:?}", level),
    }

    // May fail if already initialized, which is fine
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
