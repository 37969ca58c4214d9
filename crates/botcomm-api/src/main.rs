//! Bot communication protocol CLI entry point.
//!
//! Binary name: `bcp`
//!
//! Parses CLI arguments, sets up tracing, loads configuration, then
//! dispatches to the command handler.

mod cli;
mod demo;
mod state;

use clap::Parser;
use clap_complete::generate;

use botcomm_observe::tracing_setup::{TracingOptions, init_tracing, shutdown_tracing};
use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut tracing_options = TracingOptions::from_verbosity(cli.verbose, cli.quiet);
    tracing_options.json = cli.log_json;
    tracing_options.otel = cli.otel;
    if let Err(e) = init_tracing(&tracing_options) {
        eprintln!("Warning: failed to initialize tracing: {e}");
    }

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "bcp", &mut std::io::stdout());
        return Ok(());
    }

    let state = AppState::init().await?;

    let result = match cli.command {
        Commands::Run {
            duration_secs,
            store,
        } => cli::run::run(&state, duration_secs, store, cli.json).await,
        Commands::History {
            limit,
            message_type,
            store,
        } => cli::history::history(&state, limit, message_type, store, cli.json).await,
        Commands::Insights { store } => cli::insights::insights(&state, store, cli.json).await,
        Commands::Config => cli::config::show_config(&state, cli.json).await,
        Commands::Completions { .. } => unreachable!("handled above"),
    };

    shutdown_tracing();
    result
}
