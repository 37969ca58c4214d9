//! CLI command definitions for the `bcp` binary.

pub mod config;
pub mod history;
pub mod insights;
pub mod run;

use botcomm_types::config::StoreBackend;
use botcomm_types::message::MessageType;
use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Run and inspect an intra-process bot communication bus.
#[derive(Parser)]
#[command(name = "bcp", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit log lines as JSON objects.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a bus with demo bots, run it for a while, then print insights.
    Run {
        /// Seconds to keep the bus running (Ctrl+C stops early).
        #[arg(short, long, default_value = "5")]
        duration_secs: u64,

        /// State store backend, overriding `[storage] backend`.
        #[arg(long)]
        store: Option<StoreBackend>,
    },

    /// Show the persisted message history.
    History {
        /// Number of most recent entries to show.
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Only show envelopes of this type (e.g. REQUEST, heartbeat).
        #[arg(long = "type")]
        message_type: Option<MessageType>,

        /// State store backend, overriding `[storage] backend`.
        #[arg(long)]
        store: Option<StoreBackend>,
    },

    /// Aggregate counters over the persisted history.
    Insights {
        /// State store backend, overriding `[storage] backend`.
        #[arg(long)]
        store: Option<StoreBackend>,
    },

    /// Print the effective configuration.
    Config,

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}
