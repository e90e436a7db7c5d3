//! Tranche Sniper - staged-entry trader for freshly migrated Solana pools
//!
//! # WARNING
//! - This bot trades with real money unless simulation is enabled.
//! - Most newly launched tokens go to zero.
//! - Validation lowers the odds of a rug, it does not remove them.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use tranche_sniper::cli::commands;
use tranche_sniper::config::Config;

/// Tranche Sniper - validated, staged entries into new pools
#[derive(Parser)]
#[command(name = "sniper")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start listener, validation and position monitor
    Start {
        /// Quote for real but never submit swaps
        #[arg(long)]
        simulate: bool,
    },

    /// Show open positions and today's risk state
    Status,

    /// Show recent trade records
    Ledger {
        /// Number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Sell an entire position at market
    Exit {
        /// Token mint address
        mint: String,

        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },

    /// Show current configuration (secrets masked)
    Config,

    /// Check RPC, Jupiter and listener reachability
    Health,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::from_default_env().add_directive(
        "tranche_sniper=info"
            .parse()
            .unwrap_or_else(|_| LevelFilter::INFO.into()),
    );
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.json);

    // Invalid configuration is fatal: never run with undefined limits
    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };
    if config.trading.simulation {
        warn!("Simulation enabled in configuration");
    }

    let result = match cli.command {
        Commands::Start { simulate } => commands::start(&config, simulate).await,
        Commands::Status => commands::status(&config).await,
        Commands::Ledger { limit } => commands::ledger(&config, limit).await,
        Commands::Exit { mint, force } => commands::exit(&config, &mint, force).await,
        Commands::Config => commands::show_config(&config),
        Commands::Health => commands::health(&config).await,
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
