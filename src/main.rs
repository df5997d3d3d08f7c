//! # Main — CLI Entry Point
//!
//! Routes CLI subcommands to the registration API server and to the operator
//! maintenance commands.
//!
//! ## Subcommands
//!
//! - `serve`: run the HTTP API, periodic reaper and metrics loop.
//! - `migrate`: apply the embedded schema migrations.
//! - `seed --file problems.toml`: upsert problem statements.
//! - `reap`: delete expired reservations once.
//! - `loads`: print committed load per active problem statement.
//!
//! ## Global Options
//!
//! - `--database-url` / `DATABASE_URL`: PostgreSQL connection.
//! - `--redis-url` / `REDIS_URL`: shared rotation cursor. Without it the cursor
//!   lives in process memory, so rotation is only fair within one instance.

mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(
    name = "hackportal",
    about = "Problem-statement reservation service for hackathon registration"
)]
struct Cli {
    /// PostgreSQL connection URL (or set DATABASE_URL env var)
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Redis URL for the shared rotation cursor (or set REDIS_URL env var)
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the registration API server
    Serve {
        /// Port to listen on
        #[arg(long, env = "PORT", default_value_t = 7001)]
        port: u16,
        /// Seconds between background sweeps of expired reservations
        #[arg(long, default_value_t = 60)]
        reap_interval_secs: u64,
    },
    /// Apply database migrations
    Migrate,
    /// Upsert problem statements from a TOML file
    Seed {
        /// Path to the TOML file with [[problem]] entries
        #[arg(long)]
        file: PathBuf,
    },
    /// Delete expired reservations once and exit
    Reap,
    /// Print committed load per active problem statement
    Loads,
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    // LOG_FORMAT=json for log shippers, human-readable otherwise
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    let cli = Cli::parse();
    let database_url = cli.database_url.as_deref().ok_or_else(|| {
        anyhow::anyhow!("DATABASE_URL is required (set via --database-url or env)")
    })?;

    match &cli.command {
        Commands::Serve {
            port,
            reap_interval_secs,
        } => cli::run_serve(
            database_url,
            cli.redis_url.as_deref(),
            *port,
            *reap_interval_secs,
        ),
        Commands::Migrate => cli::run_migrate(database_url),
        Commands::Seed { file } => cli::run_seed(database_url, file),
        Commands::Reap => cli::run_reap(database_url),
        Commands::Loads => cli::run_loads(database_url),
    }
}
