//! # CLI Execution Functions
//!
//! Execution logic for each subcommand, kept out of `main.rs`. Every command
//! builds its own Tokio runtime and connects to PostgreSQL on demand.

use anyhow::{Context, Result};
use chrono::Utc;
use hackportal::config::{self, AllocationPolicy};
use hackportal::prom_metrics::Metrics;
use hackportal::reaper::ExpiryReaper;
use hackportal::{db, planner, server, store};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub fn run_serve(
    database_url: &str,
    redis_url: Option<&str>,
    port: u16,
    reap_interval_secs: u64,
) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(server::run(
        port,
        database_url,
        redis_url,
        Duration::from_secs(reap_interval_secs.max(1)),
    ))
}

pub fn run_migrate(database_url: &str) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let database = db::Database::connect_with(database_url, 1).await?;
        database.migrate().await?;
        info!("migrations applied");
        anyhow::Ok(())
    })
}

pub fn run_seed(database_url: &str, file: &Path) -> Result<()> {
    let input = std::fs::read_to_string(file)
        .with_context(|| format!("reading seed file {}", file.display()))?;
    let seed = config::parse_seed_toml(&input)
        .with_context(|| format!("parsing seed file {}", file.display()))?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let database = db::Database::connect_with(database_url, 1).await?;
        database.migrate().await?;
        let ids = database.seed_problems(&seed.problems).await?;
        info!(count = ids.len(), "problem statements seeded");
        anyhow::Ok(())
    })
}

pub fn run_reap(database_url: &str) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let database = db::Database::connect_with(database_url, 1).await?;
        let reaper = ExpiryReaper::new(database, Arc::new(Metrics::new()));
        let deleted = reaper.reap(Utc::now()).await?;
        info!(deleted, "expired reservations removed");
        anyhow::Ok(())
    })
}

pub fn run_loads(database_url: &str) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    let loads = rt.block_on(async {
        let database = db::Database::connect_with(database_url, 1).await?;
        anyhow::Ok(store::load_snapshot(&database, Utc::now()).await?)
    })?;
    let plan = planner::plan(&loads, AllocationPolicy::default().expanded_capacity);

    println!(
        "{:>5}  {:<40} {:>9} {:>6} {:>9} {:>8}",
        "order", "title", "confirmed", "live", "committed", "capacity"
    );
    for c in &plan.candidates {
        let marker = if c.problem.is_current { "*" } else { " " };
        println!(
            "{:>4}{}  {:<40} {:>9} {:>6} {:>9} {:>8}",
            c.problem.order,
            marker,
            truncate(&c.problem.title, 40),
            c.problem.submission_count,
            c.live_reservations,
            c.total_committed,
            c.problem.max_submissions,
        );
    }
    if plan.needs_expansion {
        println!("all problem statements are full; the next reservation expands capacity");
    } else if !plan.any_capacity() {
        println!("all problem statements are full at the expansion ceiling");
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max - 1).collect();
        out.push('…');
        out
    }
}
