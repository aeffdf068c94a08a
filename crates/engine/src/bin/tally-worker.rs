//! tally-worker: runs one invocation of the scheduling engine per process.
//!
//! Meant to be called by an external scheduler such as cron: `generate`
//! daily, `remind` hourly. State lives in the JSON store
//! snapshot between runs.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use tally_core::config::{load_dotenv, Config};
use tally_engine::{GenerationEngine, ReminderScheduler};
use tally_notify::{Dispatcher, RetryPolicy};
use tally_store::{MemoryStore, StoreLock};

// ── CLI ─────────────────────────────────────────────────────────────

/// Run one generation or reminder invocation against the local store.
#[derive(Parser, Debug)]
#[command(name = "tally-worker", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Evaluate as of this instant (RFC 3339) instead of the current time.
    #[arg(long, global = true, value_parser = parse_now)]
    now: Option<DateTime<Utc>>,

    /// Store snapshot path. Defaults to STORE_PATH from the environment.
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Print the invocation summary as JSON.
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Generate due occurrences of recurrence rules.
    Generate,
    /// Send credit card due-date reminders.
    Remind,
    /// Print the resolved configuration (secrets redacted) and known profiles.
    Config,
}

fn parse_now(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("expected RFC 3339 timestamp: {e}"))
}

fn print_summary<S: Serialize>(summary: &S, json: bool, headline: String) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
    } else {
        println!("{headline}");
    }
    Ok(())
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    load_dotenv();
    let config = Config::from_env();

    if let Command::Config = cli.command {
        let mut view = config.redacted_summary();
        view["available_profiles"] = serde_json::json!(Config::available_profiles());
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }
    config.log_summary();

    let store_path = cli.store.clone().unwrap_or_else(|| config.store.path.clone());
    // Held until exit so overlapping worker processes run one after another.
    let _lock = StoreLock::acquire(&store_path)
        .with_context(|| format!("failed to lock store {}", store_path.display()))?;
    let store = Arc::new(
        MemoryStore::open(&store_path)
            .with_context(|| format!("failed to open store {}", store_path.display()))?,
    );

    let dispatcher = Arc::new(
        Dispatcher::from_channel_config(&config.channels, RetryPolicy::from_config(&config.notify))
            .context("invalid channel configuration")?,
    );

    let now = cli.now.unwrap_or_else(Utc::now);
    info!(command = ?cli.command, %now, store = %store_path.display(), "tally-worker starting");

    match cli.command {
        Command::Generate => {
            let engine = GenerationEngine::new(
                store.clone(),
                store.clone(),
                dispatcher,
                config.engine.clone(),
            )
            .with_claim_lease(config.claims.lease());
            let summary = engine.run_generation(now).await;
            store
                .save(&store_path)
                .with_context(|| format!("failed to save store {}", store_path.display()))?;
            let headline = format!(
                "generated={} queued={} redispatched={} warnings={} errors={}",
                summary.generated_count(),
                summary.queued_count(),
                summary.requests_redispatched,
                summary.warnings.len(),
                summary.errors.len()
            );
            print_summary(&summary, cli.json, headline)?;
        }
        Command::Remind => {
            let scheduler = ReminderScheduler::new(
                store.clone(),
                store.clone(),
                store.clone(),
                dispatcher,
            )
            .with_concurrency(config.engine.concurrency)
            .with_claim_lease(config.claims.lease());
            let summary = scheduler.run_reminders(now).await;
            store
                .save(&store_path)
                .with_context(|| format!("failed to save store {}", store_path.display()))?;
            let headline = format!(
                "cards={} sent={} skipped={} errors={}",
                summary.cards_checked,
                summary.sent_count(),
                summary.skipped.len(),
                summary.errors.len()
            );
            print_summary(&summary, cli.json, headline)?;
        }
        Command::Config => {}
    }

    info!("tally-worker exited cleanly");
    Ok(())
}
