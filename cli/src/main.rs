//! Sentinel command line
//!
//! Read-only inspection of schedule timing, savings plan shapes and the
//! locally persisted automation state.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use sentinel_core_rs::core::config::{format_units, parse_units};
use sentinel_core_rs::core::time::{next_occurrence, parse_time_of_day};
use sentinel_core_rs::models::event::EventLog;
use sentinel_core_rs::models::savings_plan::total_deposits_for;
use sentinel_core_rs::orchestrator::load_record;
use sentinel_core_rs::scheduling::{SavingsBook, ScheduleBook};
use sentinel_core_rs::storage::{RecordKind, StoreScope};
use sentinel_core_rs::{Address, FileStore, Frequency, SavingsPlan, Schedule, SentinelConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sentinel", version, about = "Agent wallet automation tools")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the next occurrences of a schedule
    Next {
        #[arg(long)]
        frequency: Frequency,
        /// Time of day, HH:MM (UTC)
        #[arg(long, default_value = "09:00")]
        time: String,
        /// Anchor date (RFC 3339); weekly and monthly schedules align to it
        #[arg(long)]
        anchor: Option<DateTime<Utc>>,
        #[arg(long, default_value_t = 5)]
        count: usize,
    },

    /// Show deposit count, target and unlock date for a savings plan
    PlanPreview {
        /// Deposit in whole tokens
        #[arg(long)]
        deposit: u64,
        /// Omit for a single-deposit plan
        #[arg(long)]
        frequency: Option<Frequency>,
        #[arg(long)]
        lock_days: u32,
        #[arg(long, default_value_t = 18)]
        decimals: u8,
    },

    /// List schedules and deposits due from a local store
    Due {
        #[command(flatten)]
        scope: ScopeArgs,
        /// Evaluate at this instant instead of now (RFC 3339)
        #[arg(long)]
        at: Option<DateTime<Utc>>,
        /// Also list items due within this many days
        #[arg(long, default_value_t = 0)]
        horizon_days: i64,
    },

    /// Print execution history from a local store
    History {
        #[command(flatten)]
        scope: ScopeArgs,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Validate a JSON config file and print its hash
    CheckConfig { path: PathBuf },
}

#[derive(clap::Args)]
struct ScopeArgs {
    /// Directory of the file store
    #[arg(long)]
    store: PathBuf,
    #[arg(long)]
    owner: Address,
    #[arg(long, default_value = "sepolia")]
    network: String,
}

impl ScopeArgs {
    fn open(&self) -> Result<(FileStore, StoreScope)> {
        let store = FileStore::open(&self.store)
            .with_context(|| format!("opening store at {}", self.store.display()))?;
        Ok((store, StoreScope::new(self.owner.clone(), self.network.clone())))
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Next {
            frequency,
            time,
            anchor,
            count,
        } => {
            let time_of_day = parse_time_of_day(&time)?;
            let mut cursor = Utc::now();
            for _ in 0..count {
                cursor = next_occurrence(frequency, anchor, time_of_day, cursor);
                println!("{}", cursor.to_rfc3339());
            }
        }

        Command::PlanPreview {
            deposit,
            frequency,
            lock_days,
            decimals,
        } => {
            let deposits = total_deposits_for(frequency, lock_days);
            let amount = parse_units(deposit, decimals);
            let target = amount.saturating_mul(u128::from(deposits));
            let unlock = Utc::now() + Duration::days(i64::from(lock_days));
            println!("deposits:  {}", deposits);
            println!("target:    {}", format_units(target, decimals));
            println!("unlocks:   {}", unlock.format("%Y-%m-%d %H:%M UTC"));
        }

        Command::Due {
            scope,
            at,
            horizon_days,
        } => {
            let (store, scope) = scope.open()?;
            let now = at.unwrap_or_else(Utc::now);
            let schedules: Vec<Schedule> =
                load_record(&store, &scope.key(RecordKind::Schedules))?.unwrap_or_default();
            let plans: Vec<SavingsPlan> =
                load_record(&store, &scope.key(RecordKind::SavingsPlans))?.unwrap_or_default();
            let schedules = ScheduleBook::from_schedules(schedules, 3);
            let savings = SavingsBook::from_plans(plans, 3);
            let horizon = Duration::days(horizon_days.max(0));

            for s in schedules.upcoming(now, horizon) {
                println!(
                    "schedule {}  {:<20} {:>12}  {}",
                    s.id(),
                    s.vendor_name(),
                    s.amount(),
                    s.next_occurrence().to_rfc3339()
                );
            }
            for p in savings.upcoming_deposits(now, horizon) {
                let next = p.next_deposit().map(|d| d.to_rfc3339()).unwrap_or_default();
                println!(
                    "deposit  {}  {:<20} {:>12}  {}",
                    p.id(),
                    p.name(),
                    p.deposit_amount(),
                    next
                );
            }
        }

        Command::History { scope, limit } => {
            let (store, scope) = scope.open()?;
            let history: EventLog =
                load_record(&store, &scope.key(RecordKind::History))?.unwrap_or_default();
            let events = history.events();
            let start = events.len().saturating_sub(limit);
            for event in &events[start..] {
                println!("{}", serde_json::to_string(event)?);
            }
        }

        Command::CheckConfig { path } => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let config = SentinelConfig::from_json_str(&raw)?;
            println!("network:   {}", config.network.name);
            println!("token:     {}", config.token_address);
            println!("hash:      {}", config.config_hash());
        }
    }
    Ok(())
}
