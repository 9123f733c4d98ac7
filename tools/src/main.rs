//! accrual-runner: headless entry point for the daily penalty-accrual batch.
//!
//! An external scheduler (cron or similar) invokes this once per interval.
//! The run is idempotent, so a retry after a crash is always safe.
//!
//! Usage:
//!   accrual-runner --db crm.db
//!   accrual-runner --db crm.db --config config.json
//!   accrual-runner --db crm.db --now 2026-03-01T06:00:00Z   (replay/debug)

use anyhow::Result;
use chrono::{DateTime, Utc};
use plotpay_core::{
    clock::{Clock, SystemClock},
    config::{CoreConfig, PenaltyConfig},
    penalty_accrual::PenaltyAccrualEngine,
    store::CrmStore,
};
use std::env;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let db = arg_value(&args, "--db").unwrap_or(":memory:");
    let config_path = arg_value(&args, "--config");
    let now_override = arg_value(&args, "--now");

    let penalty_config = match config_path {
        Some(path) => CoreConfig::load(path)?.penalty,
        None => PenaltyConfig::default(),
    };

    let now: DateTime<Utc> = match now_override {
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("cannot parse --now {raw}: {e}"))?,
        None => SystemClock.now(),
    };

    println!("plotpay — accrual-runner");
    println!("  db:     {db}");
    println!("  now:    {now}");
    println!(
        "  config: {:.2}%/month, {} grace days",
        penalty_config.monthly_rate_pct, penalty_config.grace_period_days
    );
    println!();

    let store = CrmStore::open(db)?;
    store.migrate()?;

    let engine = PenaltyAccrualEngine::new(penalty_config);
    let report = engine.run(&store, now)?;

    println!("Run complete:");
    println!("  scanned: {}", report.scanned);
    println!("  accrued: {}", report.accrued);
    println!("  skipped: {}", report.skipped);
    println!("  failed:  {}", report.failed);

    if report.failed > 0 {
        log::warn!("{} installment(s) failed and were skipped; see log", report.failed);
    }

    Ok(())
}

fn arg_value<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == name)
        .map(|w| w[1].as_str())
}
