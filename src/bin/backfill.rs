//! One-shot backfill from the historical sales export
//!
//! Usage: cargo run --bin traitstats-backfill
//!
//! Rebuilds the statistics document from `persistence.backfill_csv` and
//! sets the watermark to the end of the latest trade day, so the next
//! incremental run picks up from there.

use anyhow::Context;
use chrono::Utc;
use traitstats::backfill::load_backfill;
use traitstats::config::AppConfig;
use traitstats::currency::CurrencyTable;
use traitstats::lock::RunLock;
use traitstats::stats::StateStore;
use traitstats::{logging, report};
use tracing::{info, warn};

fn main() -> anyhow::Result<()> {
    logging::init();

    let cfg = AppConfig::load().context("Failed to load configuration")?;
    let run_id = uuid::Uuid::new_v4().to_string();
    info!(run_id = %run_id, config = %cfg.digest(), "Backfill starting");

    let state_path = cfg.state_path();
    let _lock = RunLock::acquire(&state_path, &run_id).context("Could not take run lock")?;

    let currency = CurrencyTable::from_config(&cfg.currency);
    let csv_path = cfg.backfill_path();
    let (state, summary) = load_backfill(&csv_path, &currency, Utc::now())
        .with_context(|| format!("Backfill from {} failed", csv_path.display()))?;

    let store = StateStore::new(&state_path, cfg.persistence.backup_previous);
    if store.exists() {
        warn!(
            path = %state_path.display(),
            backup = cfg.persistence.backup_previous,
            "Replacing existing statistics document"
        );
    }

    if cfg.pipeline.dry_run {
        info!("Dry run: statistics document left untouched");
    } else {
        store.save(&state).context("Failed to save statistics document")?;
        info!(path = %state_path.display(), "Statistics document written");
    }

    report::log_backfill_summary(&summary);
    report::log_leaderboards(&state, cfg.pipeline.report_top);

    Ok(())
}
