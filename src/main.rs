//! TraitStats - scheduled incremental run
//!
//! Fetches completed offers newer than the stored watermark, folds them into
//! the per-trait statistics document and persists it atomically.

use anyhow::{Context, Result};
use chrono::Utc;
use traitstats::config::AppConfig;
use traitstats::lock::RunLock;
use traitstats::marketplace::{DexieClient, FetchOptions};
use traitstats::metadata::MetadataIndex;
use traitstats::stats::StateStore;
use traitstats::{logging, pipeline, report};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let cfg = AppConfig::load().context("Failed to load configuration")?;
    let run_id = uuid::Uuid::new_v4().to_string();
    info!(run_id = %run_id, config = %cfg.digest(), "TraitStats run starting");

    let state_path = cfg.state_path();
    let _lock = RunLock::acquire(&state_path, &run_id).context("Could not take run lock")?;

    let metadata = MetadataIndex::load(&cfg.metadata_path())
        .context("Failed to load collection metadata")?;
    let engine = pipeline::build_engine(&cfg, &metadata);

    let client = DexieClient::new(&cfg.marketplace, &cfg.collection.id)
        .context("Failed to build marketplace client")?;
    let store = StateStore::new(&state_path, cfg.persistence.backup_previous);

    let summary = engine
        .run(
            &store,
            &client,
            FetchOptions::from(&cfg.marketplace),
            Utc::now(),
            cfg.pipeline.dry_run,
        )
        .await
        .context("Incremental run failed; statistics document left unchanged")?;

    report::log_run_summary(&summary);

    if summary.persisted {
        if let Some(state) = store.load().context("Failed to re-read statistics document")? {
            report::log_leaderboards(&state, cfg.pipeline.report_top);
        }
    }

    Ok(())
}
