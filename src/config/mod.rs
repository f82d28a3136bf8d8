//! Configuration management for TraitStats
//!
//! Loads from config files + environment variables via .env

mod types;

pub use types::*;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub collection: CollectionConfig,
    pub marketplace: MarketplaceConfig,
    pub currency: CurrencyConfig,
    pub persistence: PersistenceConfig,
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Config::builder()
            // Collection defaults
            .set_default("collection.id", "")?
            .set_default("collection.name", "")?
            .set_default("collection.aliases", Vec::<String>::new())?
            // Marketplace defaults
            .set_default("marketplace.base_url", "https://api.dexie.space/v1")?
            .set_default("marketplace.page_size", 100)?
            .set_default("marketplace.page_delay_ms", 500)?
            .set_default("marketplace.completed_status", 4)?
            .set_default("marketplace.timeout_secs", 30)?
            // Currency defaults
            .set_default("currency.canonical_symbol", "XCH")?
            .set_default("currency.fiat_rate", 22.0)?
            // Persistence defaults
            .set_default("persistence.data_dir", "./data")?
            .set_default("persistence.state_file", "attribute_stats.json")?
            .set_default("persistence.metadata_file", "metadata.json")?
            .set_default("persistence.backfill_csv", "sales_history.csv")?
            .set_default("persistence.lookback_days", 30)?
            .set_default("persistence.backup_previous", true)?
            // Pipeline defaults
            .set_default("pipeline.dry_run", false)?
            .set_default("pipeline.report_top", 5)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (TRAITSTATS__*)
            .add_source(Environment::with_prefix("TRAITSTATS").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;
        Ok(app_config)
    }

    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.collection.id.trim().is_empty() {
            bail!("collection.id is not set (TRAITSTATS__COLLECTION__ID)");
        }
        if self.collection.name.trim().is_empty() {
            bail!("collection.name is not set (TRAITSTATS__COLLECTION__NAME)");
        }
        if self.marketplace.page_size == 0 {
            bail!("marketplace.page_size must be positive");
        }
        if !(self.currency.fiat_rate.is_finite() && self.currency.fiat_rate > 0.0) {
            bail!("currency.fiat_rate must be a positive number");
        }
        if let Some(bad) = self
            .currency
            .rates
            .iter()
            .find(|r| !(r.rate.is_finite() && r.rate > 0.0))
        {
            bail!("currency rate for {} must be a positive number", bad.code);
        }
        Ok(())
    }

    pub fn state_path(&self) -> PathBuf {
        PathBuf::from(&self.persistence.data_dir).join(&self.persistence.state_file)
    }

    pub fn metadata_path(&self) -> PathBuf {
        PathBuf::from(&self.persistence.data_dir).join(&self.persistence.metadata_file)
    }

    pub fn backfill_path(&self) -> PathBuf {
        PathBuf::from(&self.persistence.data_dir).join(&self.persistence.backfill_csv)
    }

    /// Generate a digest of the config for logging
    pub fn digest(&self) -> String {
        format!(
            "collection={} ({}) api={} page_size={} rates={} fiat_rate={:.2} state={} dry_run={}",
            self.collection.name,
            self.collection.id,
            self.marketplace.base_url,
            self.marketplace.page_size,
            self.currency.rates.len(),
            self.currency.fiat_rate,
            self.state_path().display(),
            self.pipeline.dry_run
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> AppConfig {
    AppConfig {
        collection: CollectionConfig {
            id: "col1farmers".to_string(),
            name: "Chia Farmers".to_string(),
            aliases: vec!["Farmers".to_string()],
        },
        marketplace: MarketplaceConfig {
            base_url: "http://localhost:0".to_string(),
            page_size: 2,
            page_delay_ms: 0,
            completed_status: 4,
            timeout_secs: 5,
        },
        currency: CurrencyConfig {
            canonical_symbol: "XCH".to_string(),
            fiat_rate: 30.0,
            rates: vec![RateEntry {
                code: "SBX".to_string(),
                rate: 0.001,
            }],
        },
        persistence: PersistenceConfig {
            data_dir: "./data".to_string(),
            state_file: "attribute_stats.json".to_string(),
            metadata_file: "metadata.json".to_string(),
            backfill_csv: "sales_history.csv".to_string(),
            lookback_days: 30,
            backup_previous: false,
        },
        pipeline: PipelineConfig {
            dry_run: false,
            report_top: 3,
        },
    }
}
