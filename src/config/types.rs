//! Configuration sections

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct CollectionConfig {
    /// Marketplace collection id (col1...)
    pub id: String,
    /// Collection display name as reported on NFT items
    pub name: String,
    /// Other names the marketplace has used for the same collection
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketplaceConfig {
    /// Offers API base URL
    pub base_url: String,
    /// Offers per page
    pub page_size: u32,
    /// Pause between page requests in milliseconds
    pub page_delay_ms: u64,
    /// Status code of completed offers
    pub completed_status: i64,
    /// HTTP client timeout in seconds
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CurrencyConfig {
    /// Canonical settlement unit
    pub canonical_symbol: String,
    /// Fiat (USD) per canonical unit
    pub fiat_rate: f64,
    /// Canonical units per token
    #[serde(default = "default_rates")]
    pub rates: Vec<RateEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateEntry {
    pub code: String,
    pub rate: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// Data directory
    pub data_dir: String,
    /// Statistics document, relative to `data_dir`
    pub state_file: String,
    /// Collection metadata index, relative to `data_dir`
    pub metadata_file: String,
    /// Historical export consumed by the backfill, relative to `data_dir`
    pub backfill_csv: String,
    /// Fallback watermark window when the state has none
    pub lookback_days: i64,
    /// Copy the previous document to `<state_file>.bak` before replacing it
    pub backup_previous: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Run everything except the final write
    pub dry_run: bool,
    /// Attributes listed per leaderboard in the run report
    pub report_top: usize,
}

/// Token rates shipped with the binary (XCH per token)
pub(crate) fn default_rates() -> Vec<RateEntry> {
    [
        ("wUSDC.b", 0.045),
        ("wUSDC", 0.045),
        ("wUSDT", 0.045),
        ("wmilliETH", 0.13),
        ("SBX", 0.0000035),
        ("DBX", 0.00012),
        ("HOA", 0.000028),
        ("BYC", 0.045),
        ("MBX", 0.00035),
    ]
    .into_iter()
    .map(|(code, rate)| RateEntry {
        code: code.to_string(),
        rate,
    })
    .collect()
}
