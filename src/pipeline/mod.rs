//! Sales ingestion pipeline
//!
//! Resolver -> Normalizer -> Merge engine. The merge engine owns dedup,
//! watermark advancement and aggregate recomputation.

pub mod merge;
pub mod normalizer;
pub mod resolver;

pub use merge::{determine_watermark, MergeEngine, RunSummary};
pub use normalizer::SaleNormalizer;
pub use resolver::{ResolvedSale, ResolvedTrade, Side, TradeResolver};

use crate::config::AppConfig;
use crate::currency::CurrencyTable;
use crate::metadata::MetadataIndex;

/// Wire the pipeline stages from configuration
pub fn build_engine<'m>(cfg: &AppConfig, metadata: &'m MetadataIndex) -> MergeEngine<'m> {
    let currency = CurrencyTable::from_config(&cfg.currency);
    let resolver = TradeResolver::new(&cfg.collection, currency.canonical_symbol(), metadata);
    MergeEngine::new(
        resolver,
        SaleNormalizer::new(currency),
        cfg.persistence.lookback_days,
    )
}
