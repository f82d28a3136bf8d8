//! Attribute statistics store
//!
//! One bucket per `category|value` trait. Each bucket keeps every sale of an
//! NFT carrying that trait; min/max/avg and the last sale are a cache that is
//! always recomputed from the full sales list.

mod store;

pub use store::{write_atomic, StateStore};
pub(crate) use store::sibling_path;

use crate::currency::{round_dp, CANONICAL_DP};
use crate::types::{attribute_key, NftAttribute, SaleRecord};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Aggregates over a sales list
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PriceSummary {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub count: usize,
}

/// Plain min/max/mean over every sale.
///
/// Outlier rejection (median, trimmed mean) is not applied; a filter over
/// `sales` belongs here if it is ever added.
pub fn price_summary(sales: &[SaleRecord]) -> PriceSummary {
    if sales.is_empty() {
        return PriceSummary::default();
    }

    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut sum = 0.0;
    for sale in sales {
        min = min.min(sale.price_xch);
        max = max.max(sale.price_xch);
        sum += sale.price_xch;
    }

    PriceSummary {
        min: round_dp(min, CANONICAL_DP),
        max: round_dp(max, CANONICAL_DP),
        avg: round_dp(sum / sales.len() as f64, CANONICAL_DP),
        count: sales.len(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeStats {
    pub category: String,
    pub value: String,
    pub min_price: f64,
    pub max_price: f64,
    pub avg_price: f64,
    pub total_sales: usize,
    pub last_sale_date: Option<NaiveDate>,
    pub last_sale_price: Option<f64>,
    /// Newest first
    pub sales: Vec<SaleRecord>,
}

impl AttributeStats {
    pub fn new(category: &str, value: &str) -> Self {
        Self {
            category: category.to_string(),
            value: value.to_string(),
            min_price: 0.0,
            max_price: 0.0,
            avg_price: 0.0,
            total_sales: 0,
            last_sale_date: None,
            last_sale_price: None,
            sales: Vec::new(),
        }
    }

    pub fn key(&self) -> String {
        attribute_key(&self.category, &self.value)
    }

    /// Re-sort sales newest first and rebuild every cached field.
    ///
    /// The sort is stable, so sales sharing a date keep ingestion order and
    /// the earliest ingested one becomes the last sale.
    pub fn recompute(&mut self) {
        self.sales.sort_by(|a, b| b.date.cmp(&a.date));

        let summary = price_summary(&self.sales);
        self.min_price = summary.min;
        self.max_price = summary.max;
        self.avg_price = summary.avg;
        self.total_sales = summary.count;

        let last = self.sales.first();
        self.last_sale_date = last.map(|s| s.date);
        self.last_sale_price = last.map(|s| s.price_xch);
    }

    /// Whether the cached fields match a fresh recomputation
    pub fn is_consistent(&self) -> bool {
        let mut fresh = self.clone();
        fresh.recompute();
        fresh == *self
    }
}

/// Persisted statistics document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineState {
    pub generated_at: DateTime<Utc>,
    pub total_attributes: usize,
    pub total_sales_records: usize,
    pub xch_usd_rate: f64,
    /// Watermark: newest completion time folded into the store
    #[serde(default)]
    pub last_processed_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeStats>,
}

impl PipelineState {
    pub fn new(xch_usd_rate: f64, now: DateTime<Utc>) -> Self {
        Self {
            generated_at: now,
            total_attributes: 0,
            total_sales_records: 0,
            xch_usd_rate,
            last_processed_date: None,
            attributes: BTreeMap::new(),
        }
    }

    /// Every trade id already recorded in any bucket
    pub fn known_trade_ids(&self) -> HashSet<String> {
        self.attributes
            .values()
            .flat_map(|stats| stats.sales.iter())
            .filter_map(|sale| sale.trade_id.clone())
            .collect()
    }

    /// Append a sale to the bucket for `category|value`, creating it if
    /// needed. Returns the bucket key. Aggregates are left stale until
    /// [`PipelineState::recompute`] runs.
    pub fn append_sale(&mut self, category: &str, value: &str, sale: SaleRecord) -> String {
        let key = attribute_key(category, value);
        self.attributes
            .entry(key.clone())
            .or_insert_with(|| AttributeStats::new(category, value))
            .sales
            .push(sale);
        key
    }

    /// Fan a sale out to every distinct trait of the sold NFT. A trait
    /// listed twice in the metadata still gets the sale once.
    pub fn append_fan_out(&mut self, attributes: &[NftAttribute], sale: &SaleRecord) -> Vec<String> {
        let mut seen = BTreeSet::new();
        attributes
            .iter()
            .filter(|attr| seen.insert(attr.key()))
            .map(|attr| self.append_sale(&attr.trait_type, &attr.value, sale.clone()))
            .collect()
    }

    /// Recompute the named buckets (unknown keys are ignored)
    pub fn recompute<'a, I>(&mut self, keys: I)
    where
        I: IntoIterator<Item = &'a String>,
    {
        for key in keys {
            if let Some(stats) = self.attributes.get_mut(key) {
                stats.recompute();
            }
        }
    }

    pub fn recompute_all(&mut self) {
        for stats in self.attributes.values_mut() {
            stats.recompute();
        }
    }

    /// Move the watermark forward; never moves it back
    pub fn advance_watermark(&mut self, candidate: DateTime<Utc>) {
        match self.last_processed_date {
            Some(current) if current >= candidate => {}
            _ => self.last_processed_date = Some(candidate),
        }
    }

    /// Refresh the document-level counters and stamp the generation time
    pub fn finalize(&mut self, now: DateTime<Utc>, xch_usd_rate: f64) {
        self.generated_at = now;
        self.xch_usd_rate = xch_usd_rate;
        self.total_attributes = self.attributes.len();
        self.total_sales_records = self.attributes.values().map(|s| s.total_sales).sum();
    }

    /// Keys of buckets whose cache disagrees with their sales
    pub fn inconsistent_buckets(&self) -> Vec<String> {
        self.attributes
            .iter()
            .filter(|(_, stats)| !stats.is_consistent())
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Number of stored sale rows carrying `trade_id`, across all buckets
    pub fn count_trade(&self, trade_id: &str) -> usize {
        self.attributes
            .values()
            .flat_map(|stats| stats.sales.iter())
            .filter(|sale| sale.trade_id.as_deref() == Some(trade_id))
            .count()
    }
}

#[cfg(test)]
pub(crate) fn sale(edition: u32, price: f64, date: &str, trade_id: Option<&str>) -> SaleRecord {
    SaleRecord {
        nft_edition: edition,
        price_xch: price,
        price_usd: round_dp(price * 30.0, 2),
        date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
        original_price: price,
        original_currency: "XCH".to_string(),
        trade_id: trade_id.map(str::to_string),
    }
}
