//! Bulk backfill from a historical sales export
//!
//! The export is flat: one row per (attribute, sale) pair. Rows carry no
//! trade id, so the resulting sales can never collide with incrementally
//! ingested ones.

use crate::currency::{round_dp, CurrencyTable, CANONICAL_DP, FIAT_DP};
use crate::error::{PipelineError, SkipReason};
use crate::stats::PipelineState;
use crate::types::SaleRecord;
use chrono::{DateTime, NaiveDate, Utc};
use csv::{ReaderBuilder, Trim};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

/// One row of the export
#[derive(Debug, Clone, Deserialize)]
pub struct BackfillRow {
    #[serde(rename = "Category")]
    pub category: String,
    #[serde(rename = "Attribute")]
    pub attribute: String,
    #[serde(rename = "Price")]
    pub price: f64,
    #[serde(rename = "Currency")]
    pub currency: String,
    #[serde(rename = "XCH value", default)]
    pub xch_value: Option<f64>,
    #[serde(rename = "Dollar value", default)]
    pub dollar_value: Option<f64>,
    #[serde(rename = "NFT_Edition")]
    pub nft_edition: u32,
    #[serde(rename = "Trade_Date")]
    pub trade_date: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackfillSummary {
    pub rows: usize,
    pub applied: usize,
    pub skipped: BTreeMap<SkipReason, usize>,
    pub total_attributes: usize,
    pub total_sales: usize,
    pub watermark: Option<DateTime<Utc>>,
}

impl BackfillSummary {
    pub fn skipped_total(&self) -> usize {
        self.skipped.values().sum()
    }

    fn skip(&mut self, reason: SkipReason) {
        *self.skipped.entry(reason).or_insert(0) += 1;
    }
}

/// Calendar day from `2024-06-01`, `2024-06-01 13:00:00` or an RFC 3339 stamp
pub fn parse_trade_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc).date_naive());
    }
    raw.get(..10)
        .and_then(|day| NaiveDate::parse_from_str(day, "%Y-%m-%d").ok())
}

impl BackfillRow {
    /// Canonical sale for this row.
    ///
    /// Missing XCH/USD columns are derived from `Price`/`Currency` with the
    /// configured rates.
    pub fn to_sale(&self, currency: &CurrencyTable) -> Result<SaleRecord, SkipReason> {
        if self.category.trim().is_empty() || self.attribute.trim().is_empty() {
            return Err(SkipReason::MalformedRow);
        }
        let date = parse_trade_date(&self.trade_date).ok_or(SkipReason::MalformedRow)?;

        let price_xch = match self.xch_value {
            Some(v) if v.is_finite() && v > 0.0 => round_dp(v, CANONICAL_DP),
            Some(_) => return Err(SkipReason::InvalidAmount),
            None => currency.to_canonical(self.price, &self.currency)?,
        };
        let price_usd = match self.dollar_value {
            Some(v) if v.is_finite() && v >= 0.0 => round_dp(v, FIAT_DP),
            _ => currency.to_fiat(price_xch),
        };

        Ok(SaleRecord {
            nft_edition: self.nft_edition,
            price_xch,
            price_usd,
            date,
            original_price: self.price,
            original_currency: self.currency.trim().to_string(),
            trade_id: None,
        })
    }
}

/// Build a fresh document from export rows read from `input`
pub fn build_state<R: Read>(
    input: R,
    currency: &CurrencyTable,
    now: DateTime<Utc>,
) -> Result<(PipelineState, BackfillSummary), csv::Error> {
    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_reader(input);

    // Fail early on a file that is not the expected export at all.
    reader.headers()?;

    let mut state = PipelineState::new(currency.fiat_rate(), now);
    let mut summary = BackfillSummary::default();
    let mut latest: Option<NaiveDate> = None;

    for (line, result) in reader.deserialize::<BackfillRow>().enumerate() {
        summary.rows += 1;
        let row = match result {
            Ok(row) => row,
            Err(e) => {
                warn!(line = line + 2, error = %e, "Unreadable backfill row");
                summary.skip(SkipReason::MalformedRow);
                continue;
            }
        };

        match row.to_sale(currency) {
            Ok(sale) => {
                latest = latest.max(Some(sale.date));
                state.append_sale(row.category.trim(), row.attribute.trim(), sale);
                summary.applied += 1;
            }
            Err(reason) => {
                warn!(line = line + 2, reason = reason.label(), "Backfill row skipped");
                summary.skip(reason);
            }
        }
    }

    state.recompute_all();
    // The export only has day precision; treat the last day as fully covered.
    if let Some(end_of_day) = latest.and_then(|day| day.and_hms_opt(23, 59, 59)) {
        state.advance_watermark(end_of_day.and_utc());
    }
    state.finalize(now, currency.fiat_rate());

    summary.total_attributes = state.total_attributes;
    summary.total_sales = state.total_sales_records;
    summary.watermark = state.last_processed_date;
    Ok((state, summary))
}

/// Read the export at `path` and build a fresh document
pub fn load_backfill(
    path: &Path,
    currency: &CurrencyTable,
    now: DateTime<Utc>,
) -> Result<(PipelineState, BackfillSummary), PipelineError> {
    let file = std::fs::File::open(path).map_err(|source| PipelineError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let (state, summary) =
        build_state(file, currency, now).map_err(|source| PipelineError::Csv {
            path: path.to_path_buf(),
            source,
        })?;

    info!(
        path = %path.display(),
        rows = summary.rows,
        applied = summary.applied,
        skipped = summary.skipped_total(),
        "Backfill export processed"
    );
    Ok((state, summary))
}
