//! End-of-run reporting
//!
//! Everything here goes to the log; the statistics document is the only
//! machine-readable output.

use crate::backfill::BackfillSummary;
use crate::error::SkipReason;
use crate::pipeline::RunSummary;
use crate::stats::{AttributeStats, PipelineState};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::info;

fn skipped_labels(skipped: &BTreeMap<SkipReason, usize>) -> String {
    if skipped.is_empty() {
        return "none".to_string();
    }
    skipped
        .iter()
        .map(|(reason, n)| format!("{}={}", reason.label(), n))
        .collect::<Vec<_>>()
        .join(",")
}

fn fmt_watermark(ts: Option<chrono::DateTime<chrono::Utc>>) -> String {
    ts.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".to_string())
}

pub fn log_run_summary(summary: &RunSummary) {
    info!(
        fetched = summary.fetched,
        applied = summary.applied,
        skipped = summary.skipped_total(),
        skipped_by_reason = %skipped_labels(&summary.skipped),
        touched_attributes = summary.touched_attributes,
        total_attributes = summary.total_attributes,
        total_sales = summary.total_sales,
        watermark_before = %fmt_watermark(summary.watermark_before),
        watermark_after = %fmt_watermark(summary.watermark_after),
        persisted = summary.persisted,
        "Incremental run complete"
    );
}

pub fn log_backfill_summary(summary: &BackfillSummary) {
    info!(
        rows = summary.rows,
        applied = summary.applied,
        skipped = summary.skipped_total(),
        skipped_by_reason = %skipped_labels(&summary.skipped),
        total_attributes = summary.total_attributes,
        total_sales = summary.total_sales,
        watermark = %fmt_watermark(summary.watermark),
        "Backfill complete"
    );
}

/// Attributes with the highest average price. Ties go to the larger sample.
pub fn top_by_avg_price(state: &PipelineState, n: usize) -> Vec<&AttributeStats> {
    let mut ranked: Vec<&AttributeStats> =
        state.attributes.values().filter(|a| a.total_sales > 0).collect();
    ranked.sort_by(|a, b| {
        b.avg_price
            .partial_cmp(&a.avg_price)
            .unwrap_or(Ordering::Equal)
            .then(b.total_sales.cmp(&a.total_sales))
    });
    ranked.truncate(n);
    ranked
}

/// Most traded attributes
pub fn top_by_sales(state: &PipelineState, n: usize) -> Vec<&AttributeStats> {
    let mut ranked: Vec<&AttributeStats> =
        state.attributes.values().filter(|a| a.total_sales > 0).collect();
    // Stable: equal counts keep key order.
    ranked.sort_by(|a, b| b.total_sales.cmp(&a.total_sales));
    ranked.truncate(n);
    ranked
}

pub fn log_leaderboards(state: &PipelineState, n: usize) {
    if n == 0 || state.attributes.is_empty() {
        return;
    }

    for (rank, attr) in top_by_avg_price(state, n).iter().enumerate() {
        info!(
            rank = rank + 1,
            attribute = %attr.key(),
            avg_price = attr.avg_price,
            sales = attr.total_sales,
            "Top attribute by average price"
        );
    }
    for (rank, attr) in top_by_sales(state, n).iter().enumerate() {
        info!(
            rank = rank + 1,
            attribute = %attr.key(),
            sales = attr.total_sales,
            last_sale_date = ?attr.last_sale_date,
            "Top attribute by sales"
        );
    }
}
