//! Incremental merge engine
//!
//! LOAD_STATE -> DETERMINE_WATERMARK -> FETCH_NEW_TRADES -> DEDUP_AND_RESOLVE
//! -> NORMALIZE_AND_APPEND -> RECOMPUTE_AGGREGATES -> PERSIST.
//!
//! The store is written once, at the end. Any error before that leaves the
//! document on disk as it was.

use super::normalizer::SaleNormalizer;
use super::resolver::TradeResolver;
use crate::error::{PipelineError, SkipReason};
use crate::marketplace::{fetch_completed_since, FetchOptions, OfferSource};
use crate::stats::{PipelineState, StateStore};
use crate::types::TradeOffer;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Outcome of one run, for logging and tests
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub fetched: usize,
    pub applied: usize,
    pub skipped: BTreeMap<SkipReason, usize>,
    pub touched_attributes: usize,
    pub total_attributes: usize,
    pub total_sales: usize,
    pub watermark_before: Option<DateTime<Utc>>,
    pub watermark_after: Option<DateTime<Utc>>,
    pub persisted: bool,
}

impl RunSummary {
    pub fn skipped_total(&self) -> usize {
        self.skipped.values().sum()
    }

    pub fn skipped_for(&self, reason: SkipReason) -> usize {
        self.skipped.get(&reason).copied().unwrap_or(0)
    }

    fn skip(&mut self, reason: SkipReason) {
        *self.skipped.entry(reason).or_insert(0) += 1;
    }
}

/// Watermark for this run: the stored one, or `now - lookback_days`
pub fn determine_watermark(
    state: &PipelineState,
    now: DateTime<Utc>,
    lookback_days: i64,
) -> DateTime<Utc> {
    state
        .last_processed_date
        .unwrap_or_else(|| now - Duration::days(lookback_days))
}

pub struct MergeEngine<'m> {
    resolver: TradeResolver<'m>,
    normalizer: SaleNormalizer,
    lookback_days: i64,
}

impl<'m> MergeEngine<'m> {
    pub fn new(resolver: TradeResolver<'m>, normalizer: SaleNormalizer, lookback_days: i64) -> Self {
        Self {
            resolver,
            normalizer,
            lookback_days,
        }
    }

    /// Fold fetched offers into `state`.
    ///
    /// Dedup is keyed by trade id, checked once per trade before fan-out.
    /// Every examined offer advances the watermark, applied or not.
    pub fn apply_offers(&self, state: &mut PipelineState, offers: &[TradeOffer]) -> RunSummary {
        let mut summary = RunSummary {
            fetched: offers.len(),
            watermark_before: state.last_processed_date,
            ..RunSummary::default()
        };

        let mut known = state.known_trade_ids();
        let mut touched: BTreeSet<String> = BTreeSet::new();

        for offer in offers {
            if let Some(completed) = offer.date_completed {
                state.advance_watermark(completed);
            }

            if let Some(error) = &offer.decode_error {
                warn!(trade_id = %offer.id, error = %error, "Undecodable offer skipped");
                summary.skip(SkipReason::Undecodable);
                continue;
            }

            if known.contains(&offer.id) {
                debug!(trade_id = %offer.id, "Trade already recorded");
                summary.skip(SkipReason::Duplicate);
                continue;
            }

            let record = match self
                .resolver
                .resolve(offer)
                .and_then(|resolved| self.normalizer.normalize(&resolved).map(|r| (resolved, r)))
            {
                Ok(pair) => pair,
                Err(reason) => {
                    debug!(trade_id = %offer.id, reason = reason.label(), "Trade skipped");
                    summary.skip(reason);
                    continue;
                }
            };
            let (resolved, sale) = record;

            touched.extend(state.append_fan_out(resolved.attributes, &sale));
            known.insert(offer.id.clone());
            summary.applied += 1;
        }

        state.recompute(touched.iter());

        summary.touched_attributes = touched.len();
        summary.watermark_after = state.last_processed_date;
        summary
    }

    /// One scheduled incremental run
    pub async fn run<S>(
        &self,
        store: &StateStore,
        source: &S,
        fetch: FetchOptions,
        now: DateTime<Utc>,
        dry_run: bool,
    ) -> Result<RunSummary, PipelineError>
    where
        S: OfferSource + Sync + ?Sized,
    {
        let fiat_rate = self.normalizer.currency().fiat_rate();
        let mut state = match store.load()? {
            Some(state) => state,
            None => PipelineState::new(fiat_rate, now),
        };

        let since = determine_watermark(&state, now, self.lookback_days);
        info!(
            since = %since.to_rfc3339(),
            stored = state.last_processed_date.is_some(),
            "Watermark determined"
        );

        let offers = fetch_completed_since(source, since, fetch).await?;
        if offers.is_empty() {
            info!("No new trades since watermark; nothing to do");
            return Ok(RunSummary {
                total_attributes: state.attributes.len(),
                total_sales: state.total_sales_records,
                watermark_before: state.last_processed_date,
                watermark_after: state.last_processed_date,
                ..RunSummary::default()
            });
        }

        let mut summary = self.apply_offers(&mut state, &offers);
        state.finalize(now, fiat_rate);
        summary.total_attributes = state.total_attributes;
        summary.total_sales = state.total_sales_records;

        if dry_run {
            info!("Dry run: statistics document left untouched");
        } else {
            store.save(&state)?;
            summary.persisted = true;
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::currency::CurrencyTable;
    use crate::marketplace::mock::PagedSource;
    use crate::metadata::MetadataIndex;
    use crate::pipeline::resolver::fixtures::{farmer, sale_offer};
    use chrono::TimeZone;
    use std::path::PathBuf;

    fn index() -> MetadataIndex {
        MetadataIndex::from_records(vec![
            farmer(12, &[("Background", "Forest"), ("Hat", "Cap")]),
            farmer(13, &[("Background", "Forest"), ("Eyes", "Laser")]),
            farmer(14, &[]),
        ])
    }

    fn engine(idx: &MetadataIndex) -> MergeEngine<'_> {
        let cfg = test_config();
        let currency = CurrencyTable::from_config(&cfg.currency);
        MergeEngine::new(
            TradeResolver::new(&cfg.collection, currency.canonical_symbol(), idx),
            SaleNormalizer::new(currency),
            30,
        )
    }

    fn fetch() -> FetchOptions {
        FetchOptions {
            page_size: 10,
            page_delay: std::time::Duration::ZERO,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 20, 0, 0, 0).unwrap()
    }

    fn temp_store(name: &str) -> (PathBuf, StateStore) {
        let dir = std::env::temp_dir().join(format!("traitstats_merge_{}_{}", name, uuid::Uuid::new_v4()));
        let store = StateStore::new(dir.join("stats.json"), false);
        (dir, store)
    }

    #[test]
    fn fan_out_and_aggregates() {
        let idx = index();
        let engine = engine(&idx);
        let mut state = PipelineState::new(30.0, now());

        let offers = vec![
            sale_offer("T2", "Chia Farmers #13", Some("XCH"), 3.0, 5),
            sale_offer("T1", "Chia Farmers #12", Some("XCH"), 1.0, 4),
        ];
        let summary = engine.apply_offers(&mut state, &offers);
        state.finalize(now(), 30.0);

        assert_eq!(summary.applied, 2);
        assert_eq!(summary.touched_attributes, 3);
        let forest = &state.attributes["Background|Forest"];
        assert_eq!(forest.total_sales, 2);
        assert_eq!(forest.min_price, 1.0);
        assert_eq!(forest.max_price, 3.0);
        assert_eq!(forest.avg_price, 2.0);
        assert_eq!(forest.last_sale_price, Some(3.0));
        assert_eq!(state.count_trade("T1"), 2);
        assert_eq!(state.total_sales_records, 4);
        assert!(state.inconsistent_buckets().is_empty());
    }

    #[test]
    fn duplicates_within_and_across_batches_are_skipped() {
        let idx = index();
        let engine = engine(&idx);
        let mut state = PipelineState::new(30.0, now());

        let t1 = sale_offer("T1", "Chia Farmers #12", Some("XCH"), 1.0, 4);
        let first = engine.apply_offers(&mut state, &[t1.clone(), t1.clone()]);
        assert_eq!(first.applied, 1);
        assert_eq!(first.skipped_for(SkipReason::Duplicate), 1);

        let second = engine.apply_offers(&mut state, &[t1]);
        assert_eq!(second.applied, 0);
        assert_eq!(second.skipped_for(SkipReason::Duplicate), 1);
        assert_eq!(state.count_trade("T1"), 2);
    }

    #[test]
    fn skipped_trade_still_advances_watermark() {
        let idx = index();
        let engine = engine(&idx);
        let mut state = PipelineState::new(30.0, now());

        let good = sale_offer("T1", "Chia Farmers #12", Some("XCH"), 1.0, 4);
        let mut foreign = sale_offer("X", "Space Cats #1", Some("XCH"), 1.0, 9);
        if let crate::types::TradeItem::Nft(nft) = &mut foreign.offered[0] {
            nft.collection.as_mut().unwrap().name = Some("Space Cats".to_string());
        }
        let summary = engine.apply_offers(&mut state, &[foreign.clone(), good]);

        assert_eq!(summary.applied, 1);
        assert_eq!(summary.skipped_for(SkipReason::ForeignCollection), 1);
        assert_eq!(state.count_trade("X"), 0);
        assert_eq!(state.last_processed_date, foreign.date_completed);
    }

    #[test]
    fn undecodable_offer_is_skipped_and_passed() {
        let idx = index();
        let engine = engine(&idx);
        let mut state = PipelineState::new(30.0, now());

        let broken = crate::types::TradeOffer::from_value(serde_json::json!({
            "id": "BAD",
            "status": 4,
            "date_completed": "2024-06-08T09:00:00Z",
            "offered": "not a list",
        }));
        let good = sale_offer("T1", "Chia Farmers #12", Some("XCH"), 1.0, 4);
        let summary = engine.apply_offers(&mut state, &[broken.clone(), good]);

        assert_eq!(summary.applied, 1);
        assert_eq!(summary.skipped_for(SkipReason::Undecodable), 1);
        assert_eq!(state.count_trade("T1"), 2);
        assert_eq!(state.last_processed_date, broken.date_completed);
    }

    #[test]
    fn edition_without_traits_is_not_counted_as_applied() {
        let idx = index();
        let engine = engine(&idx);
        let mut state = PipelineState::new(30.0, now());
        let offer = sale_offer("T4", "Chia Farmers #14", Some("XCH"), 1.0, 4);
        let summary = engine.apply_offers(&mut state, &[offer]);
        assert_eq!(summary.applied, 0);
        assert_eq!(summary.skipped_for(SkipReason::NoAttributes), 1);
        assert!(state.attributes.is_empty());
    }

    #[test]
    fn unknown_currency_is_counted_not_stored() {
        let idx = index();
        let engine = engine(&idx);
        let mut state = PipelineState::new(30.0, now());
        let offer = sale_offer("T1", "Chia Farmers #12", Some("DOGE"), 100.0, 4);
        let summary = engine.apply_offers(&mut state, &[offer]);
        assert_eq!(summary.skipped_for(SkipReason::UnknownCurrency), 1);
        assert!(state.attributes.is_empty());
    }

    #[test]
    fn watermark_falls_back_to_lookback() {
        let state = PipelineState::new(30.0, now());
        assert_eq!(
            determine_watermark(&state, now(), 30),
            now() - Duration::days(30)
        );
    }

    #[tokio::test]
    async fn no_new_trades_writes_nothing() {
        let idx = index();
        let engine = engine(&idx);
        let (dir, store) = temp_store("noop");

        let source = PagedSource::new(vec![]);
        let summary = engine.run(&store, &source, fetch(), now(), false).await.unwrap();

        assert_eq!(summary.fetched, 0);
        assert!(!summary.persisted);
        assert!(!store.exists());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn second_run_is_idempotent() {
        let idx = index();
        let engine = engine(&idx);
        let (dir, store) = temp_store("idempotent");

        let page = vec![
            sale_offer("T2", "Chia Farmers #13", Some("SBX"), 2000.0, 6),
            sale_offer("T1", "Chia Farmers #12", Some("XCH"), 1.0, 5),
        ];
        let source = PagedSource::new(vec![page]);
        let first = engine.run(&store, &source, fetch(), now(), false).await.unwrap();
        assert!(first.persisted);
        assert_eq!(first.applied, 2);
        let after_first = store.load().unwrap().unwrap();

        // upstream unchanged: the fetcher filters everything at or before the watermark
        let later = now() + Duration::hours(1);
        let second = engine.run(&store, &source, fetch(), later, false).await.unwrap();
        assert_eq!(second.fetched, 0);
        let after_second = store.load().unwrap().unwrap();
        assert_eq!(after_first, after_second);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn fetch_failure_leaves_store_untouched() {
        let idx = index();
        let engine = engine(&idx);
        let (dir, store) = temp_store("failure");

        let mut seeded = PipelineState::new(30.0, now());
        seeded.advance_watermark(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());
        store.save(&seeded).unwrap();

        let source = PagedSource::new(vec![]).failing_on(1);
        assert!(engine.run(&store, &source, fetch(), now(), false).await.is_err());
        assert_eq!(store.load().unwrap().unwrap(), seeded);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn dry_run_does_not_persist() {
        let idx = index();
        let engine = engine(&idx);
        let (dir, store) = temp_store("dry");

        let source = PagedSource::new(vec![vec![sale_offer(
            "T1",
            "Chia Farmers #12",
            Some("XCH"),
            1.0,
            5,
        )]]);
        let summary = engine.run(&store, &source, fetch(), now(), true).await.unwrap();
        assert_eq!(summary.applied, 1);
        assert!(!summary.persisted);
        assert!(!store.exists());
        std::fs::remove_dir_all(&dir).ok();
    }
}
