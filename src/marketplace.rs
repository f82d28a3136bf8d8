//! Marketplace offers client
//!
//! Pages through completed offers for the collection, newest first, and stops
//! at the watermark.

use crate::config::MarketplaceConfig;
use crate::error::PipelineError;
use crate::types::{OffersPage, TradeOffer};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One page of completed offers, sorted by completion date descending
#[async_trait]
pub trait OfferSource {
    /// `page` starts at 1
    async fn fetch_page(&self, page: u32, page_size: u32) -> Result<Vec<TradeOffer>, PipelineError>;
}

/// Dexie-style offers API
pub struct DexieClient {
    client: Client,
    base_url: String,
    collection_id: String,
    completed_status: i64,
}

impl DexieClient {
    pub fn new(cfg: &MarketplaceConfig, collection_id: &str) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .user_agent(concat!("traitstats/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            collection_id: collection_id.to_string(),
            completed_status: cfg.completed_status,
        })
    }
}

#[async_trait]
impl OfferSource for DexieClient {
    async fn fetch_page(&self, page: u32, page_size: u32) -> Result<Vec<TradeOffer>, PipelineError> {
        let url = format!("{}/offers", self.base_url);
        let params = [
            ("status", self.completed_status.to_string()),
            ("offered_or_requested", self.collection_id.clone()),
            ("page", page.to_string()),
            ("page_size", page_size.to_string()),
            // Direction is the endpoint default, newest first; the stop rule
            // depends on it and `fetch_completed_since` warns if a page is not.
            ("sort", "date_completed".to_string()),
            ("compact", "true".to_string()),
        ];

        let response = self.client.get(&url).query(&params).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Api { status, page, body });
        }

        let data: OffersPage = response.json().await?;
        if data.success == Some(false) {
            warn!(page, "Marketplace flagged page as unsuccessful");
        }
        let offers = data.into_offers();
        let undecodable = offers.iter().filter(|o| o.is_undecodable()).count();
        if undecodable > 0 {
            warn!(page, undecodable, "Offers page contained records that could not be decoded");
        }
        debug!(page, offers = offers.len(), "Fetched offers page");
        Ok(offers)
    }
}

/// Paging parameters
#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
    pub page_size: u32,
    pub page_delay: Duration,
}

impl From<&MarketplaceConfig> for FetchOptions {
    fn from(cfg: &MarketplaceConfig) -> Self {
        Self {
            page_size: cfg.page_size,
            page_delay: Duration::from_millis(cfg.page_delay_ms),
        }
    }
}

/// Offers completed strictly after `since`.
fn newer_than(offer: &TradeOffer, since: DateTime<Utc>) -> bool {
    offer.date_completed.map(|d| d > since).unwrap_or(false)
}

/// Completion dates never increase along the page (undated offers ignored)
pub fn is_newest_first(offers: &[TradeOffer]) -> bool {
    let dates: Vec<DateTime<Utc>> = offers.iter().filter_map(|o| o.date_completed).collect();
    dates.windows(2).all(|w| w[0] >= w[1])
}

/// Whether another page is worth requesting: the last one was entirely
/// newer than the watermark.
pub fn should_continue(qualifying: usize, page_size: u32) -> bool {
    qualifying > 0 && qualifying >= page_size as usize
}

/// Every completed offer newer than `since`, newest first.
///
/// Any page error aborts the whole fetch; nothing is retried here.
pub async fn fetch_completed_since<S>(
    source: &S,
    since: DateTime<Utc>,
    opts: FetchOptions,
) -> Result<Vec<TradeOffer>, PipelineError>
where
    S: OfferSource + Sync + ?Sized,
{
    let mut collected = Vec::new();
    let mut page = 1u32;

    loop {
        let offers = source.fetch_page(page, opts.page_size).await?;
        let received = offers.len();
        if !is_newest_first(&offers) {
            warn!(page, "Offers page is not sorted newest first; paging may stop early");
        }
        let fresh: Vec<TradeOffer> = offers.into_iter().filter(|o| newer_than(o, since)).collect();
        let qualifying = fresh.len();
        collected.extend(fresh);

        debug!(page, received, qualifying, "Offers page filtered");

        if !should_continue(qualifying, opts.page_size) {
            break;
        }

        page += 1;
        tokio::time::sleep(opts.page_delay).await;
    }

    info!(
        pages = page,
        offers = collected.len(),
        since = %since.to_rfc3339(),
        "Fetched completed offers"
    );
    Ok(collected)
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::sync::Mutex;

    /// Serves canned pages and records which pages were requested
    pub struct PagedSource {
        pages: Vec<Vec<TradeOffer>>,
        pub requested: Mutex<Vec<u32>>,
        fail_on: Option<u32>,
    }

    impl PagedSource {
        pub fn new(pages: Vec<Vec<TradeOffer>>) -> Self {
            Self {
                pages,
                requested: Mutex::new(Vec::new()),
                fail_on: None,
            }
        }

        pub fn failing_on(mut self, page: u32) -> Self {
            self.fail_on = Some(page);
            self
        }
    }

    #[async_trait]
    impl OfferSource for PagedSource {
        async fn fetch_page(&self, page: u32, _page_size: u32) -> Result<Vec<TradeOffer>, PipelineError> {
            self.requested.lock().unwrap().push(page);
            if self.fail_on == Some(page) {
                return Err(PipelineError::Api {
                    status: 503,
                    page,
                    body: "unavailable".to_string(),
                });
            }
            Ok(self
                .pages
                .get(page as usize - 1)
                .cloned()
                .unwrap_or_default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::PagedSource;
    use super::*;
    use chrono::TimeZone;

    fn offer(id: &str, day: u32) -> TradeOffer {
        TradeOffer {
            id: id.to_string(),
            status: 4,
            date_completed: Some(Utc.with_ymd_and_hms(2024, 6, day, 12, 0, 0).unwrap()),
            offered: Vec::new(),
            requested: Vec::new(),
            decode_error: None,
        }
    }

    fn opts() -> FetchOptions {
        FetchOptions {
            page_size: 2,
            page_delay: Duration::ZERO,
        }
    }

    fn since() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap()
    }

    #[test]
    fn page_order_check() {
        assert!(is_newest_first(&[offer("a", 9), offer("b", 9), offer("c", 2)]));
        assert!(!is_newest_first(&[offer("a", 2), offer("b", 9)]));
        assert!(is_newest_first(&[]));
    }

    #[test]
    fn continue_rule() {
        assert!(should_continue(100, 100));
        assert!(!should_continue(99, 100));
        assert!(!should_continue(0, 100));
    }

    #[tokio::test]
    async fn stops_on_page_that_crosses_watermark() {
        let source = PagedSource::new(vec![
            vec![offer("a", 9), offer("b", 8)],
            vec![offer("c", 7), offer("d", 2)],
            vec![offer("e", 1)],
        ]);
        let offers = fetch_completed_since(&source, since(), opts()).await.unwrap();

        let ids: Vec<_> = offers.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(*source.requested.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn empty_first_page_is_a_single_request() {
        let source = PagedSource::new(vec![vec![offer("old", 1)]]);
        let offers = fetch_completed_since(&source, since(), opts()).await.unwrap();
        assert!(offers.is_empty());
        assert_eq!(*source.requested.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn offers_at_the_watermark_are_excluded() {
        let mut at = offer("at", 3);
        at.date_completed = Some(since());
        let source = PagedSource::new(vec![vec![offer("new", 4), at]]);
        let offers = fetch_completed_since(&source, since(), opts()).await.unwrap();
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].id, "new");
    }

    #[tokio::test]
    async fn page_error_aborts_the_fetch() {
        let source = PagedSource::new(vec![vec![offer("a", 9), offer("b", 8)]]).failing_on(2);
        let err = fetch_completed_since(&source, since(), opts()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Api { status: 503, page: 2, .. }));
    }
}
