//! Core types used throughout TraitStats
//!
//! Marketplace offer payloads, collection metadata and the canonical sale record.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Collection reference attached to an NFT item
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionRef {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// NFT side of a trade
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NftItem {
    /// NFT launcher id
    pub id: String,
    /// Display name, usually "<Collection> #0123"
    pub name: String,
    pub collection: Option<CollectionRef>,
}

/// Fungible payment side of a trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyItem {
    /// Token symbol; `None` means the native unit
    pub code: Option<String>,
    pub amount: f64,
}

/// One entry of an offer's `offered` / `requested` list.
///
/// The wire format is a flat object with an `is_nft` flag; it is decoded
/// into an explicit variant so callers never inspect optional fields. Entries
/// that do not fit the expected shape decode as [`TradeItem::Other`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "serde_json::Value")]
pub enum TradeItem {
    Nft(NftItem),
    Currency(CurrencyItem),
    /// Neither an NFT nor an amount-carrying token (ignored)
    Other,
}

#[derive(Debug, Default, Deserialize)]
struct RawTradeItem {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default, deserialize_with = "lenient_amount")]
    amount: Option<f64>,
    #[serde(default)]
    is_nft: Option<bool>,
    #[serde(default)]
    collection: Option<CollectionRef>,
}

/// Amounts arrive as numbers, occasionally as numeric strings
fn lenient_amount<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

impl From<RawTradeItem> for TradeItem {
    fn from(raw: RawTradeItem) -> Self {
        if raw.is_nft == Some(true) {
            return TradeItem::Nft(NftItem {
                id: raw.id.unwrap_or_default(),
                name: raw.name.unwrap_or_default(),
                collection: raw.collection,
            });
        }
        match raw.amount {
            Some(amount) => TradeItem::Currency(CurrencyItem {
                code: raw.code.filter(|c| !c.trim().is_empty()),
                amount,
            }),
            None => TradeItem::Other,
        }
    }
}

impl From<serde_json::Value> for TradeItem {
    fn from(value: serde_json::Value) -> Self {
        serde_json::from_value::<RawTradeItem>(value)
            .map(TradeItem::from)
            .unwrap_or(TradeItem::Other)
    }
}

impl TradeItem {
    pub fn as_nft(&self) -> Option<&NftItem> {
        match self {
            TradeItem::Nft(nft) => Some(nft),
            _ => None,
        }
    }

    pub fn as_currency(&self) -> Option<&CurrencyItem> {
        match self {
            TradeItem::Currency(c) => Some(c),
            _ => None,
        }
    }
}

/// Trade offer as returned by the marketplace
#[derive(Debug, Clone, Deserialize)]
pub struct TradeOffer {
    pub id: String,
    /// Marketplace status code (4 = completed)
    pub status: i64,
    #[serde(default)]
    pub date_completed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub offered: Vec<TradeItem>,
    #[serde(default)]
    pub requested: Vec<TradeItem>,
    /// Set when the record could not be decoded; only `id` and
    /// `date_completed` are salvaged
    #[serde(skip)]
    pub decode_error: Option<String>,
}

impl TradeOffer {
    /// Decode one offer from a page, keeping what can be salvaged from an
    /// off-shape record so it is skipped instead of failing the page.
    pub fn from_value(value: serde_json::Value) -> Self {
        match serde_json::from_value::<TradeOffer>(value.clone()) {
            Ok(offer) => offer,
            Err(e) => TradeOffer {
                id: value
                    .get("id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                status: value.get("status").and_then(|v| v.as_i64()).unwrap_or(-1),
                date_completed: value
                    .get("date_completed")
                    .and_then(|v| v.as_str())
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|d| d.with_timezone(&Utc)),
                offered: Vec::new(),
                requested: Vec::new(),
                decode_error: Some(e.to_string()),
            },
        }
    }

    pub fn is_undecodable(&self) -> bool {
        self.decode_error.is_some()
    }
}

/// One page of the offers endpoint. Offers stay raw until
/// [`OffersPage::into_offers`] so one bad record cannot sink the page.
#[derive(Debug, Clone, Deserialize)]
pub struct OffersPage {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub offers: Vec<serde_json::Value>,
}

impl OffersPage {
    pub fn into_offers(self) -> Vec<TradeOffer> {
        self.offers.into_iter().map(TradeOffer::from_value).collect()
    }
}

/// Trait pair on an NFT
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NftAttribute {
    pub trait_type: String,
    pub value: String,
}

impl NftAttribute {
    /// Bucket key in the statistics store
    pub fn key(&self) -> String {
        attribute_key(&self.trait_type, &self.value)
    }
}

/// Build the `category|value` key for an attribute bucket
pub fn attribute_key(category: &str, value: &str) -> String {
    format!("{}|{}", category, value)
}

/// Metadata of one collection member
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NftMetadata {
    pub edition: u32,
    #[serde(default)]
    pub attributes: Vec<NftAttribute>,
}

/// Canonical sale observation stored in every attribute bucket of the sold NFT
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleRecord {
    pub nft_edition: u32,
    /// Price in XCH, 4 decimals
    pub price_xch: f64,
    /// Price in USD, 2 decimals
    pub price_usd: f64,
    /// UTC calendar day of completion
    pub date: NaiveDate,
    pub original_price: f64,
    pub original_currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trade_id: Option<String>,
}

impl fmt::Display for SaleRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} {:.4} XCH (${:.2}) from {} {}",
            self.nft_edition,
            self.date,
            self.price_xch,
            self.price_usd,
            self.original_price,
            self.original_currency
        )
    }
}
