//! Trade resolver
//!
//! Finds which side of an offer carries the NFT and which carries the
//! payment, then maps the NFT to its edition and traits.

use crate::config::CollectionConfig;
use crate::error::SkipReason;
use crate::metadata::{parse_edition, MetadataIndex};
use crate::types::{CollectionRef, CurrencyItem, NftAttribute, NftItem, TradeItem, TradeOffer};
use chrono::{DateTime, Utc};
use tracing::warn;

/// Which list of the offer held the NFT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Offered,
    Requested,
}

/// First NFT item in `offered`, then `requested`
pub fn find_nft(offer: &TradeOffer) -> Option<(Side, &NftItem)> {
    offer
        .offered
        .iter()
        .filter_map(TradeItem::as_nft)
        .map(|nft| (Side::Offered, nft))
        .chain(
            offer
                .requested
                .iter()
                .filter_map(TradeItem::as_nft)
                .map(|nft| (Side::Requested, nft)),
        )
        .next()
}

/// First amount-carrying token on the given side
pub fn find_payment(items: &[TradeItem]) -> Option<&CurrencyItem> {
    items.iter().find_map(TradeItem::as_currency)
}

/// NFT and payment sides of an offer, before any collection checks
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTrade<'o> {
    pub nft_side: Side,
    pub nft: &'o NftItem,
    pub payment: &'o CurrencyItem,
}

impl<'o> ResolvedTrade<'o> {
    pub fn from_offer(offer: &'o TradeOffer) -> Option<Self> {
        Self::match_sides(offer).ok()
    }

    fn match_sides(offer: &'o TradeOffer) -> Result<Self, SkipReason> {
        let (nft_side, nft) = find_nft(offer).ok_or(SkipReason::NoNft)?;
        let payment_side = match nft_side {
            Side::Offered => &offer.requested,
            Side::Requested => &offer.offered,
        };
        let payment = find_payment(payment_side).ok_or(SkipReason::NoPayment)?;
        Ok(Self {
            nft_side,
            nft,
            payment,
        })
    }
}

/// A trade tied to a collection member, ready for normalization
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSale<'a> {
    pub trade_id: String,
    pub edition: u32,
    pub attributes: &'a [NftAttribute],
    pub amount: f64,
    /// Payment symbol, already defaulted to the canonical unit when absent
    pub currency: String,
    pub completed_at: DateTime<Utc>,
}

pub struct TradeResolver<'m> {
    collection_id: String,
    /// Lower-cased name and aliases
    names: Vec<String>,
    canonical_symbol: String,
    metadata: &'m MetadataIndex,
}

impl<'m> TradeResolver<'m> {
    pub fn new(
        collection: &CollectionConfig,
        canonical_symbol: &str,
        metadata: &'m MetadataIndex,
    ) -> Self {
        let names = std::iter::once(&collection.name)
            .chain(collection.aliases.iter())
            .map(|n| n.trim().to_lowercase())
            .filter(|n| !n.is_empty())
            .collect();
        Self {
            collection_id: collection.id.clone(),
            names,
            canonical_symbol: canonical_symbol.to_string(),
            metadata,
        }
    }

    fn belongs_to_collection(&self, nft: &NftItem) -> bool {
        match &nft.collection {
            Some(CollectionRef { id: Some(id), .. }) if *id == self.collection_id => true,
            Some(CollectionRef { name: Some(name), .. }) => {
                self.names.contains(&name.trim().to_lowercase())
            }
            Some(CollectionRef { id: Some(_), name: None }) => false,
            // No usable collection block: fall back to the display name.
            _ => self.name_has_collection_prefix(&nft.name),
        }
    }

    /// `"<collection> #12"` or `"<collection> 12"`; the name must continue
    /// straight into the edition number.
    fn name_has_collection_prefix(&self, display_name: &str) -> bool {
        let name = display_name.trim().to_lowercase();
        self.names.iter().any(|n| match name.strip_prefix(n.as_str()) {
            Some(rest) => rest
                .trim_start()
                .trim_start_matches('#')
                .starts_with(|c: char| c.is_ascii_digit()),
            None => false,
        })
    }

    pub fn resolve(&self, offer: &TradeOffer) -> Result<ResolvedSale<'m>, SkipReason> {
        let completed_at = offer.date_completed.ok_or(SkipReason::NoCompletionDate)?;
        let trade = ResolvedTrade::match_sides(offer)?;

        if !self.belongs_to_collection(trade.nft) {
            return Err(SkipReason::ForeignCollection);
        }

        let edition = match parse_edition(&trade.nft.name) {
            Some(e) => e,
            None => {
                warn!(
                    trade_id = %offer.id,
                    nft = %trade.nft.name,
                    "No edition number in NFT name"
                );
                return Err(SkipReason::NoEdition);
            }
        };

        let metadata = self
            .metadata
            .get(edition)
            .ok_or(SkipReason::UnknownEdition)?;
        if metadata.attributes.is_empty() {
            warn!(trade_id = %offer.id, edition, "Edition has no attributes to credit");
            return Err(SkipReason::NoAttributes);
        }

        let currency = trade
            .payment
            .code
            .clone()
            .unwrap_or_else(|| self.canonical_symbol.clone());

        Ok(ResolvedSale {
            trade_id: offer.id.clone(),
            edition,
            attributes: &metadata.attributes,
            amount: trade.payment.amount,
            currency,
            completed_at,
        })
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::types::{CollectionRef, NftAttribute, NftMetadata, TradeOffer};
    use chrono::{TimeZone, Utc};

    pub fn nft_json(name: &str, collection: &str) -> serde_json::Value {
        serde_json::json!({
            "id": format!("nft1{}", name.len()),
            "name": name,
            "is_nft": true,
            "collection": {"id": "col1other", "name": collection}
        })
    }

    pub fn pay_json(code: Option<&str>, amount: f64) -> serde_json::Value {
        match code {
            Some(code) => serde_json::json!({"id": code, "code": code, "amount": amount}),
            None => serde_json::json!({"id": "xch", "amount": amount}),
        }
    }

    /// Completed offer selling `name` for `amount` of `code` on 2024-06-`day`
    pub fn sale_offer(id: &str, name: &str, code: Option<&str>, amount: f64, day: u32) -> TradeOffer {
        let json = serde_json::json!({
            "id": id,
            "status": 4,
            "date_completed": Utc.with_ymd_and_hms(2024, 6, day, 15, 30, 0).unwrap().to_rfc3339(),
            "offered": [nft_json(name, "Chia Farmers")],
            "requested": [pay_json(code, amount)],
        });
        serde_json::from_value(json).unwrap()
    }

    pub fn farmer(edition: u32, traits: &[(&str, &str)]) -> NftMetadata {
        NftMetadata {
            edition,
            attributes: traits
                .iter()
                .map(|(t, v)| NftAttribute {
                    trait_type: t.to_string(),
                    value: v.to_string(),
                })
                .collect(),
        }
    }

    /// Configured collection id under a name the resolver does not know
    pub fn collection_ref() -> CollectionRef {
        CollectionRef {
            id: Some("col1farmers".to_string()),
            name: Some("Renamed Collection".to_string()),
        }
    }
}
