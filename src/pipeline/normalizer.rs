//! Sale normalizer: resolved trade -> canonical sale record

use super::resolver::ResolvedSale;
use crate::currency::{round_dp, CurrencyTable};
use crate::error::SkipReason;
use crate::types::SaleRecord;
use tracing::warn;

pub struct SaleNormalizer {
    currency: CurrencyTable,
}

impl SaleNormalizer {
    pub fn new(currency: CurrencyTable) -> Self {
        Self { currency }
    }

    pub fn currency(&self) -> &CurrencyTable {
        &self.currency
    }

    pub fn normalize(&self, sale: &ResolvedSale<'_>) -> Result<SaleRecord, SkipReason> {
        let valuation = match self.currency.value(sale.amount, &sale.currency) {
            Ok(v) => v,
            Err(reason) => {
                warn!(
                    trade_id = %sale.trade_id,
                    amount = sale.amount,
                    currency = %sale.currency,
                    reason = reason.label(),
                    "Payment could not be valued"
                );
                return Err(reason);
            }
        };

        Ok(SaleRecord {
            nft_edition: sale.edition,
            price_xch: valuation.canonical,
            price_usd: valuation.fiat,
            date: sale.completed_at.date_naive(),
            original_price: round_dp(sale.amount, 8),
            original_currency: sale.currency.clone(),
            trade_id: Some(sale.trade_id.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn normalizer() -> SaleNormalizer {
        let mut table = CurrencyTable::new("XCH", 30.0);
        table.insert_rate("wUSDC.b", 0.0333);
        SaleNormalizer::new(table)
    }

    fn resolved(amount: f64, currency: &str, hour: u32) -> ResolvedSale<'static> {
        ResolvedSale {
            trade_id: "T1".to_string(),
            edition: 12,
            attributes: &[],
            amount,
            currency: currency.to_string(),
            completed_at: Utc.with_ymd_and_hms(2024, 6, 1, hour, 59, 59).unwrap(),
        }
    }

    #[test]
    fn xch_sale() {
        let rec = normalizer().normalize(&resolved(1.23456, "XCH", 10)).unwrap();
        assert_eq!(rec.price_xch, 1.2346);
        assert_eq!(rec.price_usd, 37.04);
        assert_eq!(rec.original_price, 1.23456);
        assert_eq!(rec.original_currency, "XCH");
        assert_eq!(rec.trade_id.as_deref(), Some("T1"));
    }

    #[test]
    fn token_sale_keeps_original_price() {
        let rec = normalizer().normalize(&resolved(150.0, "wUSDC.b", 10)).unwrap();
        assert_eq!(rec.price_xch, 4.995);
        assert_eq!(rec.price_usd, 149.85);
        assert_eq!(rec.original_price, 150.0);
        assert_eq!(rec.original_currency, "wUSDC.b");
    }

    #[test]
    fn time_of_day_is_dropped() {
        let n = normalizer();
        let morning = n.normalize(&resolved(1.0, "XCH", 0)).unwrap();
        let night = n.normalize(&resolved(1.0, "XCH", 23)).unwrap();
        assert_eq!(morning.date, night.date);
        assert_eq!(morning.date, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
    }

    #[test]
    fn unknown_currency_is_skipped() {
        assert_eq!(
            normalizer().normalize(&resolved(10.0, "DOGE", 1)),
            Err(SkipReason::UnknownCurrency)
        );
    }
}
