//! Currency conversion table
//!
//! Maps payment token symbols to XCH and XCH to USD. Rates are fixed for the
//! duration of a run and come from configuration.

use crate::config::CurrencyConfig;
use crate::error::SkipReason;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::HashMap;

/// Decimal places kept for canonical prices
pub const CANONICAL_DP: u32 = 4;
/// Decimal places kept for fiat prices
pub const FIAT_DP: u32 = 2;

/// Round half away from zero to `dp` decimal places
pub fn round_dp(value: f64, dp: u32) -> f64 {
    match Decimal::from_f64(value) {
        Some(d) => d
            .round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero)
            .to_f64()
            .unwrap_or(value),
        None => value,
    }
}

/// A price expressed in both units, already rounded
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Valuation {
    pub canonical: f64,
    pub fiat: f64,
}

#[derive(Debug, Clone)]
pub struct CurrencyTable {
    canonical_symbol: String,
    fiat_rate: Decimal,
    /// Upper-cased symbol -> canonical units per token
    rates: HashMap<String, Decimal>,
}

impl CurrencyTable {
    pub fn new(canonical_symbol: &str, fiat_rate: f64) -> Self {
        Self {
            canonical_symbol: canonical_symbol.to_string(),
            fiat_rate: Decimal::from_f64(fiat_rate).unwrap_or_default(),
            rates: HashMap::new(),
        }
    }

    pub fn from_config(cfg: &CurrencyConfig) -> Self {
        let mut table = Self::new(&cfg.canonical_symbol, cfg.fiat_rate);
        for entry in &cfg.rates {
            table.insert_rate(&entry.code, entry.rate);
        }
        table
    }

    pub fn insert_rate(&mut self, code: &str, rate: f64) {
        if let Some(rate) = Decimal::from_f64(rate) {
            self.rates.insert(code.trim().to_uppercase(), rate);
        }
    }

    pub fn canonical_symbol(&self) -> &str {
        &self.canonical_symbol
    }

    pub fn fiat_rate(&self) -> f64 {
        self.fiat_rate.to_f64().unwrap_or(0.0)
    }

    pub fn is_canonical(&self, code: &str) -> bool {
        code.trim().eq_ignore_ascii_case(&self.canonical_symbol)
    }

    pub fn rate(&self, code: &str) -> Option<f64> {
        if self.is_canonical(code) {
            return Some(1.0);
        }
        self.rates
            .get(&code.trim().to_uppercase())
            .and_then(|r| r.to_f64())
    }

    /// Convert `amount` of `code` into canonical units, rounded to 4 dp.
    ///
    /// Unknown symbols and valuations that round to zero are rejected so a
    /// bad lookup never shows up as a free sale.
    pub fn to_canonical(&self, amount: f64, code: &str) -> Result<f64, SkipReason> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(SkipReason::InvalidAmount);
        }
        let amount = Decimal::from_f64(amount).ok_or(SkipReason::InvalidAmount)?;

        let canonical = if self.is_canonical(code) {
            amount
        } else {
            let rate = self
                .rates
                .get(&code.trim().to_uppercase())
                .ok_or(SkipReason::UnknownCurrency)?;
            amount * rate
        };

        let rounded =
            canonical.round_dp_with_strategy(CANONICAL_DP, RoundingStrategy::MidpointAwayFromZero);
        if rounded.is_zero() {
            return Err(SkipReason::ZeroValuation);
        }
        rounded.to_f64().ok_or(SkipReason::InvalidAmount)
    }

    /// Fiat value of a canonical amount, rounded to 2 dp
    pub fn to_fiat(&self, canonical: f64) -> f64 {
        match Decimal::from_f64(canonical) {
            Some(c) => (c * self.fiat_rate)
                .round_dp_with_strategy(FIAT_DP, RoundingStrategy::MidpointAwayFromZero)
                .to_f64()
                .unwrap_or(0.0),
            None => 0.0,
        }
    }

    pub fn value(&self, amount: f64, code: &str) -> Result<Valuation, SkipReason> {
        let canonical = self.to_canonical(amount, code)?;
        Ok(Valuation {
            canonical,
            fiat: self.to_fiat(canonical),
        })
    }
}
