pub mod cache;
pub mod source;

pub use cache::{RateCache, RateCacheConfig, RateSnapshot};
pub use source::{HttpRateSource, RateSource};

use crate::domain::currency::Currency;
use crate::error::{BillingError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Complete, immutable set of currency → base currency multipliers.
///
/// Deserialization goes through [`ExchangeRateSet::new`], so a stored or
/// received set is held to the same rules as a fetched one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<Currency, Decimal>",
    into = "BTreeMap<Currency, Decimal>"
)]
pub struct ExchangeRateSet {
    rates: BTreeMap<Currency, Decimal>,
}

impl ExchangeRateSet {
    /// Builds a set from foreign rates. Every foreign currency must be present
    /// with a positive rate; the base currency is pinned to 1.
    pub fn new(foreign: HashMap<Currency, Decimal>) -> Result<Self> {
        let mut rates = BTreeMap::new();
        rates.insert(Currency::BASE, Decimal::ONE);

        for currency in Currency::foreign() {
            let rate = foreign
                .get(&currency)
                .copied()
                .ok_or_else(|| BillingError::InvalidRateSet {
                    message: format!("missing rate for {}", currency),
                })?;
            if rate <= Decimal::ZERO {
                return Err(BillingError::InvalidRate {
                    currency: currency.to_string(),
                    rate,
                });
            }
            rates.insert(currency, rate);
        }

        Ok(Self { rates })
    }

    /// Builds a set from configured `code → rate` pairs
    pub fn from_codes(codes: &BTreeMap<String, Decimal>) -> Result<Self> {
        let mut foreign = HashMap::new();
        for (code, rate) in codes {
            let currency: Currency = code
                .trim()
                .to_uppercase()
                .parse()
                .map_err(|message| BillingError::InvalidRateSet { message })?;
            if !currency.is_base() {
                foreign.insert(currency, *rate);
            }
        }
        Self::new(foreign)
    }

    /// Multiplier into the base currency
    pub fn rate(&self, currency: Currency) -> Decimal {
        if currency.is_base() {
            return Decimal::ONE;
        }
        // Every constructor checks completeness
        self.rates[&currency]
    }

    pub fn to_base(&self, amount: Decimal, currency: Currency) -> Decimal {
        amount * self.rate(currency)
    }

    pub fn from_base(&self, amount: Decimal, currency: Currency) -> Decimal {
        amount / self.rate(currency)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Currency, Decimal)> + '_ {
        self.rates.iter().map(|(c, r)| (*c, *r))
    }
}

impl TryFrom<BTreeMap<Currency, Decimal>> for ExchangeRateSet {
    type Error = BillingError;

    fn try_from(mut rates: BTreeMap<Currency, Decimal>) -> Result<Self> {
        if let Some(base) = rates.remove(&Currency::BASE) {
            if base != Decimal::ONE {
                return Err(BillingError::InvalidRate {
                    currency: Currency::BASE.to_string(),
                    rate: base,
                });
            }
        }
        Self::new(rates.into_iter().collect())
    }
}

impl From<ExchangeRateSet> for BTreeMap<Currency, Decimal> {
    fn from(set: ExchangeRateSet) -> Self {
        set.rates
    }
}

/// Where the rates used for a run came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum RateProvenance {
    /// Fetched from the rate source for this request
    Fresh,
    /// Served from cache within the freshness window
    Cached,
    /// Source failed; an expired cached set was served
    Stale { age_seconds: u64 },
    /// Source failed with nothing cached; hard-coded rates were served
    Fallback,
}

impl RateProvenance {
    pub fn is_degraded(&self) -> bool {
        matches!(self, RateProvenance::Stale { .. } | RateProvenance::Fallback)
    }
}

impl fmt::Display for RateProvenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateProvenance::Fresh => write!(f, "fresh"),
            RateProvenance::Cached => write!(f, "cached"),
            RateProvenance::Stale { age_seconds } => write!(f, "stale ({}s old)", age_seconds),
            RateProvenance::Fallback => write!(f, "fallback"),
        }
    }
}
