//! Canonical currencies and free-text currency token normalization.
//!
//! Device price sheets carry currency as whatever the operator typed: ISO
//! codes, symbols, or localized names. Every component that touches a
//! currency goes through [`normalize_currency`] so they all agree.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    /// Turkish lira, the base currency every invoice total is expressed in
    Try,
    Usd,
    Eur,
}

impl Currency {
    pub const BASE: Currency = Currency::Try;

    pub const ALL: [Currency; 3] = [Currency::Try, Currency::Usd, Currency::Eur];

    pub fn code(&self) -> &'static str {
        match self {
            Currency::Try => "TRY",
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
        }
    }

    pub fn is_base(&self) -> bool {
        *self == Currency::BASE
    }

    /// Currencies that need a conversion rate
    pub fn foreign() -> impl Iterator<Item = Currency> {
        Self::ALL.into_iter().filter(|c| !c.is_base())
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for Currency {
    type Err = String;

    /// Strict parse of a canonical code; use [`normalize_currency`] for free text
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TRY" => Ok(Currency::Try),
            "USD" => Ok(Currency::Usd),
            "EUR" => Ok(Currency::Eur),
            other => Err(format!("unsupported currency code: {}", other)),
        }
    }
}

/// Outcome of resolving a currency token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrencyResolution {
    Recognized(Currency),
    /// Token was blank; the base currency was assumed
    Blank,
    /// Token was not recognized; the base currency was assumed
    Unrecognized,
}

impl CurrencyResolution {
    pub fn currency(&self) -> Currency {
        match self {
            CurrencyResolution::Recognized(currency) => *currency,
            CurrencyResolution::Blank | CurrencyResolution::Unrecognized => Currency::BASE,
        }
    }
}

/// Maps a token to a currency without logging.
pub fn resolve_currency(token: &str) -> CurrencyResolution {
    let normalized = token.trim().to_uppercase();
    if normalized.is_empty() {
        return CurrencyResolution::Blank;
    }

    let currency = match normalized.as_str() {
        "TRY" | "TL" | "₺" | "YTL" | "LIRA" | "TÜRK LIRASI" | "TURK LIRASI" => Currency::Try,
        "USD" | "$" | "US$" | "DOLAR" | "DOLLAR" | "US DOLLAR" | "ABD DOLARI"
        | "AMERIKAN DOLARI" => Currency::Usd,
        "EUR" | "€" | "EURO" | "AVRO" => Currency::Eur,
        _ => return CurrencyResolution::Unrecognized,
    };

    CurrencyResolution::Recognized(currency)
}

/// Maps a free-text currency token to a canonical currency.
///
/// Unknown or blank tokens resolve to the base currency. Unknown tokens are
/// logged at warn level so misconfigured price sheets show up in run logs.
pub fn normalize_currency(token: &str) -> Currency {
    let resolution = resolve_currency(token);
    match resolution {
        CurrencyResolution::Recognized(_) => {}
        CurrencyResolution::Blank => {
            debug!("Blank currency token, assuming {}", Currency::BASE);
        }
        CurrencyResolution::Unrecognized => {
            warn!(
                token = token,
                "Unrecognized currency token, assuming {}",
                Currency::BASE
            );
        }
    }
    resolution.currency()
}
