use crate::domain::currency::Currency;
use crate::error::{BillingError, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Field names accepted for the buying rate of a currency entry
const BUYING_RATE_FIELDS: [&str; 3] = ["buying", "forex_buying", "ForexBuying"];

/// Supplier of current buying rates into the base currency
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Fetches rates for the requested currencies; any missing code is an error
    async fn fetch(&self, currencies: &[Currency]) -> Result<HashMap<Currency, Decimal>>;
}

/// Fetches a JSON rate document keyed by currency code:
///
/// ```json
/// { "USD": { "buying": 32.41 }, "EUR": { "ForexBuying": "35,12" } }
/// ```
pub struct HttpRateSource {
    client: Client,
    url: String,
}

impl HttpRateSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BillingError::RateSource {
                message: format!("failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl RateSource for HttpRateSource {
    async fn fetch(&self, currencies: &[Currency]) -> Result<HashMap<Currency, Decimal>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| BillingError::RateSource {
                message: format!("request to {} failed: {}", self.url, e),
            })?;

        if !response.status().is_success() {
            return Err(BillingError::RateSource {
                message: format!("rate source returned status {}", response.status()),
            });
        }

        let document: HashMap<String, Value> =
            response.json().await.map_err(|e| BillingError::RateSource {
                message: format!("malformed rate document: {}", e),
            })?;

        debug!("Fetched rate document with {} entries", document.len());
        parse_rate_document(&document, currencies)
    }
}

/// Extracts buying rates for `currencies` from a document keyed by code
pub fn parse_rate_document(
    document: &HashMap<String, Value>,
    currencies: &[Currency],
) -> Result<HashMap<Currency, Decimal>> {
    let mut rates = HashMap::with_capacity(currencies.len());

    for currency in currencies {
        let entry = document
            .iter()
            .find(|(code, _)| code.trim().eq_ignore_ascii_case(currency.code()))
            .map(|(_, entry)| entry)
            .ok_or_else(|| BillingError::RateSource {
                message: format!("rate document has no entry for {}", currency),
            })?;

        let raw = BUYING_RATE_FIELDS
            .iter()
            .find_map(|field| entry.get(*field))
            .ok_or_else(|| BillingError::RateSource {
                message: format!("entry for {} has no buying rate", currency),
            })?;

        let rate = parse_rate_value(raw).ok_or_else(|| BillingError::RateSource {
            message: format!("buying rate for {} is not a number: {}", currency, raw),
        })?;

        if rate <= Decimal::ZERO {
            return Err(BillingError::InvalidRate {
                currency: currency.to_string(),
                rate,
            });
        }

        rates.insert(*currency, rate);
    }

    Ok(rates)
}

fn parse_rate_value(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::Number(number) => number.to_string(),
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.contains(',') && !trimmed.contains('.') {
                trimmed.replace(',', ".")
            } else {
                trimmed.to_string()
            }
        }
        _ => return None,
    };

    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}
