use crate::domain::currency::{resolve_currency, Currency, CurrencyResolution};
use crate::domain::types::{DeviceId, LocationId};
use crate::error::{BillingError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{debug, warn};

/// Device price sheet as supplied by the inventory; numeric fields are raw text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub device_id: DeviceId,
    pub location_id: LocationId,
    pub supports_color: bool,
    pub bw_unit_price: String,
    pub bw_currency: String,
    pub color_unit_price: String,
    pub color_currency: String,
    pub rental_fee: String,
    pub rental_currency: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    pub amount: Decimal,
    pub currency: Currency,
}

impl Price {
    pub fn new(amount: Decimal, currency: Currency) -> Self {
        Self { amount, currency }
    }

    pub fn zero() -> Self {
        Self::new(Decimal::ZERO, Currency::BASE)
    }
}

/// A currency token that was not recognized and fell back to the base currency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyDefault {
    pub device_id: DeviceId,
    pub field: String,
    pub token: String,
}

/// Validated pricing for one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevicePricing {
    pub device_id: DeviceId,
    pub supports_color: bool,
    pub bw: Price,
    pub color: Price,
    pub rental: Price,
    pub currency_defaults: Vec<CurrencyDefault>,
}

impl DevicePricing {
    pub fn has_rental(&self) -> bool {
        !self.rental.amount.is_zero()
    }
}

impl DeviceRecord {
    /// Parses the raw price sheet.
    ///
    /// The b/w price is always required, the color price only for color
    /// devices; a blank rental fee means no recurring charge.
    pub fn pricing(&self) -> Result<DevicePricing> {
        let mut currency_defaults = Vec::new();

        let bw = Price::new(
            self.parse_amount("bw_unit_price", &self.bw_unit_price, true)?,
            self.resolve("bw_currency", &self.bw_currency, &mut currency_defaults),
        );

        let color = if self.supports_color {
            Price::new(
                self.parse_amount("color_unit_price", &self.color_unit_price, true)?,
                self.resolve("color_currency", &self.color_currency, &mut currency_defaults),
            )
        } else {
            Price::zero()
        };

        let rental_amount = self.parse_amount("rental_fee", &self.rental_fee, false)?;
        let rental = if rental_amount.is_zero() {
            Price::zero()
        } else {
            Price::new(
                rental_amount,
                self.resolve("rental_currency", &self.rental_currency, &mut currency_defaults),
            )
        };

        Ok(DevicePricing {
            device_id: self.device_id.clone(),
            supports_color: self.supports_color,
            bw,
            color,
            rental,
            currency_defaults,
        })
    }

    fn parse_amount(&self, field: &str, raw: &str, required: bool) -> Result<Decimal> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            if required {
                return Err(self.integrity_error(field, raw));
            }
            return Ok(Decimal::ZERO);
        }

        // Price sheets entered with a comma decimal separator, e.g. "0,05"
        let candidate = if trimmed.contains(',') && !trimmed.contains('.') {
            trimmed.replace(',', ".")
        } else {
            trimmed.to_string()
        };

        let amount = Decimal::from_str(&candidate).map_err(|e| {
            debug!(device_id = %self.device_id, field, "Failed to parse amount: {}", e);
            self.integrity_error(field, raw)
        })?;

        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(self.integrity_error(field, raw));
        }

        Ok(amount)
    }

    fn resolve(&self, field: &str, token: &str, defaults: &mut Vec<CurrencyDefault>) -> Currency {
        let resolution = resolve_currency(token);
        match resolution {
            CurrencyResolution::Recognized(_) => {}
            CurrencyResolution::Blank => {
                debug!(
                    device_id = %self.device_id,
                    field,
                    "Blank currency, assuming {}",
                    Currency::BASE
                );
            }
            CurrencyResolution::Unrecognized => {
                warn!(
                    device_id = %self.device_id,
                    field,
                    token,
                    "Unrecognized currency token, assuming {}",
                    Currency::BASE
                );
                defaults.push(CurrencyDefault {
                    device_id: self.device_id.clone(),
                    field: field.to_string(),
                    token: token.to_string(),
                });
            }
        }
        resolution.currency()
    }

    fn integrity_error(&self, field: &str, raw: &str) -> BillingError {
        BillingError::DataIntegrity {
            device_id: self.device_id.to_string(),
            field: field.to_string(),
            value: raw.to_string(),
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn mono_device(id: &str, bw_price: &str, bw_currency: &str) -> DeviceRecord {
        DeviceRecord {
            device_id: DeviceId::new(id),
            location_id: LocationId::new("LOC-1"),
            supports_color: false,
            bw_unit_price: bw_price.to_string(),
            bw_currency: bw_currency.to_string(),
            color_unit_price: String::new(),
            color_currency: String::new(),
            rental_fee: "0".to_string(),
            rental_currency: String::new(),
        }
    }
}
