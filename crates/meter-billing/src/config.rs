use crate::domain::currency::Currency;
use crate::error::{BillingError, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "meter-billing.toml";
const ENV_PREFIX: &str = "METER_BILLING_";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BillingConfig {
    pub database: DatabaseConfig,
    pub rates: RatesConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:meter-billing.db?mode=rwc".to_string(),
            max_connections: 5,
            acquire_timeout_seconds: 30,
            busy_timeout_ms: 5000,
        }
    }
}

/// Exchange rate source and cache settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RatesConfig {
    pub source_url: String,
    /// Cached rates are served without refetching for this long
    pub ttl_seconds: u64,
    pub request_timeout_seconds: u64,
    /// Rates used when the source fails and nothing is cached, keyed by currency code
    pub fallback: BTreeMap<String, Decimal>,
}

impl Default for RatesConfig {
    fn default() -> Self {
        let mut fallback = BTreeMap::new();
        fallback.insert(Currency::Usd.code().to_string(), dec!(32.50));
        fallback.insert(Currency::Eur.code().to_string(), dec!(35.00));

        Self {
            source_url: "http://localhost:8080/rates/today.json".to_string(),
            ttl_seconds: 300,
            request_timeout_seconds: 5,
            fallback,
        }
    }
}

impl RatesConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub default_filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Compact,
            default_filter: "meter_billing=info".to_string(),
        }
    }
}

impl BillingConfig {
    /// Layered load: defaults, then the TOML file, then `METER_BILLING_*` env vars.
    pub fn load(path_override: Option<PathBuf>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(BillingConfig::default()));

        match path_override {
            Some(path) => {
                if !path.exists() {
                    return Err(BillingError::ConfigurationError {
                        message: format!("config file {} does not exist", path.display()),
                    });
                }
                figment = figment.merge(Toml::file(path));
            }
            None => {
                let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    figment = figment.merge(Toml::file(default_path));
                }
            }
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: BillingConfig =
            figment
                .extract()
                .map_err(|e| BillingError::ConfigurationError {
                    message: e.to_string(),
                })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.url.trim().is_empty() {
            return Err(BillingError::ConfigurationError {
                message: "database.url must not be empty".to_string(),
            });
        }
        if self.database.max_connections == 0 {
            return Err(BillingError::ConfigurationError {
                message: "database.max_connections must be at least 1".to_string(),
            });
        }
        if self.rates.source_url.trim().is_empty() {
            return Err(BillingError::ConfigurationError {
                message: "rates.source_url must not be empty".to_string(),
            });
        }
        if self.rates.request_timeout_seconds == 0 {
            return Err(BillingError::ConfigurationError {
                message: "rates.request_timeout_seconds must be at least 1".to_string(),
            });
        }
        for (code, rate) in &self.rates.fallback {
            if *rate <= Decimal::ZERO {
                return Err(BillingError::ConfigurationError {
                    message: format!("fallback rate for {} must be positive, got {}", code, rate),
                });
            }
        }
        Ok(())
    }
}
