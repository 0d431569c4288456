#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use meter_billing::aggregator::{BillingRequest, BillingRunProcessor};
use meter_billing::config::DatabaseConfig;
use meter_billing::domain::{
    BillingPeriod, Currency, DeviceId, DeviceRecord, LocationId, MeterReading, NewMeterReading,
};
use meter_billing::error::{BillingError, Result};
use meter_billing::rates::{ExchangeRateSet, RateCache, RateCacheConfig, RateSource};
use meter_billing::storage::{
    self, DeviceRepository, ReadingRepository, SqlDeviceRepository, SqlInvoiceRepository,
    SqlReadingRepository,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::NamedTempFile;

pub const LOCATION: &str = "LOC-1";

/// Rate source returning a fixed set
pub struct StaticRates(pub HashMap<Currency, Decimal>);

#[async_trait]
impl RateSource for StaticRates {
    async fn fetch(&self, _currencies: &[Currency]) -> Result<HashMap<Currency, Decimal>> {
        Ok(self.0.clone())
    }
}

/// Rate source that is always down
pub struct UnreachableRates;

#[async_trait]
impl RateSource for UnreachableRates {
    async fn fetch(&self, _currencies: &[Currency]) -> Result<HashMap<Currency, Decimal>> {
        Err(BillingError::RateSource {
            message: "connection refused".to_string(),
        })
    }
}

pub fn live_rates() -> StaticRates {
    StaticRates(HashMap::from([
        (Currency::Usd, dec!(32.50)),
        (Currency::Eur, dec!(35)),
    ]))
}

pub fn fallback_rates() -> ExchangeRateSet {
    ExchangeRateSet::new(HashMap::from([
        (Currency::Usd, dec!(30)),
        (Currency::Eur, dec!(33)),
    ]))
    .expect("valid fallback rates")
}

/// Billing database on a temp file; the file lives as long as the harness
pub struct TestHarness {
    _file: NamedTempFile,
    pub pool: SqlitePool,
    pub devices: Arc<SqlDeviceRepository>,
    pub readings: Arc<SqlReadingRepository>,
    pub invoices: Arc<SqlInvoiceRepository>,
}

impl TestHarness {
    pub async fn new() -> Self {
        let file = NamedTempFile::new().expect("Failed to create temp database file");
        let config = DatabaseConfig {
            url: format!("sqlite:{}", file.path().display()),
            ..DatabaseConfig::default()
        };
        let pool = storage::connect(&config)
            .await
            .expect("Failed to open test database");

        Self {
            _file: file,
            devices: Arc::new(SqlDeviceRepository::new(pool.clone())),
            readings: Arc::new(SqlReadingRepository::new(pool.clone())),
            invoices: Arc::new(SqlInvoiceRepository::new(pool.clone())),
            pool,
        }
    }

    pub fn processor(&self, source: impl RateSource + 'static) -> BillingRunProcessor {
        let cache = RateCache::new(Arc::new(source), RateCacheConfig::default(), fallback_rates());
        BillingRunProcessor::new(
            self.devices.clone(),
            self.readings.clone(),
            self.invoices.clone(),
            Arc::new(cache),
        )
    }

    pub async fn add_device(&self, device: DeviceRecord) {
        self.devices
            .upsert_device(&device)
            .await
            .expect("Failed to store device");
    }

    pub async fn add_reading(&self, device: &str, at: DateTime<Utc>, bw: u64, color: u64) -> MeterReading {
        self.readings
            .record_reading(&NewMeterReading {
                device_id: DeviceId::new(device),
                recorded_at: at,
                bw_counter: bw,
                color_counter: color,
            })
            .await
            .expect("Failed to store reading")
    }

    pub async fn is_billed(&self, reading: &MeterReading) -> bool {
        self.readings
            .get_reading(reading.id)
            .await
            .expect("Failed to load reading")
            .expect("reading exists")
            .billed
    }
}

pub fn device(id: &str, bw_price: &str, bw_currency: &str) -> DeviceRecord {
    DeviceRecord {
        device_id: DeviceId::new(id),
        location_id: LocationId::new(LOCATION),
        supports_color: false,
        bw_unit_price: bw_price.to_string(),
        bw_currency: bw_currency.to_string(),
        color_unit_price: String::new(),
        color_currency: String::new(),
        rental_fee: String::new(),
        rental_currency: String::new(),
    }
}

pub fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 10, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub fn period(from: (i32, u32, u32), to: (i32, u32, u32)) -> BillingPeriod {
    BillingPeriod::new(
        NaiveDate::from_ymd_opt(from.0, from.1, from.2).expect("valid start"),
        NaiveDate::from_ymd_opt(to.0, to.1, to.2).expect("valid end"),
    )
    .expect("valid period")
}

pub fn january() -> BillingPeriod {
    period((2024, 1, 1), (2024, 1, 31))
}

pub fn request(period: BillingPeriod) -> BillingRequest {
    BillingRequest {
        location_id: LocationId::new(LOCATION),
        period,
        force_refresh_rates: false,
        dry_run: false,
    }
}
