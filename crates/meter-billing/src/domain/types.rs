use crate::error::{BillingError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Decimal places kept on invoice totals and proration outputs
pub const MONEY_SCALE: u32 = 2;
/// Decimal places kept on converted unit prices
pub const UNIT_PRICE_SCALE: u32 = 4;

pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp(MONEY_SCALE)
}

pub fn round_unit_price(price: Decimal) -> Decimal {
    price.round_dp(UNIT_PRICE_SCALE)
}

/// Physical device identifier (serial or asset tag)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Customer location that groups devices on one invoice
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationId(String);

impl LocationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Meter reading identifier; assigned in insertion order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReadingId(i64);

impl ReadingId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for ReadingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceId(Uuid);

impl InvoiceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for InvoiceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InvoiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for InvoiceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Inclusive date window of a billing run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingPeriod {
    start: NaiveDate,
    end: NaiveDate,
}

impl BillingPeriod {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if end < start {
            return Err(BillingError::InvalidPeriod {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Number of calendar days covered, both ends included
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// First instant of the window
    pub fn starts_at(&self) -> DateTime<Utc> {
        self.start.and_time(chrono::NaiveTime::MIN).and_utc()
    }

    /// First instant after the window
    pub fn ends_before(&self) -> DateTime<Utc> {
        self.end
            .and_time(chrono::NaiveTime::MIN)
            .and_utc()
            + chrono::Duration::days(1)
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.starts_at() && instant < self.ends_before()
    }
}

impl fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_billing_period_days_are_inclusive() {
        let period = BillingPeriod::new(date(2024, 1, 1), date(2024, 1, 31)).unwrap();
        assert_eq!(period.days(), 31);

        let single_day = BillingPeriod::new(date(2024, 3, 5), date(2024, 3, 5)).unwrap();
        assert_eq!(single_day.days(), 1);
    }

    #[test]
    fn test_billing_period_rejects_reversed_dates() {
        let result = BillingPeriod::new(date(2024, 2, 1), date(2024, 1, 31));
        assert!(matches!(result, Err(BillingError::InvalidPeriod { .. })));
    }

    #[test]
    fn test_billing_period_contains_whole_last_day() {
        let period = BillingPeriod::new(date(2024, 1, 1), date(2024, 1, 31)).unwrap();
        let last_minute = Utc.with_ymd_and_hms(2024, 1, 31, 23, 59, 59).unwrap();
        let next_day = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let before = Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap();

        assert!(period.contains(period.starts_at()));
        assert!(period.contains(last_minute));
        assert!(!period.contains(next_day));
        assert!(!period.contains(before));
    }

    #[test]
    fn test_rounding_helpers() {
        assert_eq!(round_money(dec!(103.3333)), dec!(103.33));
        assert_eq!(round_unit_price(dec!(1.725026)), dec!(1.7250));
    }
}
