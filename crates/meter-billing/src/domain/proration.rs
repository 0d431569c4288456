use crate::domain::types::{round_money, BillingPeriod};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

/// Window lengths billed as one whole month regardless of calendar month length
pub const FULL_MONTH_DAYS: RangeInclusive<i64> = 28..=31;
/// Day count of the nominal month used for linear proration
pub const PRORATION_MONTH_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proration {
    pub days: i64,
    /// Months billed, rounded to 2 dp
    pub quantity: Decimal,
    /// Amount billed, rounded to 2 dp
    pub amount: Decimal,
}

impl Proration {
    pub fn is_full_month(&self) -> bool {
        FULL_MONTH_DAYS.contains(&self.days)
    }
}

/// Rental charge for `period`; `None` when there is no recurring fee.
///
/// Quantity and amount are rounded independently, so for short windows
/// `quantity * fee` may differ from `amount` by a few cents.
pub fn prorate(rental_fee: Decimal, period: &BillingPeriod) -> Option<Proration> {
    if rental_fee.is_zero() {
        return None;
    }

    let days = period.days();
    if FULL_MONTH_DAYS.contains(&days) {
        return Some(Proration {
            days,
            quantity: Decimal::ONE,
            amount: round_money(rental_fee),
        });
    }

    let days_dec = Decimal::from(days);
    let month = Decimal::from(PRORATION_MONTH_DAYS);

    Some(Proration {
        days,
        quantity: round_money(days_dec / month),
        amount: round_money(rental_fee * days_dec / month),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use rust_decimal_macros::dec;

    fn window(days: i64) -> BillingPeriod {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        BillingPeriod::new(start, start + Duration::days(days - 1)).unwrap()
    }

    #[test]
    fn test_full_month_boundaries() {
        for days in [28, 29, 30, 31] {
            let proration = prorate(dec!(100), &window(days)).unwrap();
            assert_eq!(proration.quantity, dec!(1), "days = {}", days);
            assert_eq!(proration.amount, dec!(100), "days = {}", days);
            assert!(proration.is_full_month());
        }
    }

    #[test]
    fn test_switches_to_proration_below_28_days() {
        let proration = prorate(dec!(100), &window(27)).unwrap();
        assert_eq!(proration.quantity, dec!(0.90));
        assert_eq!(proration.amount, dec!(90.00));
        assert!(!proration.is_full_month());
    }

    #[test]
    fn test_switches_to_proration_above_31_days() {
        let proration = prorate(dec!(100), &window(32)).unwrap();
        assert_eq!(proration.days, 32);
        assert_eq!(proration.quantity, dec!(1.07));
        assert_eq!(proration.amount, dec!(106.67));
    }

    #[test]
    fn test_single_day_window() {
        let proration = prorate(dec!(100), &window(1)).unwrap();
        assert_eq!(proration.quantity, dec!(0.03));
        assert_eq!(proration.amount, dec!(3.33));
    }

    #[test]
    fn test_zero_fee_produces_nothing() {
        assert!(prorate(Decimal::ZERO, &window(15)).is_none());
        assert!(prorate(dec!(0.00), &window(30)).is_none());
    }

    #[test]
    fn test_full_month_rounds_converted_fee() {
        let proration = prorate(dec!(3512.3456), &window(30)).unwrap();
        assert_eq!(proration.amount, dec!(3512.35));
    }
}
