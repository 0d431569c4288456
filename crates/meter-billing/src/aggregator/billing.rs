use crate::domain::deltas::ReadingDelta;
use crate::domain::devices::{CurrencyDefault, DevicePricing, DeviceRecord, Price};
use crate::domain::invoice::{BillingLineItem, LineItemKind};
use crate::domain::proration::prorate;
use crate::domain::types::{round_money, round_unit_price, BillingPeriod, DeviceId, ReadingId};
use crate::error::{BillingError, Result};
use crate::rates::ExchangeRateSet;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Priced line items for one (location, period) billing run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregation {
    pub line_items: Vec<BillingLineItem>,
    /// Sum of every line's base total, rounded to 2 dp
    pub grand_total: Decimal,
    pub currency_defaults: Vec<CurrencyDefault>,
}

impl Aggregation {
    pub fn is_empty(&self) -> bool {
        self.line_items.is_empty()
    }
}

#[derive(Default)]
struct DeviceUsage {
    bw: u64,
    color: u64,
    reading_ids: Vec<ReadingId>,
}

/// Turns usage deltas and device price sheets into base-currency line items.
///
/// Amounts are multiplied in exact decimal arithmetic; only the converted
/// unit price, proration outputs and the grand total are rounded. Devices in
/// `billed_rentals` already had their rental charged for the period and get
/// no rental line.
pub struct BillingAggregator;

impl BillingAggregator {
    pub fn aggregate(
        deltas: &[ReadingDelta],
        devices: &[DeviceRecord],
        rates: &ExchangeRateSet,
        period: &BillingPeriod,
        billed_rentals: &HashSet<DeviceId>,
    ) -> Result<Aggregation> {
        // Price sheets are validated up front so a bad device fails the run before any item exists
        let mut pricing: BTreeMap<DeviceId, DevicePricing> = BTreeMap::new();
        for device in devices {
            let parsed = device.pricing()?;
            pricing.insert(parsed.device_id.clone(), parsed);
        }

        let mut usage: BTreeMap<&DeviceId, DeviceUsage> = BTreeMap::new();
        for delta in deltas {
            if !pricing.contains_key(&delta.device_id) {
                return Err(BillingError::MissingDevice {
                    device_id: delta.device_id.to_string(),
                });
            }
            let entry = usage.entry(&delta.device_id).or_default();
            entry.bw = add_usage(entry.bw, delta, "bw_usage", delta.bw_usage)?;
            entry.color = add_usage(entry.color, delta, "color_usage", delta.color_usage)?;
            entry.reading_ids.push(delta.reading_id);
        }

        let mut line_items = Vec::new();
        let mut currency_defaults = Vec::new();

        for (device_id, device) in &pricing {
            currency_defaults.extend(device.currency_defaults.iter().cloned());

            if let Some(device_usage) = usage.get(device_id) {
                let mut reading_ids = device_usage.reading_ids.clone();
                reading_ids.sort();
                reading_ids.dedup();

                if device_usage.bw > 0 {
                    line_items.push(usage_item(
                        device_id,
                        LineItemKind::BlackWhite,
                        device_usage.bw,
                        device.bw,
                        rates,
                        &reading_ids,
                    ));
                }
                if device.supports_color && device_usage.color > 0 {
                    line_items.push(usage_item(
                        device_id,
                        LineItemKind::Color,
                        device_usage.color,
                        device.color,
                        rates,
                        &reading_ids,
                    ));
                }
            }

            if billed_rentals.contains(device_id) {
                debug!(device_id = %device_id, "Rental already charged for {}", period);
                continue;
            }
            if let Some(item) = rental_item(device_id, device.rental, rates, period) {
                line_items.push(item);
            }
        }

        let grand_total = round_money(line_items.iter().map(|item| item.total_base).sum());

        debug!(
            period = %period,
            "Aggregated {} deltas over {} devices into {} line items, total {}",
            deltas.len(),
            pricing.len(),
            line_items.len(),
            grand_total
        );

        Ok(Aggregation {
            line_items,
            grand_total,
            currency_defaults,
        })
    }
}

fn add_usage(total: u64, delta: &ReadingDelta, field: &str, usage: u64) -> Result<u64> {
    total
        .checked_add(usage)
        .ok_or_else(|| BillingError::DataIntegrity {
            device_id: delta.device_id.to_string(),
            field: field.to_string(),
            value: format!("{} + {}", total, usage),
        })
}

fn usage_item(
    device_id: &DeviceId,
    kind: LineItemKind,
    quantity: u64,
    price: Price,
    rates: &ExchangeRateSet,
    reading_ids: &[ReadingId],
) -> BillingLineItem {
    let quantity = Decimal::from(quantity);
    let rate = rates.rate(price.currency);
    let total = quantity * price.amount;

    BillingLineItem {
        device_id: device_id.clone(),
        kind,
        description: format!("Device {} {}", device_id, kind),
        quantity,
        currency: price.currency,
        unit_price: price.amount,
        unit_price_base: round_unit_price(price.amount * rate),
        rate,
        total,
        total_base: total * rate,
        source_reading_ids: reading_ids.to_vec(),
    }
}

fn rental_item(
    device_id: &DeviceId,
    fee: Price,
    rates: &ExchangeRateSet,
    period: &BillingPeriod,
) -> Option<BillingLineItem> {
    let original = prorate(fee.amount, period)?;
    let rate = rates.rate(fee.currency);
    let base = prorate(fee.amount * rate, period)?;

    let description = if original.is_full_month() {
        format!("Device {} rental", device_id)
    } else {
        format!("Device {} rental ({} days)", device_id, original.days)
    };

    Some(BillingLineItem {
        device_id: device_id.clone(),
        kind: LineItemKind::Rental,
        description,
        quantity: original.quantity,
        currency: fee.currency,
        unit_price: fee.amount,
        unit_price_base: round_unit_price(fee.amount * rate),
        rate,
        total: original.amount,
        total_base: base.amount,
        source_reading_ids: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::currency::Currency;
    use crate::domain::devices::fixtures::mono_device;
    use chrono::{NaiveDate, TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn rates() -> ExchangeRateSet {
        ExchangeRateSet::new(HashMap::from([
            (Currency::Usd, dec!(32.50)),
            (Currency::Eur, dec!(35)),
        ]))
        .unwrap()
    }

    fn january() -> BillingPeriod {
        BillingPeriod::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        )
        .unwrap()
    }

    fn aggregate(
        deltas: &[ReadingDelta],
        devices: &[DeviceRecord],
        period: &BillingPeriod,
    ) -> Result<Aggregation> {
        BillingAggregator::aggregate(deltas, devices, &rates(), period, &HashSet::new())
    }

    fn delta(id: i64, device: &str, bw: u64, color: u64) -> ReadingDelta {
        ReadingDelta {
            reading_id: ReadingId::new(id),
            device_id: DeviceId::new(device),
            recorded_at: Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap(),
            bw_usage: bw,
            color_usage: color,
        }
    }

    fn color_device(id: &str) -> DeviceRecord {
        DeviceRecord {
            supports_color: true,
            color_unit_price: "0.25".to_string(),
            color_currency: "TL".to_string(),
            ..mono_device(id, "0.10", "TL")
        }
    }

    #[test]
    fn test_single_eur_device_scenario() {
        let devices = vec![mono_device("D1", "0.05", "EUR")];
        let deltas = vec![delta(2, "D1", 100, 0), delta(3, "D1", 1500, 0)];

        let aggregation = aggregate(&deltas, &devices, &january()).unwrap();

        assert_eq!(aggregation.line_items.len(), 1);
        let item = &aggregation.line_items[0];
        assert_eq!(item.kind, LineItemKind::BlackWhite);
        assert_eq!(item.quantity, dec!(1600));
        assert_eq!(item.currency, Currency::Eur);
        assert_eq!(item.total, dec!(80.00));
        assert_eq!(item.unit_price_base, dec!(1.7500));
        assert_eq!(item.source_reading_ids, vec![ReadingId::new(2), ReadingId::new(3)]);
        assert_eq!(aggregation.grand_total, dec!(2800.00));
    }

    #[test]
    fn test_color_line_only_for_color_devices() {
        let devices = vec![color_device("C1"), mono_device("M1", "0.10", "TL")];
        let deltas = vec![delta(1, "C1", 100, 40), delta(2, "M1", 50, 99)];

        let aggregation = aggregate(&deltas, &devices, &january()).unwrap();

        let kinds: Vec<_> = aggregation
            .line_items
            .iter()
            .map(|item| (item.device_id.as_str().to_string(), item.kind))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("C1".to_string(), LineItemKind::BlackWhite),
                ("C1".to_string(), LineItemKind::Color),
                ("M1".to_string(), LineItemKind::BlackWhite),
            ]
        );
        // 100 * 0.10 + 40 * 0.25 + 50 * 0.10
        assert_eq!(aggregation.grand_total, dec!(25.00));
        // Both usage lines of C1 price the same reading
        assert_eq!(aggregation.line_items[0].source_reading_ids, vec![ReadingId::new(1)]);
        assert_eq!(
            aggregation.line_items[1].source_reading_ids,
            aggregation.line_items[0].source_reading_ids
        );
    }

    #[test]
    fn test_zero_usage_produces_no_usage_item() {
        let devices = vec![mono_device("D1", "0.05", "EUR")];
        let deltas = vec![delta(1, "D1", 0, 0)];

        let aggregation = aggregate(&deltas, &devices, &january()).unwrap();
        assert!(aggregation.is_empty());
        assert_eq!(aggregation.grand_total, Decimal::ZERO);
    }

    #[test]
    fn test_rental_billed_without_usage() {
        let devices = vec![DeviceRecord {
            rental_fee: "100".to_string(),
            rental_currency: "USD".to_string(),
            ..mono_device("R1", "0.05", "TL")
        }];

        let aggregation = aggregate(&[], &devices, &january()).unwrap();

        assert_eq!(aggregation.line_items.len(), 1);
        let item = &aggregation.line_items[0];
        assert!(item.is_rental());
        assert!(item.source_reading_ids.is_empty());
        assert_eq!(item.quantity, Decimal::ONE);
        assert_eq!(item.total, dec!(100.00));
        assert_eq!(item.total_base, dec!(3250.00));
        assert_eq!(aggregation.grand_total, dec!(3250.00));
    }

    #[test]
    fn test_already_charged_rental_is_skipped() {
        let devices = vec![
            DeviceRecord {
                rental_fee: "1000".to_string(),
                rental_currency: "TL".to_string(),
                ..mono_device("R1", "0.05", "TL")
            },
            DeviceRecord {
                rental_fee: "500".to_string(),
                rental_currency: "TL".to_string(),
                ..mono_device("R2", "0.05", "TL")
            },
        ];
        let deltas = vec![delta(7, "R1", 100, 0)];
        let billed = HashSet::from([DeviceId::new("R1")]);

        let aggregation =
            BillingAggregator::aggregate(&deltas, &devices, &rates(), &january(), &billed)
                .unwrap();

        let lines: Vec<_> = aggregation
            .line_items
            .iter()
            .map(|item| (item.device_id.as_str().to_string(), item.kind))
            .collect();
        assert_eq!(
            lines,
            vec![
                ("R1".to_string(), LineItemKind::BlackWhite),
                ("R2".to_string(), LineItemKind::Rental),
            ]
        );
        // 100 * 0.05 + 500
        assert_eq!(aggregation.grand_total, dec!(505.00));
    }

    #[test]
    fn test_usage_sum_overflow_is_a_data_error() {
        let devices = vec![mono_device("D1", "0.05", "TL")];
        let deltas = vec![
            delta(1, "D1", u64::MAX - 10, 0),
            delta(2, "D1", 11, 0),
        ];

        let err = aggregate(&deltas, &devices, &january()).unwrap_err();
        match err {
            BillingError::DataIntegrity {
                device_id, field, ..
            } => {
                assert_eq!(device_id, "D1");
                assert_eq!(field, "bw_usage");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_short_window_rental_is_prorated() {
        let devices = vec![DeviceRecord {
            rental_fee: "100".to_string(),
            rental_currency: "TL".to_string(),
            ..mono_device("R1", "0.05", "TL")
        }];
        let period = BillingPeriod::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
        )
        .unwrap();

        let aggregation = aggregate(&[], &devices, &period).unwrap();

        let item = &aggregation.line_items[0];
        assert_eq!(item.quantity, dec!(0.50));
        assert_eq!(item.total_base, dec!(50.00));
        assert_eq!(item.description, "Device R1 rental (15 days)");
    }

    #[test]
    fn test_unparsable_price_fails_whole_run() {
        let devices = vec![
            mono_device("D1", "0.05", "EUR"),
            mono_device("D2", "five cents", "EUR"),
        ];
        let deltas = vec![delta(1, "D1", 10, 0)];

        let err = aggregate(&deltas, &devices, &january()).unwrap_err();
        match err {
            BillingError::DataIntegrity {
                device_id, field, ..
            } => {
                assert_eq!(device_id, "D2");
                assert_eq!(field, "bw_unit_price");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_delta_for_unknown_device_is_rejected() {
        let devices = vec![mono_device("D1", "0.05", "EUR")];
        let deltas = vec![delta(1, "GHOST", 10, 0)];

        let err = aggregate(&deltas, &devices, &january()).unwrap_err();
        assert!(matches!(err, BillingError::MissingDevice { ref device_id } if device_id == "GHOST"));
    }

    #[test]
    fn test_unknown_currency_token_is_reported() {
        let devices = vec![mono_device("D1", "0.05", "peso")];
        let deltas = vec![delta(1, "D1", 10, 0)];

        let aggregation = aggregate(&deltas, &devices, &january()).unwrap();

        assert_eq!(aggregation.line_items[0].currency, Currency::Try);
        assert_eq!(aggregation.currency_defaults.len(), 1);
        assert_eq!(aggregation.currency_defaults[0].token, "peso");
    }

    #[test]
    fn test_many_small_items_do_not_drift() {
        let devices: Vec<_> = (0..1000)
            .map(|i| mono_device(&format!("D{i:04}"), "0.0333", "USD"))
            .collect();
        let deltas: Vec<_> = (0..1000)
            .map(|i| delta(i, &format!("D{i:04}"), 1, 0))
            .collect();

        let aggregation = aggregate(&deltas, &devices, &january()).unwrap();

        // 1000 * 0.0333 * 32.50 exactly
        assert_eq!(aggregation.grand_total, dec!(1082.25));
    }
}
