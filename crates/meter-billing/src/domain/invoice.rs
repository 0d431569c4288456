use crate::domain::currency::Currency;
use crate::domain::types::{
    round_money, BillingPeriod, DeviceId, InvoiceId, LocationId, ReadingId,
};
use crate::rates::RateProvenance;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineItemKind {
    BlackWhite,
    Color,
    Rental,
}

impl fmt::Display for LineItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineItemKind::BlackWhite => write!(f, "b/w prints"),
            LineItemKind::Color => write!(f, "color prints"),
            LineItemKind::Rental => write!(f, "rental"),
        }
    }
}

/// One priced charge; totals are exact, only display prices are rounded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingLineItem {
    pub device_id: DeviceId,
    pub kind: LineItemKind,
    pub description: String,
    pub quantity: Decimal,
    pub currency: Currency,
    pub unit_price: Decimal,
    /// Unit price in base currency, rounded to 4 dp
    pub unit_price_base: Decimal,
    pub rate: Decimal,
    pub total: Decimal,
    pub total_base: Decimal,
    /// Readings whose usage this line prices. Within one invoice the b/w and
    /// color lines of a device carry the same ids; rental lines carry none.
    pub source_reading_ids: Vec<ReadingId>,
}

impl BillingLineItem {
    pub fn is_rental(&self) -> bool {
        self.kind == LineItemKind::Rental
    }
}

/// Aggregated invoice ready to be persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceDraft {
    pub location_id: LocationId,
    pub period: BillingPeriod,
    pub line_items: Vec<BillingLineItem>,
    pub total_base: Decimal,
    pub rate_provenance: RateProvenance,
}

impl InvoiceDraft {
    /// Readings consumed by usage line items, deduplicated and sorted
    pub fn consumed_reading_ids(&self) -> Vec<ReadingId> {
        self.line_items
            .iter()
            .filter(|item| !item.is_rental())
            .flat_map(|item| item.source_reading_ids.iter().copied())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Devices whose rental this draft charges
    pub fn rental_device_ids(&self) -> Vec<DeviceId> {
        self.line_items
            .iter()
            .filter(|item| item.is_rental())
            .map(|item| item.device_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Persisted invoice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub location_id: LocationId,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub total_base: Decimal,
    pub line_items: Vec<BillingLineItem>,
    pub rate_provenance: RateProvenance,
    pub created_at: DateTime<Utc>,
}

/// Flattened, human-readable line for document rendering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionLine {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub total: Decimal,
    pub currency: Currency,
    pub original_currency: Currency,
    pub original_unit_price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceProjection {
    pub location_id: LocationId,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub lines: Vec<ProjectionLine>,
    pub total: Decimal,
    pub currency: Currency,
}

pub fn project(
    location_id: &LocationId,
    period_start: NaiveDate,
    period_end: NaiveDate,
    line_items: &[BillingLineItem],
    total_base: Decimal,
) -> InvoiceProjection {
    let lines = line_items
        .iter()
        .map(|item| ProjectionLine {
            description: item.description.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price_base,
            total: round_money(item.total_base),
            currency: Currency::BASE,
            original_currency: item.currency,
            original_unit_price: item.unit_price,
        })
        .collect();

    InvoiceProjection {
        location_id: location_id.clone(),
        period_start,
        period_end,
        lines,
        total: round_money(total_base),
        currency: Currency::BASE,
    }
}

impl InvoiceDraft {
    pub fn projection(&self) -> InvoiceProjection {
        project(
            &self.location_id,
            self.period.start(),
            self.period.end(),
            &self.line_items,
            self.total_base,
        )
    }
}

impl Invoice {
    pub fn projection(&self) -> InvoiceProjection {
        project(
            &self.location_id,
            self.period_start,
            self.period_end,
            &self.line_items,
            self.total_base,
        )
    }
}
