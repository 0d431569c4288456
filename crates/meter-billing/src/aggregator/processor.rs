use crate::aggregator::billing::BillingAggregator;
use crate::domain::deltas::{compute_deltas, CounterAnomaly};
use crate::domain::devices::CurrencyDefault;
use crate::domain::invoice::{BillingLineItem, InvoiceDraft, InvoiceProjection};
use crate::domain::types::{BillingPeriod, DeviceId, InvoiceId, LocationId};
use crate::error::{BillingError, Result};
use crate::rates::{ExchangeRateSet, RateCache, RateProvenance};
use crate::storage::{DeviceRepository, InvoiceRepository, ReadingRepository};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone)]
pub struct BillingRequest {
    pub location_id: LocationId,
    pub period: BillingPeriod,
    pub force_refresh_rates: bool,
    /// Aggregate and report without persisting an invoice
    pub dry_run: bool,
}

/// Outcome of one billing run, including every degraded or anomalous condition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingRunReport {
    pub location_id: LocationId,
    pub period: BillingPeriod,
    /// `None` on dry runs
    pub invoice_id: Option<InvoiceId>,
    pub total: Decimal,
    pub line_items: Vec<BillingLineItem>,
    pub anomalies: Vec<CounterAnomaly>,
    pub currency_defaults: Vec<CurrencyDefault>,
    pub rate_provenance: RateProvenance,
    pub rates: ExchangeRateSet,
    pub projection: InvoiceProjection,
}

/// Runs a full billing pass for one location and period
pub struct BillingRunProcessor {
    devices: Arc<dyn DeviceRepository>,
    readings: Arc<dyn ReadingRepository>,
    invoices: Arc<dyn InvoiceRepository>,
    rates: Arc<RateCache>,
}

impl BillingRunProcessor {
    pub fn new(
        devices: Arc<dyn DeviceRepository>,
        readings: Arc<dyn ReadingRepository>,
        invoices: Arc<dyn InvoiceRepository>,
        rates: Arc<RateCache>,
    ) -> Self {
        Self {
            devices,
            readings,
            invoices,
            rates,
        }
    }

    #[instrument(
        skip(self, request),
        fields(location_id = %request.location_id, period = %request.period)
    )]
    pub async fn run(&self, request: BillingRequest) -> Result<BillingRunReport> {
        info!(dry_run = request.dry_run, "Starting billing run");

        let snapshot = self.rates.get_rates(request.force_refresh_rates).await;
        if snapshot.provenance.is_degraded() {
            warn!(
                provenance = %snapshot.provenance,
                "Billing with degraded exchange rates, review before sending the invoice"
            );
        }

        let devices = self.devices.devices_for_location(&request.location_id).await?;
        let color_support: HashMap<DeviceId, bool> = devices
            .iter()
            .map(|device| (device.device_id.clone(), device.supports_color))
            .collect();

        // Queried fresh on every run so the billed flags reflect the latest committed state
        let window = self
            .readings
            .window_readings(&request.location_id, &request.period)
            .await?;

        let mut baseline = Vec::new();
        for device in &devices {
            if let Some(previous) = self
                .readings
                .latest_before(&device.device_id, request.period.starts_at())
                .await?
            {
                baseline.push(previous);
            }
        }

        let report = compute_deltas(&baseline, &window, &color_support);
        if !report.anomalies.is_empty() {
            warn!(
                "{} counter anomalies excluded from billable usage",
                report.anomalies.len()
            );
        }

        let billed_rentals = self
            .invoices
            .rentals_billed(&request.location_id, &request.period)
            .await?;

        let aggregation = BillingAggregator::aggregate(
            &report.deltas,
            &devices,
            &snapshot.rates,
            &request.period,
            &billed_rentals,
        )?;

        if aggregation.is_empty() {
            info!("No billable usage or rental for this period");
            return Err(BillingError::NothingToBill {
                location_id: request.location_id.to_string(),
            });
        }

        let draft = InvoiceDraft {
            location_id: request.location_id.clone(),
            period: request.period,
            line_items: aggregation.line_items,
            total_base: aggregation.grand_total,
            rate_provenance: snapshot.provenance,
        };

        let invoice_id = if request.dry_run {
            info!(
                "Dry run: {} line items totalling {} not persisted",
                draft.line_items.len(),
                draft.total_base
            );
            None
        } else {
            Some(self.invoices.materialize(&draft).await?)
        };

        let projection = draft.projection();

        info!(
            invoice_id = ?invoice_id,
            total = %draft.total_base,
            provenance = %snapshot.provenance,
            "Billing run finished"
        );

        Ok(BillingRunReport {
            location_id: draft.location_id,
            period: draft.period,
            invoice_id,
            total: draft.total_base,
            line_items: draft.line_items,
            anomalies: report.anomalies,
            currency_defaults: aggregation.currency_defaults,
            rate_provenance: draft.rate_provenance,
            rates: snapshot.rates.as_ref().clone(),
            projection,
        })
    }
}
