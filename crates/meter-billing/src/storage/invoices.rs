//! Invoice persistence and the at-most-once billing guard.
//!
//! This is the only module that writes `meter_readings.billed` and
//! `invoice_rentals`.

use crate::domain::invoice::{BillingLineItem, Invoice, InvoiceDraft};
use crate::domain::types::{BillingPeriod, DeviceId, InvoiceId, LocationId, ReadingId};
use crate::error::{BillingError, Result};
use crate::rates::RateProvenance;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use std::collections::HashSet;
use std::str::FromStr;
use tracing::{info, warn};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InvoiceRepository: Send + Sync {
    /// Persists the invoice and marks its readings billed in one transaction
    async fn materialize(&self, draft: &InvoiceDraft) -> Result<InvoiceId>;

    async fn get_invoice(&self, id: &InvoiceId) -> Result<Option<Invoice>>;

    async fn invoices_for_location(&self, location_id: &LocationId) -> Result<Vec<Invoice>>;

    /// Invoice that consumed a reading, if any
    async fn invoice_for_reading(&self, reading_id: ReadingId) -> Result<Option<InvoiceId>>;

    /// Devices of the location whose rental is already charged for exactly this period
    async fn rentals_billed(
        &self,
        location_id: &LocationId,
        period: &BillingPeriod,
    ) -> Result<HashSet<DeviceId>>;
}

/// Invoice header fields written by [`create_invoice`]
pub struct NewInvoice<'a> {
    pub id: InvoiceId,
    pub location_id: &'a LocationId,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub total_base: Decimal,
    pub serialized_line_items: &'a str,
    pub rate_provenance: RateProvenance,
    pub created_at: DateTime<Utc>,
}

/// Inserts the invoice row. Must run inside the caller's transaction.
pub async fn create_invoice(conn: &mut SqliteConnection, invoice: &NewInvoice<'_>) -> Result<()> {
    let provenance = serde_json::to_string(&invoice.rate_provenance)?;

    sqlx::query(
        r#"
        INSERT INTO invoices
            (invoice_id, location_id, period_start, period_end, total_base,
             line_items, rate_provenance, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(invoice.id.to_string())
    .bind(invoice.location_id.as_str())
    .bind(invoice.period_start)
    .bind(invoice.period_end)
    .bind(invoice.total_base.to_string())
    .bind(invoice.serialized_line_items)
    .bind(provenance)
    .bind(invoice.created_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| BillingError::database("create_invoice", e))?;

    Ok(())
}

/// Flips `billed` on every reading and links it to the invoice. Fails with
/// [`BillingError::ReadingAlreadyBilled`] if any reading was already billed
/// or does not exist. Must run inside the caller's transaction.
pub async fn mark_readings_billed(
    conn: &mut SqliteConnection,
    invoice_id: &InvoiceId,
    reading_ids: &[ReadingId],
) -> Result<()> {
    for reading_id in reading_ids {
        let result = sqlx::query("UPDATE meter_readings SET billed = 1 WHERE id = ? AND billed = 0")
            .bind(reading_id.as_i64())
            .execute(&mut *conn)
            .await
            .map_err(|e| BillingError::database("mark_reading_billed", e))?;

        if result.rows_affected() != 1 {
            return Err(BillingError::ReadingAlreadyBilled {
                reading_id: reading_id.as_i64(),
            });
        }

        sqlx::query("INSERT INTO invoice_readings (invoice_id, reading_id) VALUES (?, ?)")
            .bind(invoice_id.to_string())
            .bind(reading_id.as_i64())
            .execute(&mut *conn)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                    BillingError::ReadingAlreadyBilled {
                        reading_id: reading_id.as_i64(),
                    }
                }
                other => BillingError::database("link_invoice_reading", other),
            })?;
    }

    Ok(())
}

/// Claims the rental of each device for the period. Fails with
/// [`BillingError::RentalAlreadyBilled`] if another invoice already holds it.
/// Must run inside the caller's transaction.
pub async fn record_rentals(
    conn: &mut SqliteConnection,
    invoice_id: &InvoiceId,
    period: &BillingPeriod,
    device_ids: &[DeviceId],
) -> Result<()> {
    for device_id in device_ids {
        sqlx::query(
            r#"
            INSERT INTO invoice_rentals (invoice_id, device_id, period_start, period_end)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(invoice_id.to_string())
        .bind(device_id.as_str())
        .bind(period.start())
        .bind(period.end())
        .execute(&mut *conn)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                BillingError::RentalAlreadyBilled {
                    device_id: device_id.to_string(),
                    period: period.to_string(),
                }
            }
            other => BillingError::database("record_rental", other),
        })?;
    }

    Ok(())
}

#[derive(Debug, FromRow)]
struct InvoiceRow {
    invoice_id: String,
    location_id: String,
    period_start: NaiveDate,
    period_end: NaiveDate,
    total_base: String,
    line_items: String,
    rate_provenance: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<InvoiceRow> for Invoice {
    type Error = BillingError;

    fn try_from(row: InvoiceRow) -> Result<Self> {
        let id = InvoiceId::from_str(&row.invoice_id).map_err(|e| BillingError::ValidationError {
            field: "invoice_id".to_string(),
            message: e.to_string(),
        })?;
        let total_base =
            Decimal::from_str(&row.total_base).map_err(|e| BillingError::ValidationError {
                field: "total_base".to_string(),
                message: e.to_string(),
            })?;
        let line_items: Vec<BillingLineItem> = serde_json::from_str(&row.line_items)?;
        let rate_provenance: RateProvenance = serde_json::from_str(&row.rate_provenance)?;

        Ok(Invoice {
            id,
            location_id: LocationId::new(row.location_id),
            period_start: row.period_start,
            period_end: row.period_end,
            total_base,
            line_items,
            rate_provenance,
            created_at: row.created_at,
        })
    }
}

pub struct SqlInvoiceRepository {
    pool: SqlitePool,
}

impl SqlInvoiceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InvoiceRepository for SqlInvoiceRepository {
    async fn materialize(&self, draft: &InvoiceDraft) -> Result<InvoiceId> {
        let invoice_id = InvoiceId::new();
        let serialized = serde_json::to_string(&draft.line_items)?;
        let reading_ids = draft.consumed_reading_ids();
        let rental_devices = draft.rental_device_ids();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| BillingError::database("begin_materialize", e))?;

        create_invoice(
            &mut tx,
            &NewInvoice {
                id: invoice_id,
                location_id: &draft.location_id,
                period_start: draft.period.start(),
                period_end: draft.period.end(),
                total_base: draft.total_base,
                serialized_line_items: &serialized,
                rate_provenance: draft.rate_provenance,
                created_at: Utc::now(),
            },
        )
        .await?;

        // Dropping the transaction on error rolls back the invoice row and any flipped flags
        let claimed = match mark_readings_billed(&mut tx, &invoice_id, &reading_ids).await {
            Ok(()) => record_rentals(&mut tx, &invoice_id, &draft.period, &rental_devices).await,
            Err(e) => Err(e),
        };
        if let Err(e) = claimed {
            warn!(
                location_id = %draft.location_id,
                "Rolling back invoice {}: {}",
                invoice_id,
                e
            );
            return Err(e);
        }

        tx.commit()
            .await
            .map_err(|e| BillingError::database("commit_materialize", e))?;

        info!(
            location_id = %draft.location_id,
            period = %draft.period,
            "Created invoice {} with {} line items, {} readings, {} rentals, total {}",
            invoice_id,
            draft.line_items.len(),
            reading_ids.len(),
            rental_devices.len(),
            draft.total_base
        );

        Ok(invoice_id)
    }

    async fn get_invoice(&self, id: &InvoiceId) -> Result<Option<Invoice>> {
        let row = sqlx::query_as::<_, InvoiceRow>(
            r#"
            SELECT invoice_id, location_id, period_start, period_end, total_base,
                   line_items, rate_provenance, created_at
            FROM invoices
            WHERE invoice_id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BillingError::database("get_invoice", e))?;

        row.map(Invoice::try_from).transpose()
    }

    async fn invoices_for_location(&self, location_id: &LocationId) -> Result<Vec<Invoice>> {
        let rows = sqlx::query_as::<_, InvoiceRow>(
            r#"
            SELECT invoice_id, location_id, period_start, period_end, total_base,
                   line_items, rate_provenance, created_at
            FROM invoices
            WHERE location_id = ?
            ORDER BY period_start, created_at
            "#,
        )
        .bind(location_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BillingError::database("invoices_for_location", e))?;

        rows.into_iter().map(Invoice::try_from).collect()
    }

    async fn invoice_for_reading(&self, reading_id: ReadingId) -> Result<Option<InvoiceId>> {
        let id: Option<String> =
            sqlx::query_scalar("SELECT invoice_id FROM invoice_readings WHERE reading_id = ?")
                .bind(reading_id.as_i64())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| BillingError::database("invoice_for_reading", e))?;

        id.map(|id| {
            InvoiceId::from_str(&id).map_err(|e| BillingError::ValidationError {
                field: "invoice_id".to_string(),
                message: e.to_string(),
            })
        })
        .transpose()
    }

    async fn rentals_billed(
        &self,
        location_id: &LocationId,
        period: &BillingPeriod,
    ) -> Result<HashSet<DeviceId>> {
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT r.device_id
            FROM invoice_rentals r
            JOIN invoices i ON i.invoice_id = r.invoice_id
            WHERE i.location_id = ? AND r.period_start = ? AND r.period_end = ?
            "#,
        )
        .bind(location_id.as_str())
        .bind(period.start())
        .bind(period.end())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BillingError::database("rentals_billed", e))?;

        Ok(ids.into_iter().map(DeviceId::new).collect())
    }
}
