use crate::domain::readings::{MeterReading, NewMeterReading};
use crate::domain::types::{BillingPeriod, DeviceId, LocationId, ReadingId};
use crate::error::{BillingError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReadingRepository: Send + Sync {
    /// Stores a reading from the entry workflow; it starts unbilled
    async fn record_reading(&self, reading: &NewMeterReading) -> Result<MeterReading>;

    async fn get_reading(&self, id: ReadingId) -> Result<Option<MeterReading>>;

    /// All readings of the location's devices inside the window, billed or not
    async fn window_readings(
        &self,
        location_id: &LocationId,
        period: &BillingPeriod,
    ) -> Result<Vec<MeterReading>>;

    /// Last reading of a device strictly before `before`
    async fn latest_before(
        &self,
        device_id: &DeviceId,
        before: DateTime<Utc>,
    ) -> Result<Option<MeterReading>>;
}

#[derive(Debug, FromRow)]
struct ReadingRow {
    id: i64,
    device_id: String,
    recorded_at: DateTime<Utc>,
    bw_counter: i64,
    color_counter: i64,
    billed: bool,
}

impl TryFrom<ReadingRow> for MeterReading {
    type Error = BillingError;

    fn try_from(row: ReadingRow) -> Result<Self> {
        let counter = |field: &str, value: i64| {
            u64::try_from(value).map_err(|_| BillingError::DataIntegrity {
                device_id: row.device_id.clone(),
                field: field.to_string(),
                value: value.to_string(),
            })
        };

        Ok(MeterReading {
            id: ReadingId::new(row.id),
            bw_counter: counter("bw_counter", row.bw_counter)?,
            color_counter: counter("color_counter", row.color_counter)?,
            device_id: DeviceId::new(row.device_id),
            recorded_at: row.recorded_at,
            billed: row.billed,
        })
    }
}

fn to_counter(field: &str, value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| BillingError::ValidationError {
        field: field.to_string(),
        message: format!("counter {} exceeds storage range", value),
    })
}

pub struct SqlReadingRepository {
    pool: SqlitePool,
}

impl SqlReadingRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReadingRepository for SqlReadingRepository {
    async fn record_reading(&self, reading: &NewMeterReading) -> Result<MeterReading> {
        let result = sqlx::query(
            r#"
            INSERT INTO meter_readings (device_id, recorded_at, bw_counter, color_counter, billed)
            VALUES (?, ?, ?, ?, 0)
            "#,
        )
        .bind(reading.device_id.as_str())
        .bind(reading.recorded_at)
        .bind(to_counter("bw_counter", reading.bw_counter)?)
        .bind(to_counter("color_counter", reading.color_counter)?)
        .execute(&self.pool)
        .await
        .map_err(|e| BillingError::database("record_reading", e))?;

        Ok(MeterReading {
            id: ReadingId::new(result.last_insert_rowid()),
            device_id: reading.device_id.clone(),
            recorded_at: reading.recorded_at,
            bw_counter: reading.bw_counter,
            color_counter: reading.color_counter,
            billed: false,
        })
    }

    async fn get_reading(&self, id: ReadingId) -> Result<Option<MeterReading>> {
        let row = sqlx::query_as::<_, ReadingRow>(
            r#"
            SELECT id, device_id, recorded_at, bw_counter, color_counter, billed
            FROM meter_readings
            WHERE id = ?
            "#,
        )
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BillingError::database("get_reading", e))?;

        row.map(MeterReading::try_from).transpose()
    }

    async fn window_readings(
        &self,
        location_id: &LocationId,
        period: &BillingPeriod,
    ) -> Result<Vec<MeterReading>> {
        let rows = sqlx::query_as::<_, ReadingRow>(
            r#"
            SELECT r.id, r.device_id, r.recorded_at, r.bw_counter, r.color_counter, r.billed
            FROM meter_readings r
            JOIN devices d ON d.device_id = r.device_id
            WHERE d.location_id = ?
              AND r.recorded_at >= ?
              AND r.recorded_at < ?
            ORDER BY r.device_id, r.recorded_at, r.id
            "#,
        )
        .bind(location_id.as_str())
        .bind(period.starts_at())
        .bind(period.ends_before())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BillingError::database("window_readings", e))?;

        rows.into_iter().map(MeterReading::try_from).collect()
    }

    async fn latest_before(
        &self,
        device_id: &DeviceId,
        before: DateTime<Utc>,
    ) -> Result<Option<MeterReading>> {
        let row = sqlx::query_as::<_, ReadingRow>(
            r#"
            SELECT id, device_id, recorded_at, bw_counter, color_counter, billed
            FROM meter_readings
            WHERE device_id = ? AND recorded_at < ?
            ORDER BY recorded_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(device_id.as_str())
        .bind(before)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BillingError::database("latest_before", e))?;

        row.map(MeterReading::try_from).transpose()
    }
}
