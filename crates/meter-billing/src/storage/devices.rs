use crate::domain::devices::DeviceRecord;
use crate::domain::types::{DeviceId, LocationId};
use crate::error::{BillingError, Result};
use async_trait::async_trait;
use sqlx::{FromRow, SqlitePool};

/// Read access to the device inventory's price sheets
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceRepository: Send + Sync {
    async fn devices_for_location(&self, location_id: &LocationId) -> Result<Vec<DeviceRecord>>;
    async fn get_device(&self, device_id: &DeviceId) -> Result<Option<DeviceRecord>>;

    /// Inventory sync hook; the billing engine itself never writes devices
    async fn upsert_device(&self, device: &DeviceRecord) -> Result<()>;
}

#[derive(Debug, FromRow)]
struct DeviceRow {
    device_id: String,
    location_id: String,
    supports_color: bool,
    bw_unit_price: String,
    bw_currency: String,
    color_unit_price: String,
    color_currency: String,
    rental_fee: String,
    rental_currency: String,
}

impl From<DeviceRow> for DeviceRecord {
    fn from(row: DeviceRow) -> Self {
        DeviceRecord {
            device_id: DeviceId::new(row.device_id),
            location_id: LocationId::new(row.location_id),
            supports_color: row.supports_color,
            bw_unit_price: row.bw_unit_price,
            bw_currency: row.bw_currency,
            color_unit_price: row.color_unit_price,
            color_currency: row.color_currency,
            rental_fee: row.rental_fee,
            rental_currency: row.rental_currency,
        }
    }
}

pub struct SqlDeviceRepository {
    pool: SqlitePool,
}

impl SqlDeviceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeviceRepository for SqlDeviceRepository {
    async fn devices_for_location(&self, location_id: &LocationId) -> Result<Vec<DeviceRecord>> {
        let rows = sqlx::query_as::<_, DeviceRow>(
            r#"
            SELECT device_id, location_id, supports_color, bw_unit_price, bw_currency,
                   color_unit_price, color_currency, rental_fee, rental_currency
            FROM devices
            WHERE location_id = ?
            ORDER BY device_id
            "#,
        )
        .bind(location_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BillingError::database("devices_for_location", e))?;

        Ok(rows.into_iter().map(DeviceRecord::from).collect())
    }

    async fn get_device(&self, device_id: &DeviceId) -> Result<Option<DeviceRecord>> {
        let row = sqlx::query_as::<_, DeviceRow>(
            r#"
            SELECT device_id, location_id, supports_color, bw_unit_price, bw_currency,
                   color_unit_price, color_currency, rental_fee, rental_currency
            FROM devices
            WHERE device_id = ?
            "#,
        )
        .bind(device_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BillingError::database("get_device", e))?;

        Ok(row.map(DeviceRecord::from))
    }

    async fn upsert_device(&self, device: &DeviceRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO devices
                (device_id, location_id, supports_color, bw_unit_price, bw_currency,
                 color_unit_price, color_currency, rental_fee, rental_currency)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (device_id) DO UPDATE SET
                location_id = excluded.location_id,
                supports_color = excluded.supports_color,
                bw_unit_price = excluded.bw_unit_price,
                bw_currency = excluded.bw_currency,
                color_unit_price = excluded.color_unit_price,
                color_currency = excluded.color_currency,
                rental_fee = excluded.rental_fee,
                rental_currency = excluded.rental_currency
            "#,
        )
        .bind(device.device_id.as_str())
        .bind(device.location_id.as_str())
        .bind(device.supports_color)
        .bind(&device.bw_unit_price)
        .bind(&device.bw_currency)
        .bind(&device.color_unit_price)
        .bind(&device.color_currency)
        .bind(&device.rental_fee)
        .bind(&device.rental_currency)
        .execute(&self.pool)
        .await
        .map_err(|e| BillingError::database("upsert_device", e))?;

        Ok(())
    }
}
