use chrono::{DateTime, Utc};
use sqlx::Row as _;
use sqlx::sqlite::SqliteRow;

use crate::device::Device;
use crate::{Error, Result};

fn device_from_row(row: &SqliteRow) -> Result<Device> {
    let capabilities: String = row.try_get("capabilities")?;
    let attributes: String = row.try_get("attributes")?;

    Ok(Device {
        device_id: row.try_get("device_id")?,
        friendly_name: row.try_get("friendly_name")?,
        display_name: row.try_get("display_name")?,
        ieee_address: row.try_get("ieee_address")?,
        model_id: row.try_get("model_id")?,
        manufacturer: row.try_get("manufacturer")?,
        description: row.try_get("description")?,
        has_mains_power: row.try_get("has_mains_power")?,
        device_type: row.try_get("device_type")?,
        zone_id: row.try_get("zone_id")?,
        capabilities: serde_json::from_str(&capabilities)?,
        attributes: serde_json::from_str(&attributes)?,
        last_seen: row.try_get("last_seen")?,
        is_available: row.try_get("is_available")?,
        link_quality: row.try_get("link_quality")?,
    })
}

// Device registry
impl super::Database {
    /// Insert or fully replace a device row, keyed by `device_id`.
    #[tracing::instrument(skip_all, fields(device_id = %device.device_id))]
    pub async fn upsert_device(&self, device: &Device) -> Result<()> {
        sqlx::query(
            "INSERT INTO devices
                (device_id, friendly_name, display_name, ieee_address, model_id, manufacturer,
                 description, has_mains_power, device_type, zone_id, capabilities, attributes,
                 last_seen, is_available, link_quality)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (device_id) DO UPDATE SET
                friendly_name = excluded.friendly_name,
                display_name = excluded.display_name,
                ieee_address = excluded.ieee_address,
                model_id = excluded.model_id,
                manufacturer = excluded.manufacturer,
                description = excluded.description,
                has_mains_power = excluded.has_mains_power,
                device_type = excluded.device_type,
                zone_id = excluded.zone_id,
                capabilities = excluded.capabilities,
                attributes = excluded.attributes,
                last_seen = excluded.last_seen,
                is_available = excluded.is_available,
                link_quality = excluded.link_quality",
        )
        .bind(&device.device_id)
        .bind(&device.friendly_name)
        .bind(&device.display_name)
        .bind(&device.ieee_address)
        .bind(&device.model_id)
        .bind(&device.manufacturer)
        .bind(&device.description)
        .bind(device.has_mains_power)
        .bind(device.device_type)
        .bind(device.zone_id)
        .bind(serde_json::to_string(&device.capabilities)?)
        .bind(serde_json::to_string(&device.attributes)?)
        .bind(device.last_seen)
        .bind(device.is_available)
        .bind(device.link_quality)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Look up by primary key or by friendly name.
    pub async fn get_device(&self, id_or_name: &str) -> Result<Option<Device>> {
        let row = sqlx::query("SELECT * FROM devices WHERE device_id = ? OR friendly_name = ? LIMIT 1")
            .bind(id_or_name)
            .bind(id_or_name)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(device_from_row).transpose()
    }

    pub async fn all_devices(&self) -> Result<Vec<Device>> {
        let rows = sqlx::query("SELECT * FROM devices ORDER BY device_id")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(device_from_row).collect()
    }

    /// Persist the outcome of an attribute merge.
    pub async fn update_device_state(
        &self,
        device_id: &str,
        attributes: &serde_json::Map<String, serde_json::Value>,
        capabilities: &std::collections::BTreeSet<String>,
        link_quality: Option<i64>,
        last_seen: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE devices
             SET attributes = ?, capabilities = ?, link_quality = COALESCE(?, link_quality),
                 last_seen = ?, is_available = 1
             WHERE device_id = ?",
        )
        .bind(serde_json::to_string(attributes)?)
        .bind(serde_json::to_string(capabilities)?)
        .bind(link_quality)
        .bind(last_seen)
        .bind(device_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound);
        }

        Ok(())
    }

    pub async fn set_device_availability(&self, device_id: &str, is_available: bool) -> Result<()> {
        sqlx::query("UPDATE devices SET is_available = ? WHERE device_id = ?")
            .bind(is_available)
            .bind(device_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn assign_device_zone(&self, device_id: &str, zone_id: Option<i64>) -> Result<()> {
        let result = sqlx::query("UPDATE devices SET zone_id = ? WHERE device_id = ?")
            .bind(zone_id)
            .bind(device_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound);
        }

        Ok(())
    }
}
