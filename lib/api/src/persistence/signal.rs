use chrono::{DateTime, Utc};
use sqlx::Row as _;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

use crate::reading::SensorReading;
use crate::signal::SignalEvent;
use crate::trigger_event::TriggerEvent;
use crate::{Error, Result};

fn uuid_col(row: &SqliteRow, col: &str) -> Result<Uuid> {
    let raw: String = row.try_get(col)?;
    Ok(Uuid::parse_str(&raw)?)
}

fn signal_event_from_row(row: &SqliteRow) -> Result<SignalEvent> {
    let raw_payload: String = row.try_get("raw_payload")?;

    Ok(SignalEvent {
        id: uuid_col(row, "id")?,
        timestamp: row.try_get("timestamp")?,
        source: row.try_get("source")?,
        device_id: row.try_get("device_id")?,
        capability: row.try_get("capability")?,
        event_type: row.try_get("event_type")?,
        event_sub_type: row.try_get("event_sub_type")?,
        value: row.try_get("value")?,
        raw_topic: row.try_get("raw_topic")?,
        raw_payload: serde_json::from_str(&raw_payload)?,
        device_kind: row.try_get("device_kind")?,
        event_category: row.try_get("event_category")?,
    })
}

fn sensor_reading_from_row(row: &SqliteRow) -> Result<SensorReading> {
    Ok(SensorReading {
        id: uuid_col(row, "id")?,
        signal_event_id: uuid_col(row, "signal_event_id")?,
        timestamp: row.try_get("timestamp")?,
        device_id: row.try_get("device_id")?,
        metric: row.try_get("metric")?,
        value: row.try_get("value")?,
        unit: row.try_get("unit")?,
    })
}

fn trigger_event_from_row(row: &SqliteRow) -> Result<TriggerEvent> {
    Ok(TriggerEvent {
        id: uuid_col(row, "id")?,
        signal_event_id: uuid_col(row, "signal_event_id")?,
        timestamp: row.try_get("timestamp")?,
        device_id: row.try_get("device_id")?,
        capability: row.try_get("capability")?,
        trigger_type: row.try_get("trigger_type")?,
        trigger_sub_type: row.try_get("trigger_sub_type")?,
        value: row.try_get("value")?,
    })
}

// Signal events and their derived rows
impl super::Database {
    #[tracing::instrument(skip_all, fields(device_id = %event.device_id))]
    pub async fn add_signal_event(&self, event: &SignalEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO signal_events
                (id, timestamp, source, device_id, capability, event_type, event_sub_type,
                 value, raw_topic, raw_payload, device_kind, event_category)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(event.id.to_string())
        .bind(event.timestamp)
        .bind(&event.source)
        .bind(&event.device_id)
        .bind(event.capability)
        .bind(&event.event_type)
        .bind(&event.event_sub_type)
        .bind(event.value)
        .bind(&event.raw_topic)
        .bind(event.raw_payload.to_string())
        .bind(event.device_kind)
        .bind(event.event_category)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn add_sensor_reading(&self, reading: &SensorReading) -> Result<()> {
        sqlx::query(
            "INSERT INTO sensor_readings (id, signal_event_id, timestamp, device_id, metric, value, unit)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(reading.id.to_string())
        .bind(reading.signal_event_id.to_string())
        .bind(reading.timestamp)
        .bind(&reading.device_id)
        .bind(&reading.metric)
        .bind(reading.value)
        .bind(&reading.unit)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn add_trigger_event(&self, event: &TriggerEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO trigger_events
                (id, signal_event_id, timestamp, device_id, capability, trigger_type, trigger_sub_type, value)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(event.id.to_string())
        .bind(event.signal_event_id.to_string())
        .bind(event.timestamp)
        .bind(&event.device_id)
        .bind(event.capability)
        .bind(&event.trigger_type)
        .bind(&event.trigger_sub_type)
        .bind(event.value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Signal events since `since`, oldest first. Used to warm the
    /// automation engine caches on startup.
    pub async fn signal_events_since(&self, since: DateTime<Utc>) -> Result<Vec<SignalEvent>> {
        let rows = sqlx::query("SELECT * FROM signal_events WHERE timestamp >= ? ORDER BY timestamp ASC")
            .bind(since)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(signal_event_from_row).collect()
    }

    pub async fn recent_signal_events_for_device(&self, device_id: &str, limit: i64) -> Result<Vec<SignalEvent>> {
        let rows = sqlx::query("SELECT * FROM signal_events WHERE device_id = ? ORDER BY timestamp DESC LIMIT ?")
            .bind(device_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(signal_event_from_row).collect()
    }

    /// Readings since `since`, oldest first.
    pub async fn sensor_readings_since(&self, since: DateTime<Utc>) -> Result<Vec<SensorReading>> {
        let rows = sqlx::query("SELECT * FROM sensor_readings WHERE timestamp >= ? ORDER BY timestamp ASC")
            .bind(since)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(sensor_reading_from_row).collect()
    }

    pub async fn recent_sensor_readings(&self, device_id: &str, metric: &str, limit: i64) -> Result<Vec<SensorReading>> {
        let rows = sqlx::query(
            "SELECT * FROM sensor_readings WHERE device_id = ? AND metric = ? ORDER BY timestamp DESC LIMIT ?",
        )
        .bind(device_id)
        .bind(metric)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(sensor_reading_from_row).collect()
    }

    pub async fn recent_trigger_events_for_device(&self, device_id: &str, limit: i64) -> Result<Vec<TriggerEvent>> {
        let rows = sqlx::query("SELECT * FROM trigger_events WHERE device_id = ? ORDER BY timestamp DESC LIMIT ?")
            .bind(device_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(trigger_event_from_row).collect()
    }

    /// Derived rows must reference a persisted signal event.
    pub async fn signal_event_exists(&self, id: Uuid) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM signal_events WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn get_signal_event(&self, id: Uuid) -> Result<SignalEvent> {
        let row = sqlx::query("SELECT * FROM signal_events WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => signal_event_from_row(&row),
            None => Err(Error::NotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::Database;
    use crate::signal::{Capability, DeviceKind, EventCategory};

    use super::*;

    fn fixed_instant() -> DateTime<Utc> {
        "2026-03-01T10:30:00Z".parse().unwrap()
    }

    fn sample_event() -> SignalEvent {
        SignalEvent {
            id: Uuid::new_v4(),
            timestamp: fixed_instant(),
            source: "mqtt".to_string(),
            device_id: "hallway_motion".to_string(),
            capability: Capability::Motion,
            event_type: "detection".to_string(),
            event_sub_type: Some("active".to_string()),
            value: Some(1.0),
            raw_topic: "sdhome/hallway_motion".to_string(),
            raw_payload: serde_json::json!({"occupancy": true, "battery": 78}),
            device_kind: DeviceKind::Motion,
            event_category: EventCategory::Telemetry,
        }
    }

    #[sqlx::test]
    async fn signal_event_roundtrip(pool: sqlx::SqlitePool) {
        let db = Database::new(pool);
        db.migrate().await.unwrap();

        let event = sample_event();
        db.add_signal_event(&event).await.unwrap();

        let loaded = db.get_signal_event(event.id).await.unwrap();
        assert_eq!(loaded, event);
    }

    #[sqlx::test]
    async fn derived_rows_roundtrip_and_reference_their_signal(pool: sqlx::SqlitePool) {
        let db = Database::new(pool);
        db.migrate().await.unwrap();

        let event = sample_event();
        db.add_signal_event(&event).await.unwrap();

        let reading = SensorReading {
            id: Uuid::new_v4(),
            signal_event_id: event.id,
            timestamp: event.timestamp,
            device_id: event.device_id.clone(),
            metric: "battery".to_string(),
            value: 78.0,
            unit: Some("%".to_string()),
        };
        db.add_sensor_reading(&reading).await.unwrap();

        let trigger = TriggerEvent {
            id: Uuid::new_v4(),
            signal_event_id: event.id,
            timestamp: event.timestamp,
            device_id: event.device_id.clone(),
            capability: Capability::Motion,
            trigger_type: "motion".to_string(),
            trigger_sub_type: Some("active".to_string()),
            value: Some(true),
        };
        db.add_trigger_event(&trigger).await.unwrap();

        let readings = db.recent_sensor_readings(&event.device_id, "battery", 10).await.unwrap();
        assert_eq!(readings, vec![reading]);

        let triggers = db.recent_trigger_events_for_device(&event.device_id, 10).await.unwrap();
        assert_eq!(triggers, vec![trigger]);

        assert!(db.signal_event_exists(event.id).await.unwrap());
    }

    #[sqlx::test]
    async fn since_queries_return_ascending_order(pool: sqlx::SqlitePool) {
        let db = Database::new(pool);
        db.migrate().await.unwrap();

        let mut first = sample_event();
        first.timestamp = fixed_instant() - chrono::Duration::minutes(10);
        let mut second = sample_event();
        second.timestamp = fixed_instant();

        db.add_signal_event(&second).await.unwrap();
        db.add_signal_event(&first).await.unwrap();

        let events = db
            .signal_events_since(fixed_instant() - chrono::Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].id, first.id);
        assert_eq!(events[1].id, second.id);
    }
}
