use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Known metric tokens. Values are stored after unit normalization
/// (voltage in volts, temperatures in degrees Celsius).
pub mod metric {
    pub const TEMPERATURE: &str = "temperature";
    pub const HUMIDITY: &str = "humidity";
    pub const PRESSURE: &str = "pressure";
    pub const ILLUMINANCE: &str = "illuminance";
    pub const BATTERY: &str = "battery";
    pub const VOLTAGE: &str = "voltage";
    pub const LINKQUALITY: &str = "linkquality";
    pub const BRIGHTNESS: &str = "brightness";
    pub const POWER: &str = "power";
    pub const ENERGY: &str = "energy";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub id: Uuid,
    pub signal_event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub device_id: String,
    pub metric: String,
    pub value: f64,
    pub unit: Option<String>,
}
