use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, derive_more::Display)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum DeviceType {
    Light,
    Switch,
    Sensor,
    Climate,
    Lock,
    Cover,
    Fan,
    Other,
}

/// Registry entry for a device. Created on first sight (state sync or
/// pairing), updated on every state change, never auto-deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub device_id: String,
    pub friendly_name: String,
    pub display_name: Option<String>,
    pub ieee_address: Option<String>,
    pub model_id: Option<String>,
    pub manufacturer: Option<String>,
    pub description: Option<String>,
    pub has_mains_power: bool,
    pub device_type: Option<DeviceType>,
    pub zone_id: Option<i64>,
    pub capabilities: BTreeSet<String>,
    pub attributes: serde_json::Map<String, serde_json::Value>,
    pub last_seen: Option<DateTime<Utc>>,
    pub is_available: bool,
    pub link_quality: Option<i64>,
}

impl Device {
    pub fn new(device_id: impl Into<String>) -> Self {
        let device_id = device_id.into();
        Self {
            friendly_name: device_id.clone(),
            device_id,
            display_name: None,
            ieee_address: None,
            model_id: None,
            manufacturer: None,
            description: None,
            has_mains_power: false,
            device_type: None,
            zone_id: None,
            capabilities: BTreeSet::new(),
            attributes: serde_json::Map::new(),
            last_seen: None,
            is_available: false,
            link_quality: None,
        }
    }

    /// Display name falls back to the friendly name.
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.friendly_name)
    }

    /// Merge a payload into the attribute map, last-writer-wins per key.
    /// Returns the keys whose value actually changed. Capabilities pick up
    /// every seen property, idempotently.
    pub fn merge_attributes(&mut self, patch: &serde_json::Map<String, serde_json::Value>) -> Vec<String> {
        let mut changed = Vec::new();

        for (key, value) in patch {
            if self.attributes.get(key) != Some(value) {
                self.attributes.insert(key.clone(), value.clone());
                changed.push(key.clone());
            }
            self.capabilities.insert(key.clone());
        }

        changed
    }
}
