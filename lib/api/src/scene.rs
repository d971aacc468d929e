use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::value::Value;

/// A named snapshot of device states: `device_id → property → value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub id: Uuid,
    pub name: String,
    pub device_states: BTreeMap<String, BTreeMap<String, Value>>,
}

impl Scene {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            device_states: BTreeMap::new(),
        }
    }

    pub fn with_device_state(mut self, device_id: &str, property: &str, value: Value) -> Self {
        self.device_states
            .entry(device_id.to_string())
            .or_default()
            .insert(property.to_string(), value);
        self
    }
}
