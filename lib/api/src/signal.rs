//! Normalized inbound device message, the root of every derived row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What kind of data a payload represents, inferred from its shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, derive_more::Display)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum Capability {
    Motion,
    Button,
    Temperature,
    Contact,
    State,
    Generic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, derive_more::Display)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum DeviceKind {
    Unknown,
    Button,
    Motion,
    Contact,
    Thermometer,
    Light,
    Switch,
    Outlet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, derive_more::Display)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum EventCategory {
    Telemetry,
    Command,
    State,
    Lifecycle,
    Diagnostic,
}

/// Immutable once persisted. `raw_payload` is always a JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub device_id: String,
    pub capability: Capability,
    pub event_type: String,
    pub event_sub_type: Option<String>,
    pub value: Option<f64>,
    pub raw_topic: String,
    pub raw_payload: serde_json::Value,
    pub device_kind: DeviceKind,
    pub event_category: EventCategory,
}

impl SignalEvent {
    /// Scalar payload fields, the view the automation engine caches.
    pub fn payload_object(&self) -> Option<&serde_json::Map<String, serde_json::Value>> {
        self.raw_payload.as_object()
    }
}
