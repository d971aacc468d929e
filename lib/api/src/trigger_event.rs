use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::signal::Capability;

/// A discrete occurrence derived from a signal (motion detected, button
/// pressed, contact opened). `trigger_type` and `trigger_sub_type` together
/// form the fingerprint the automation engine matches on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub id: Uuid,
    pub signal_event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub device_id: String,
    pub capability: Capability,
    pub trigger_type: String,
    pub trigger_sub_type: Option<String>,
    pub value: Option<bool>,
}
