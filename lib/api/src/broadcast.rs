//! Payload types pushed through the broadcaster port to the UI layer.
//! Everything here is fire-and-forget: the pipeline never depends on a
//! delivery result.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, derive_more::Display)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Success,
    Error,
}

/// Phases emitted while a rule is being evaluated, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, derive_more::Display)]
#[serde(rename_all = "snake_case")]
pub enum LogPhase {
    TriggerMatched,
    TriggerSkipped,
    CooldownActive,
    ConditionEvaluating,
    ConditionPassed,
    ConditionFailed,
    ActionExecuting,
    ActionCompleted,
    ActionFailed,
    ExecutionCompleted,
    ExecutionFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationLogEntry {
    pub rule_id: Uuid,
    pub rule_name: String,
    pub phase: LogPhase,
    pub level: LogLevel,
    pub message: String,
    #[serde(default)]
    pub details: BTreeMap<String, String>,
    pub duration_ms: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

impl AutomationLogEntry {
    pub fn new(rule_id: Uuid, rule_name: &str, phase: LogPhase, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            rule_id,
            rule_name: rule_name.to_string(),
            phase,
            level,
            message: message.into(),
            details: BTreeMap::new(),
            duration_ms: None,
            timestamp: support::time::now(),
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<String>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: i64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

/// UI stage buckets of the end-to-end timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, derive_more::Display)]
#[serde(rename_all = "snake_case")]
pub enum StageCategory {
    Signal,
    Db,
    Broadcast,
    Automation,
    Mqtt,
    Zigbee,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineStage {
    pub name: String,
    pub category: StageCategory,
    pub duration_ms: f64,
}

/// Causal chain from an inbound signal through automation to the target
/// device's confirmation, as one object for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineTimeline {
    pub id: Uuid,
    pub trigger_device_id: String,
    pub rule_name: Option<String>,
    pub target_device_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub total_ms: f64,
    pub timed_out: bool,
    pub stages: Vec<TimelineStage>,
}

/// Elapsed times of the signal pipeline stages, carried along to the
/// automation engine and the latency tracker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStageSnapshot {
    pub parse_ms: f64,
    pub db_ms: f64,
    pub broadcast_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, derive_more::Display)]
#[serde(rename_all = "snake_case")]
pub enum PairingStatus {
    Starting,
    Active,
    Interviewing,
    DevicePaired,
    CountdownTick,
    Stopping,
    Ended,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, derive_more::Display)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveredDeviceStatus {
    Joined,
    Interviewing,
    Ready,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    pub ieee_address: String,
    pub friendly_name: Option<String>,
    pub model_id: Option<String>,
    pub status: DiscoveredDeviceStatus,
}

/// Snapshot of an active pairing window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DevicePairingProgress {
    pub id: Uuid,
    pub status: PairingStatus,
    pub message: String,
    pub remaining_seconds: u64,
    pub total_seconds: u64,
    pub current_device: Option<DiscoveredDevice>,
    pub discovered: Vec<DiscoveredDevice>,
    pub timestamp: DateTime<Utc>,
}

/// Progress of a state-sync poll sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSyncProgress {
    pub current: usize,
    pub total: usize,
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Per-device attribute delta pushed after a state message was merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStateUpdate {
    pub device_id: String,
    pub changed: BTreeMap<String, serde_json::Value>,
    pub link_quality: Option<i64>,
    pub is_available: bool,
    pub timestamp: DateTime<Utc>,
}
