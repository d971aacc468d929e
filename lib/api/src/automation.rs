//! Automation rules: ordered triggers, conditions and actions, plus the
//! execution log written after every evaluation attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use crate::value::CompareOp;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, derive_more::Display)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TriggerMode {
    Any,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, derive_more::Display)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ConditionMode {
    All,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, derive_more::Display)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TriggerType {
    DeviceState,
    Time,
    Sunrise,
    Sunset,
    SensorThreshold,
    Manual,
    TriggerEvent,
    SensorReading,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, derive_more::Display)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum SunEvent {
    Sunrise,
    Sunset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, derive_more::Display)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ConditionType {
    DeviceState,
    TimeRange,
    DayOfWeek,
    SunPosition,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, derive_more::Display)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ActionType {
    SetDeviceState,
    ToggleDevice,
    Delay,
    Webhook,
    Notification,
    ActivateScene,
    RunAutomation,
}

/// A rule with no triggers never fires automatically. The cooldown gate
/// compares wall-clock; the execution count only ever grows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationRule {
    pub id: Uuid,
    pub name: String,
    pub is_enabled: bool,
    pub trigger_mode: TriggerMode,
    pub condition_mode: ConditionMode,
    pub cooldown_seconds: i64,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub execution_count: i64,
    pub triggers: Vec<AutomationTrigger>,
    pub conditions: Vec<AutomationCondition>,
    pub actions: Vec<AutomationAction>,
}

impl AutomationRule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            is_enabled: true,
            trigger_mode: TriggerMode::Any,
            condition_mode: ConditionMode::All,
            cooldown_seconds: 0,
            last_triggered_at: None,
            execution_count: 0,
            triggers: Vec::new(),
            conditions: Vec::new(),
            actions: Vec::new(),
        }
    }

    /// Whether the cooldown gate blocks a firing at `now`.
    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        match self.last_triggered_at {
            Some(last) if self.cooldown_seconds > 0 => {
                now.signed_duration_since(last) < chrono::Duration::seconds(self.cooldown_seconds)
            }
            _ => false,
        }
    }
}

/// Exactly one modality group is populated per `trigger_type`: device/property
/// matching for state-driven triggers, `time_expression` for clock triggers,
/// `sun_event` + offset for astronomic ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationTrigger {
    pub id: Uuid,
    pub trigger_type: TriggerType,
    pub device_id: Option<String>,
    pub property: Option<String>,
    pub operator: Option<CompareOp>,
    pub value: Option<Value>,
    pub value2: Option<Value>,
    pub time_expression: Option<String>,
    pub sun_event: Option<SunEvent>,
    pub offset_minutes: Option<i64>,
    pub sort_order: i64,
}

impl AutomationTrigger {
    pub fn new(trigger_type: TriggerType) -> Self {
        Self {
            id: Uuid::new_v4(),
            trigger_type,
            device_id: None,
            property: None,
            operator: None,
            value: None,
            value2: None,
            time_expression: None,
            sun_event: None,
            offset_minutes: None,
            sort_order: 0,
        }
    }

    pub fn device_state(device_id: &str, property: &str, operator: CompareOp, value: Value) -> Self {
        Self {
            device_id: Some(device_id.to_string()),
            property: Some(property.to_string()),
            operator: Some(operator),
            value: Some(value),
            ..Self::new(TriggerType::DeviceState)
        }
    }

    pub fn at_time(expression: &str) -> Self {
        Self {
            time_expression: Some(expression.to_string()),
            ..Self::new(TriggerType::Time)
        }
    }
}

/// Composite `And`/`Or` conditions nest through `children`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationCondition {
    pub id: Uuid,
    pub condition_type: ConditionType,
    pub device_id: Option<String>,
    pub property: Option<String>,
    pub operator: Option<CompareOp>,
    pub value: Option<Value>,
    pub value2: Option<Value>,
    pub time_start: Option<String>,
    pub time_end: Option<String>,
    /// ISO weekday numbers, 1 = Monday … 7 = Sunday. Empty means every day.
    pub days_of_week: Vec<u8>,
    pub children: Vec<AutomationCondition>,
    pub sort_order: i64,
}

impl AutomationCondition {
    pub fn new(condition_type: ConditionType) -> Self {
        Self {
            id: Uuid::new_v4(),
            condition_type,
            device_id: None,
            property: None,
            operator: None,
            value: None,
            value2: None,
            time_start: None,
            time_end: None,
            days_of_week: Vec::new(),
            children: Vec::new(),
            sort_order: 0,
        }
    }

    pub fn device_state(device_id: &str, property: &str, operator: CompareOp, value: Value) -> Self {
        Self {
            device_id: Some(device_id.to_string()),
            property: Some(property.to_string()),
            operator: Some(operator),
            value: Some(value),
            ..Self::new(ConditionType::DeviceState)
        }
    }

    pub fn time_range(start: &str, end: &str) -> Self {
        Self {
            time_start: Some(start.to_string()),
            time_end: Some(end.to_string()),
            ..Self::new(ConditionType::TimeRange)
        }
    }

    pub fn days_of_week(days: &[u8]) -> Self {
        Self {
            days_of_week: days.to_vec(),
            ..Self::new(ConditionType::DayOfWeek)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationAction {
    pub id: Uuid,
    pub action_type: ActionType,
    pub device_id: Option<String>,
    pub property: Option<String>,
    pub value: Option<Value>,
    pub delay_seconds: Option<i64>,
    pub webhook_url: Option<String>,
    pub webhook_method: Option<String>,
    pub webhook_body: Option<String>,
    pub notification_title: Option<String>,
    pub notification_message: Option<String>,
    pub scene_id: Option<Uuid>,
    pub run_rule_id: Option<Uuid>,
    pub sort_order: i64,
}

impl AutomationAction {
    pub fn new(action_type: ActionType) -> Self {
        Self {
            id: Uuid::new_v4(),
            action_type,
            device_id: None,
            property: None,
            value: None,
            delay_seconds: None,
            webhook_url: None,
            webhook_method: None,
            webhook_body: None,
            notification_title: None,
            notification_message: None,
            scene_id: None,
            run_rule_id: None,
            sort_order: 0,
        }
    }

    pub fn set_device_state(device_id: &str, property: &str, value: Value) -> Self {
        Self {
            device_id: Some(device_id.to_string()),
            property: Some(property.to_string()),
            value: Some(value),
            ..Self::new(ActionType::SetDeviceState)
        }
    }

    pub fn toggle_device(device_id: &str, property: &str) -> Self {
        Self {
            device_id: Some(device_id.to_string()),
            property: Some(property.to_string()),
            ..Self::new(ActionType::ToggleDevice)
        }
    }

    pub fn activate_scene(scene_id: Uuid) -> Self {
        Self {
            scene_id: Some(scene_id),
            ..Self::new(ActionType::ActivateScene)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, derive_more::Display)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    PartialFailure,
    Failure,
    SkippedCooldown,
    SkippedCondition,
}

impl ExecutionStatus {
    /// Statuses that represent an actual firing (actions ran).
    pub fn is_fired(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Success | ExecutionStatus::PartialFailure | ExecutionStatus::Failure
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub action_id: Uuid,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: i64,
}

/// Append-only record of an evaluation attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub id: Uuid,
    pub rule_id: Uuid,
    pub executed_at: DateTime<Utc>,
    pub status: ExecutionStatus,
    pub trigger_source: serde_json::Value,
    pub action_results: Vec<ActionResult>,
    pub duration_ms: i64,
    pub error_message: Option<String>,
}
