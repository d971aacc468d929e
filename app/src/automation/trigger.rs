//! Trigger matching and predicate evaluation against a single stimulus.

use api::automation::{AutomationTrigger, CompareOp, TriggerType};
use api::reading::SensorReading;
use api::trigger_event::TriggerEvent;
use api::value::Value;
use chrono::{DateTime, Local};

/// How close to its `HH:mm` expression a time trigger fires.
pub const TIME_TRIGGER_TOLERANCE_SECONDS: i64 = 30;

/// One unit of engine input.
#[derive(Debug)]
pub enum Stimulus<'a> {
    DeviceState {
        device_id: &'a str,
        property: &'a str,
        old: Option<&'a Value>,
        new: &'a Value,
    },
    Trigger(&'a TriggerEvent),
    Reading {
        reading: &'a SensorReading,
        old: Option<f64>,
    },
    TimeTick {
        now: DateTime<Local>,
    },
}

impl Stimulus<'_> {
    pub fn device_id(&self) -> Option<&str> {
        match self {
            Stimulus::DeviceState { device_id, .. } => Some(device_id),
            Stimulus::Trigger(event) => Some(&event.device_id),
            Stimulus::Reading { reading, .. } => Some(&reading.device_id),
            Stimulus::TimeTick { .. } => None,
        }
    }

    pub fn describe(&self) -> serde_json::Value {
        match self {
            Stimulus::DeviceState {
                device_id,
                property,
                old,
                new,
            } => serde_json::json!({
                "type": "device_state",
                "device_id": device_id,
                "property": property,
                "old": old.map(Value::to_json),
                "new": new.to_json(),
            }),
            Stimulus::Trigger(event) => serde_json::json!({
                "type": "trigger_event",
                "device_id": event.device_id,
                "trigger_type": event.trigger_type,
                "sub_type": event.trigger_sub_type,
            }),
            Stimulus::Reading { reading, .. } => serde_json::json!({
                "type": "sensor_reading",
                "device_id": reading.device_id,
                "metric": reading.metric,
                "value": reading.value,
            }),
            Stimulus::TimeTick { .. } => serde_json::json!({"type": "time"}),
        }
    }
}

/// Whether this trigger is addressed by the stimulus at all. Device and
/// property filters apply here; operator semantics come in [`holds`].
pub fn matches(trigger: &AutomationTrigger, stimulus: &Stimulus<'_>) -> bool {
    match (trigger.trigger_type, stimulus) {
        (TriggerType::DeviceState, Stimulus::DeviceState { device_id, property, .. }) => {
            device_matches(trigger, device_id) && property_matches(trigger, property)
        }
        (TriggerType::TriggerEvent, Stimulus::Trigger(event)) => {
            device_matches(trigger, &event.device_id)
                && trigger.property.as_deref().is_none_or(|p| p == event.trigger_type)
        }
        (TriggerType::SensorReading | TriggerType::SensorThreshold, Stimulus::Reading { reading, .. }) => {
            device_matches(trigger, &reading.device_id)
                && trigger.property.as_deref().is_none_or(|p| p == reading.metric)
        }
        (TriggerType::Time, Stimulus::TimeTick { .. }) => trigger.time_expression.is_some(),
        _ => false,
    }
}

/// Operator evaluation for a matching trigger.
pub fn holds(trigger: &AutomationTrigger, stimulus: &Stimulus<'_>) -> bool {
    match (trigger.trigger_type, stimulus) {
        (TriggerType::DeviceState, Stimulus::DeviceState { old, new, .. }) => trigger
            .operator
            .unwrap_or(CompareOp::AnyChange)
            .holds_for_change(*old, new, trigger.value.as_ref(), trigger.value2.as_ref()),

        (TriggerType::TriggerEvent, Stimulus::Trigger(event)) => match &trigger.value {
            Some(expected) => {
                let sub = event.trigger_sub_type.clone().map(Value::String).unwrap_or(Value::Null);
                expected.normalized() == sub.normalized()
            }
            None => true,
        },

        (TriggerType::SensorReading | TriggerType::SensorThreshold, Stimulus::Reading { reading, old }) => trigger
            .operator
            .unwrap_or(CompareOp::AnyChange)
            .holds_for_number(
                *old,
                reading.value,
                trigger.value.as_ref().and_then(Value::as_number),
                trigger.value2.as_ref().and_then(Value::as_number),
            ),

        (TriggerType::Time, Stimulus::TimeTick { now }) => time_trigger_holds(trigger, *now),

        (TriggerType::Sunrise | TriggerType::Sunset, _) => {
            tracing::warn!(
                trigger_id = %trigger.id,
                "Sun-position triggers require an astronomy provider and are skipped"
            );
            false
        }

        _ => false,
    }
}

fn time_trigger_holds(trigger: &AutomationTrigger, now: DateTime<Local>) -> bool {
    let Some(expression) = trigger.time_expression.as_deref() else {
        return false;
    };

    match support::time::parse_hhmm(expression) {
        Ok(target) => support::time::seconds_from_time_of_day(now, target) <= TIME_TRIGGER_TOLERANCE_SECONDS,
        Err(e) => {
            tracing::warn!(trigger_id = %trigger.id, "Skipping time trigger: {}", e);
            false
        }
    }
}

fn device_matches(trigger: &AutomationTrigger, device_id: &str) -> bool {
    trigger.device_id.as_deref().is_none_or(|d| d == device_id)
}

fn property_matches(trigger: &AutomationTrigger, property: &str) -> bool {
    trigger
        .property
        .as_deref()
        .is_none_or(|p| p == property || p == "*")
}
