//! Turns a raw `(topic, payload)` into a normalized [`SignalEvent`].
//! Capability is inferred from the payload shape; bridge and management
//! topics are not signals and map to nothing.

use api::signal::{Capability, DeviceKind, EventCategory, SignalEvent};
use uuid::Uuid;

pub struct SignalMapper {
    base_topic: String,
}

impl SignalMapper {
    pub fn new(base_topic: &str) -> Self {
        Self {
            base_topic: base_topic.trim_matches('/').to_owned(),
        }
    }

    pub fn map(&self, topic: &str, payload: &str) -> Option<SignalEvent> {
        let device_id = self.device_id(topic)?;

        let raw_payload: serde_json::Value = serde_json::from_str(payload).ok()?;
        let object = raw_payload.as_object()?;

        let (capability, event_type, event_sub_type, value) = classify(object);
        let device_kind = device_kind(capability, object);
        let event_category = event_category(capability);

        Some(SignalEvent {
            id: Uuid::new_v4(),
            timestamp: support::time::now(),
            source: "mqtt".to_string(),
            device_id,
            capability,
            event_type,
            event_sub_type,
            value,
            raw_topic: topic.to_string(),
            raw_payload,
            device_kind,
            event_category,
        })
    }

    /// Device id is the topic suffix after the base prefix. Bridge and
    /// management topics carry no device data.
    fn device_id(&self, topic: &str) -> Option<String> {
        let suffix = topic.strip_prefix(&self.base_topic)?.trim_matches('/');

        if suffix.is_empty()
            || suffix == "bridge"
            || suffix.starts_with("bridge/")
            || suffix.ends_with("/set")
            || suffix.ends_with("/get")
            || suffix.ends_with("/availability")
        {
            return None;
        }

        Some(suffix.split('/').next_back()?.to_string())
    }
}

fn classify(
    object: &serde_json::Map<String, serde_json::Value>,
) -> (Capability, String, Option<String>, Option<f64>) {
    if let Some(action) = object.get("action").and_then(|v| v.as_str()) {
        return (Capability::Button, "press".to_string(), Some(action.to_string()), None);
    }

    if let Some(occupancy) = object.get("occupancy").and_then(|v| v.as_bool()) {
        let sub = if occupancy { "active" } else { "inactive" };
        return (Capability::Motion, "detection".to_string(), Some(sub.to_string()), None);
    }

    if let Some(contact) = object.get("contact").and_then(|v| v.as_bool()) {
        let sub = if contact { "closed" } else { "open" };
        return (Capability::Contact, "contact".to_string(), Some(sub.to_string()), None);
    }

    if let Some(temperature) = object.get("temperature").and_then(|v| v.as_f64()) {
        return (
            Capability::Temperature,
            "measurement".to_string(),
            None,
            Some(temperature),
        );
    }

    if let Some(state) = object.get("state").and_then(|v| v.as_str())
        && matches!(state, "ON" | "OFF")
    {
        return (
            Capability::State,
            "state".to_string(),
            Some(state.to_lowercase()),
            None,
        );
    }

    (Capability::Generic, "report".to_string(), None, None)
}

fn device_kind(capability: Capability, object: &serde_json::Map<String, serde_json::Value>) -> DeviceKind {
    match capability {
        Capability::Button => DeviceKind::Button,
        Capability::Motion => DeviceKind::Motion,
        Capability::Contact => DeviceKind::Contact,
        Capability::Temperature => DeviceKind::Thermometer,
        Capability::State => {
            if object.contains_key("brightness") {
                DeviceKind::Light
            } else if object.contains_key("power") || object.contains_key("energy") {
                DeviceKind::Outlet
            } else {
                DeviceKind::Switch
            }
        }
        Capability::Generic => DeviceKind::Unknown,
    }
}

fn event_category(capability: Capability) -> EventCategory {
    match capability {
        Capability::Button => EventCategory::Command,
        Capability::State => EventCategory::State,
        _ => EventCategory::Telemetry,
    }
}
