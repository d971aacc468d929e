//! Derives sensor readings and at most one trigger event from a signal,
//! by capability. All derived rows share the parent's id and timestamp.
//! Numeric parsing is lenient: missing or mistyped fields are skipped.

use api::reading::{SensorReading, metric};
use api::signal::{Capability, SignalEvent};
use api::trigger_event::TriggerEvent;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct Projection {
    pub trigger_event: Option<TriggerEvent>,
    pub readings: Vec<SensorReading>,
}

pub fn project(event: &SignalEvent) -> Projection {
    let Some(object) = event.payload_object() else {
        return Projection::default();
    };

    let mut readings = ReadingBuilder {
        event,
        readings: Vec::new(),
    };

    let trigger_event = match event.capability {
        Capability::Motion => {
            readings.push_from(metric::TEMPERATURE, "device_temperature", Some("°C"), None);
            readings.push_from(metric::ILLUMINANCE, "illuminance", Some("lx"), None);
            readings.push_common();

            let value = object
                .get("occupancy")
                .and_then(|v| v.as_bool())
                .or_else(|| Some(event.event_sub_type.as_deref() == Some("active")));

            Some(trigger(event, "motion", event.event_sub_type.clone(), value))
        }

        Capability::Button => {
            readings.push_common();
            Some(trigger(event, "button", event.event_sub_type.clone(), Some(true)))
        }

        Capability::Temperature => {
            readings.push_from(metric::TEMPERATURE, "temperature", Some("°C"), None);
            readings.push_from(metric::HUMIDITY, "humidity", Some("%"), None);
            readings.push_from(metric::PRESSURE, "pressure", Some("hPa"), None);
            readings.push_common();
            None
        }

        Capability::Contact => {
            readings.push_common();

            let contact = object.get("contact").and_then(|v| v.as_bool());
            let sub = contact.map(|closed| if closed { "closed" } else { "open" }.to_string());
            Some(trigger(event, "contact", sub.or_else(|| event.event_sub_type.clone()), contact))
        }

        Capability::State => {
            readings.push_from(metric::BRIGHTNESS, "brightness", None, None);
            readings.push_from(metric::POWER, "power", Some("W"), None);
            readings.push_from(metric::ENERGY, "energy", Some("kWh"), None);

            let on = object.get("state").and_then(|v| v.as_str()).map(|s| s == "ON");
            Some(trigger(event, "state", event.event_sub_type.clone(), on))
        }

        Capability::Generic => {
            readings.push_common();
            None
        }
    };

    Projection {
        trigger_event,
        readings: readings.readings,
    }
}

fn trigger(event: &SignalEvent, trigger_type: &str, sub_type: Option<String>, value: Option<bool>) -> TriggerEvent {
    TriggerEvent {
        id: Uuid::new_v4(),
        signal_event_id: event.id,
        timestamp: event.timestamp,
        device_id: event.device_id.clone(),
        capability: event.capability,
        trigger_type: trigger_type.to_string(),
        trigger_sub_type: sub_type,
        value,
    }
}

struct ReadingBuilder<'a> {
    event: &'a SignalEvent,
    readings: Vec<SensorReading>,
}

impl ReadingBuilder<'_> {
    /// Readings most payloads carry regardless of capability. Voltage comes
    /// in millivolts and is stored in volts.
    fn push_common(&mut self) {
        self.push_from(metric::BATTERY, "battery", Some("%"), None);
        self.push_from(metric::LINKQUALITY, "linkquality", None, None);
        self.push_from(metric::VOLTAGE, "voltage", Some("V"), Some(1.0 / 1000.0));
    }

    fn push_from(&mut self, metric: &str, field: &str, unit: Option<&str>, scale: Option<f64>) {
        let Some(object) = self.event.payload_object() else {
            return;
        };

        let Some(value) = object.get(field).and_then(|v| v.as_f64()) else {
            return;
        };

        self.readings.push(SensorReading {
            id: Uuid::new_v4(),
            signal_event_id: self.event.id,
            timestamp: self.event.timestamp,
            device_id: self.event.device_id.clone(),
            metric: metric.to_string(),
            value: value * scale.unwrap_or(1.0),
            unit: unit.map(str::to_string),
        });
    }
}
