//! Bus-backed broadcaster. The UI layer (HTTP/WebSocket, implemented
//! elsewhere) subscribes to the bus and ships every message to clients.

#[cfg(test)]
use std::sync::{Arc, Mutex};

use api::broadcast::{
    AutomationLogEntry, DevicePairingProgress, DeviceStateUpdate, DeviceSyncProgress, PipelineTimeline,
};
use api::reading::SensorReading;
use api::signal::SignalEvent;
use api::trigger_event::TriggerEvent;
use infrastructure::{EventBus, EventEmitter, EventListener};

use crate::port::Broadcaster;

#[derive(Debug, Clone)]
pub enum PushMessage {
    SignalEvent(SignalEvent),
    SensorReading(SensorReading),
    TriggerEvent(TriggerEvent),
    DeviceStateUpdate(DeviceStateUpdate),
    AutomationLog(AutomationLogEntry),
    PipelineTimeline(PipelineTimeline),
    DeviceSyncProgress(DeviceSyncProgress),
    DevicePairingProgress(DevicePairingProgress),
}

pub struct BusBroadcaster {
    emitter: EventEmitter<PushMessage>,
}

impl BusBroadcaster {
    pub fn new(bus: &EventBus<PushMessage>) -> Self {
        Self { emitter: bus.emitter() }
    }

    pub fn subscribe(bus: &EventBus<PushMessage>) -> EventListener<PushMessage> {
        bus.subscribe()
    }
}

impl Broadcaster for BusBroadcaster {
    fn signal_event(&self, event: &SignalEvent) {
        self.emitter.send(PushMessage::SignalEvent(event.clone()));
    }

    fn sensor_reading(&self, reading: &SensorReading) {
        self.emitter.send(PushMessage::SensorReading(reading.clone()));
    }

    fn trigger_event(&self, event: &TriggerEvent) {
        self.emitter.send(PushMessage::TriggerEvent(event.clone()));
    }

    fn device_state_update(&self, update: &DeviceStateUpdate) {
        self.emitter.send(PushMessage::DeviceStateUpdate(update.clone()));
    }

    fn automation_log(&self, entry: &AutomationLogEntry) {
        self.emitter.send(PushMessage::AutomationLog(entry.clone()));
    }

    fn pipeline_timeline(&self, timeline: &PipelineTimeline) {
        self.emitter.send(PushMessage::PipelineTimeline(timeline.clone()));
    }

    fn device_sync_progress(&self, progress: &DeviceSyncProgress) {
        self.emitter.send(PushMessage::DeviceSyncProgress(progress.clone()));
    }

    fn device_pairing_progress(&self, progress: &DevicePairingProgress) {
        self.emitter.send(PushMessage::DevicePairingProgress(progress.clone()));
    }
}

/// Test double collecting every pushed message.
#[cfg(test)]
#[derive(Default, Clone)]
pub struct CollectingBroadcaster {
    pub messages: Arc<Mutex<Vec<PushMessage>>>,
}

#[cfg(test)]
impl CollectingBroadcaster {
    pub fn automation_logs(&self) -> Vec<AutomationLogEntry> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter_map(|m| match m {
                PushMessage::AutomationLog(entry) => Some(entry.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn timelines(&self) -> Vec<PipelineTimeline> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter_map(|m| match m {
                PushMessage::PipelineTimeline(t) => Some(t.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn pairing_progress(&self) -> Vec<DevicePairingProgress> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter_map(|m| match m {
                PushMessage::DevicePairingProgress(p) => Some(p.clone()),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
impl Broadcaster for CollectingBroadcaster {
    fn signal_event(&self, event: &SignalEvent) {
        self.messages.lock().unwrap().push(PushMessage::SignalEvent(event.clone()));
    }

    fn sensor_reading(&self, reading: &SensorReading) {
        self.messages.lock().unwrap().push(PushMessage::SensorReading(reading.clone()));
    }

    fn trigger_event(&self, event: &TriggerEvent) {
        self.messages.lock().unwrap().push(PushMessage::TriggerEvent(event.clone()));
    }

    fn device_state_update(&self, update: &DeviceStateUpdate) {
        self.messages
            .lock()
            .unwrap()
            .push(PushMessage::DeviceStateUpdate(update.clone()));
    }

    fn automation_log(&self, entry: &AutomationLogEntry) {
        self.messages.lock().unwrap().push(PushMessage::AutomationLog(entry.clone()));
    }

    fn pipeline_timeline(&self, timeline: &PipelineTimeline) {
        self.messages
            .lock()
            .unwrap()
            .push(PushMessage::PipelineTimeline(timeline.clone()));
    }

    fn device_sync_progress(&self, progress: &DeviceSyncProgress) {
        self.messages
            .lock()
            .unwrap()
            .push(PushMessage::DeviceSyncProgress(progress.clone()));
    }

    fn device_pairing_progress(&self, progress: &DevicePairingProgress) {
        self.messages
            .lock()
            .unwrap()
            .push(PushMessage::DevicePairingProgress(progress.clone()));
    }
}
