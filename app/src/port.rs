//! Ports to the outside: the broadcaster pushes to the UI layer (one-way,
//! fire-and-forget), the command port publishes device commands. The
//! broadcaster must never call back into the engine.

use api::broadcast::{
    AutomationLogEntry, DevicePairingProgress, DeviceStateUpdate, DeviceSyncProgress, PipelineTimeline,
};
use api::reading::SensorReading;
use api::signal::SignalEvent;
use api::trigger_event::TriggerEvent;
use api::value::Value;

pub trait Broadcaster: Send + Sync {
    fn signal_event(&self, event: &SignalEvent);
    fn sensor_reading(&self, reading: &SensorReading);
    fn trigger_event(&self, event: &TriggerEvent);
    fn device_state_update(&self, update: &DeviceStateUpdate);
    fn automation_log(&self, entry: &AutomationLogEntry);
    fn pipeline_timeline(&self, timeline: &PipelineTimeline);
    fn device_sync_progress(&self, progress: &DeviceSyncProgress);
    fn device_pairing_progress(&self, progress: &DevicePairingProgress);
}

/// Outbound command path to devices via the broker.
pub trait CommandPort: Send + Sync + 'static {
    /// Publish `{property: value}` to the device's set topic.
    fn set_device_state(
        &self,
        device_id: &str,
        property: &str,
        value: &Value,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Publish a combined `{property: value, …}` payload to the set topic.
    fn apply_device_state(
        &self,
        device_id: &str,
        state: &std::collections::BTreeMap<String, Value>,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Ask the device to report its state (`{"state": ""}` to the get topic).
    fn request_state(&self, device_id: &str) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Open or close the pairing window on the bridge.
    fn request_permit_join(&self, value: bool, time_s: u64) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Broadcaster that drops everything. Used when no UI layer is attached.
pub struct NoopBroadcaster;

impl Broadcaster for NoopBroadcaster {
    fn signal_event(&self, _: &SignalEvent) {}
    fn sensor_reading(&self, _: &SensorReading) {}
    fn trigger_event(&self, _: &TriggerEvent) {}
    fn device_state_update(&self, _: &DeviceStateUpdate) {}
    fn automation_log(&self, _: &AutomationLogEntry) {}
    fn pipeline_timeline(&self, _: &PipelineTimeline) {}
    fn device_sync_progress(&self, _: &DeviceSyncProgress) {}
    fn device_pairing_progress(&self, _: &DevicePairingProgress) {}
}
