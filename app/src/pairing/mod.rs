//! Pairing sub-protocol: translates bridge lifecycle events into a
//! user-observable state machine, broadcast as progress snapshots.
//! Parse errors in bridge events are logged and discarded.

use std::sync::{Arc, Mutex};

use api::Database;
use api::broadcast::{DevicePairingProgress, DiscoveredDevice, DiscoveredDeviceStatus, PairingStatus};
use api::device::Device;
use infrastructure::MqttInMessage;
use serde::Deserialize;
use uuid::Uuid;

use crate::port::{Broadcaster, CommandPort};

#[derive(Debug, Clone)]
struct PairingWindow {
    id: Uuid,
    status: PairingStatus,
    total_seconds: u64,
    remaining_seconds: u64,
    current_device: Option<DiscoveredDevice>,
    discovered: Vec<DiscoveredDevice>,
}

impl PairingWindow {
    fn new(duration_seconds: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: PairingStatus::Starting,
            total_seconds: duration_seconds,
            remaining_seconds: duration_seconds,
            current_device: None,
            discovered: Vec::new(),
        }
    }
}

/// State shared with the countdown task.
struct PairingShared {
    broadcaster: Arc<dyn Broadcaster>,
    window: Mutex<Option<PairingWindow>>,
}

pub struct PairingService<C: CommandPort> {
    db: Database,
    commands: C,
    shared: Arc<PairingShared>,
}

#[derive(Debug, Deserialize)]
struct BridgeEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct DeviceEventData {
    #[serde(default)]
    friendly_name: Option<String>,
    ieee_address: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    definition: Option<DeviceDefinition>,
}

#[derive(Debug, Deserialize)]
struct DeviceDefinition {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    vendor: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PermitJoinResponse {
    data: PermitJoinData,
}

#[derive(Debug, Deserialize)]
struct PermitJoinData {
    value: bool,
    #[serde(default)]
    time: u64,
}

impl<C: CommandPort> PairingService<C> {
    pub fn new(db: Database, commands: C, broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self {
            db,
            commands,
            shared: Arc::new(PairingShared {
                broadcaster,
                window: Mutex::new(None),
            }),
        }
    }

    /// Operator entry point: ask the bridge to open the pairing window.
    /// The window becomes `Active` once the bridge confirms.
    pub async fn start_pairing(&self, duration_seconds: u64) -> anyhow::Result<()> {
        *self.shared.window.lock().unwrap() = Some(PairingWindow::new(duration_seconds));
        self.shared.emit("Pairing requested");

        self.commands.request_permit_join(true, duration_seconds).await
    }

    pub async fn stop_pairing(&self) -> anyhow::Result<()> {
        self.shared.update(|window| {
            window.status = PairingStatus::Stopping;
        });
        self.shared.emit("Stopping pairing");

        self.commands.request_permit_join(false, 0).await
    }

    pub async fn handle_bridge_message(&self, msg: &MqttInMessage) {
        if msg.topic.ends_with("/bridge/response/permit_join") {
            match serde_json::from_str::<PermitJoinResponse>(&msg.payload) {
                Ok(response) => self.handle_permit_join(response.data),
                Err(e) => tracing::debug!("Discarding malformed permit_join response: {}", e),
            }
            return;
        }

        match serde_json::from_str::<BridgeEvent>(&msg.payload) {
            Ok(event) => self.handle_bridge_event(event).await,
            Err(e) => tracing::debug!(topic = %msg.topic, "Discarding malformed bridge event: {}", e),
        }
    }

    fn handle_permit_join(&self, data: PermitJoinData) {
        if data.value {
            let window_id = {
                let mut window = self.shared.window.lock().unwrap();
                let window = window.get_or_insert_with(|| PairingWindow::new(data.time));
                window.status = PairingStatus::Active;
                if data.time > 0 {
                    window.total_seconds = data.time;
                    window.remaining_seconds = data.time;
                }
                window.id
            };

            self.shared.emit("Pairing active");
            spawn_countdown(Arc::clone(&self.shared), window_id);
        } else {
            self.shared.update(|window| {
                window.status = PairingStatus::Ended;
                window.remaining_seconds = 0;
            });
            self.shared.emit("Pairing ended");
            self.shared.window.lock().unwrap().take();
        }
    }

    async fn handle_bridge_event(&self, event: BridgeEvent) {
        match event.kind.as_str() {
            "device_joined" => {
                let Some(data) = parse_device_data(&event.data) else {
                    return;
                };

                self.shared.update(|window| {
                    let device = DiscoveredDevice {
                        ieee_address: data.ieee_address.clone(),
                        friendly_name: data.friendly_name.clone(),
                        model_id: None,
                        status: DiscoveredDeviceStatus::Joined,
                    };
                    window.status = PairingStatus::Interviewing;
                    upsert_discovered(&mut window.discovered, device.clone());
                    window.current_device = Some(device);
                });
                self.shared.emit("Device joined, starting interview");
            }

            "device_interview" => {
                let Some(data) = parse_device_data(&event.data) else {
                    return;
                };
                self.handle_interview(data).await;
            }

            "device_announce" => {
                tracing::debug!("Device announce: {:?}", event.data);
            }

            other => {
                tracing::debug!("Ignoring bridge event type {:?}", other);
            }
        }
    }

    async fn handle_interview(&self, data: DeviceEventData) {
        match data.status.as_deref() {
            Some("started") => {
                self.shared.update(|window| {
                    let device = DiscoveredDevice {
                        ieee_address: data.ieee_address.clone(),
                        friendly_name: data.friendly_name.clone(),
                        model_id: None,
                        status: DiscoveredDeviceStatus::Interviewing,
                    };
                    window.status = PairingStatus::Interviewing;
                    upsert_discovered(&mut window.discovered, device.clone());
                    window.current_device = Some(device);
                });
                self.shared.emit("Interviewing device");
            }
            Some("successful") => {
                let model_id = data.definition.as_ref().and_then(|d| d.model.clone());
                self.shared.update(|window| {
                    let device = DiscoveredDevice {
                        ieee_address: data.ieee_address.clone(),
                        friendly_name: data.friendly_name.clone(),
                        model_id: model_id.clone(),
                        status: DiscoveredDeviceStatus::Ready,
                    };
                    window.status = PairingStatus::DevicePaired;
                    upsert_discovered(&mut window.discovered, device.clone());
                    window.current_device = Some(device);
                });
                self.shared.emit("Device paired");

                self.register_device(&data).await;

                // Back to waiting for further devices.
                self.shared.update(|window| window.status = PairingStatus::Active);
            }
            Some("failed") => {
                self.shared.update(|window| {
                    let device = DiscoveredDevice {
                        ieee_address: data.ieee_address.clone(),
                        friendly_name: data.friendly_name.clone(),
                        model_id: None,
                        status: DiscoveredDeviceStatus::Failed,
                    };
                    window.status = PairingStatus::Active;
                    upsert_discovered(&mut window.discovered, device.clone());
                    window.current_device = Some(device);
                });
                self.shared.emit("Device interview failed");
            }
            other => {
                tracing::debug!("Ignoring device_interview with status {:?}", other);
            }
        }
    }

    /// Newly interviewed devices enter the registry immediately.
    async fn register_device(&self, data: &DeviceEventData) {
        let mut device = Device::new(data.friendly_name.clone().unwrap_or_else(|| data.ieee_address.clone()));
        device.ieee_address = Some(data.ieee_address.clone());
        device.is_available = true;
        device.last_seen = Some(support::time::now());

        if let Some(definition) = &data.definition {
            device.model_id = definition.model.clone();
            device.manufacturer = definition.vendor.clone();
            device.description = definition.description.clone();
        }

        if let Err(e) = self.db.upsert_device(&device).await {
            tracing::error!(device_id = %device.device_id, "Error registering paired device: {:?}", e);
        }
    }
}

impl PairingShared {
    fn update(&self, f: impl FnOnce(&mut PairingWindow)) {
        let mut window = self.window.lock().unwrap();
        if let Some(window) = window.as_mut() {
            f(window);
        }
    }

    fn emit(&self, message: &str) {
        let snapshot = {
            let window = self.window.lock().unwrap();
            let Some(window) = window.as_ref() else {
                return;
            };

            DevicePairingProgress {
                id: window.id,
                status: window.status,
                message: message.to_string(),
                remaining_seconds: window.remaining_seconds,
                total_seconds: window.total_seconds,
                current_device: window.current_device.clone(),
                discovered: window.discovered.clone(),
                timestamp: support::time::now(),
            }
        };

        self.broadcaster.device_pairing_progress(&snapshot);
    }
}

/// Ticks the active window once a second until it elapses or is replaced.
fn spawn_countdown(shared: Arc<PairingShared>, window_id: Uuid) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(1));
        ticker.tick().await; //immediate first tick

        loop {
            ticker.tick().await;

            let finished = {
                let mut window = shared.window.lock().unwrap();
                match window.as_mut() {
                    // The window was replaced or closed; stop ticking.
                    Some(w) if w.id != window_id => return,
                    None => return,
                    Some(w) => {
                        w.remaining_seconds = w.remaining_seconds.saturating_sub(1);
                        if w.remaining_seconds == 0 {
                            w.status = PairingStatus::Ended;
                            true
                        } else {
                            if w.status == PairingStatus::Active {
                                w.status = PairingStatus::CountdownTick;
                            }
                            false
                        }
                    }
                }
            };

            if finished {
                shared.emit("Pairing window elapsed");
                shared.window.lock().unwrap().take();
                return;
            }

            shared.emit("Pairing window open");

            // Restore the steady state after the tick snapshot.
            shared.update(|w| {
                if w.status == PairingStatus::CountdownTick {
                    w.status = PairingStatus::Active;
                }
            });
        }
    });
}

fn parse_device_data(data: &serde_json::Value) -> Option<DeviceEventData> {
    match serde_json::from_value(data.clone()) {
        Ok(data) => Some(data),
        Err(e) => {
            tracing::debug!("Discarding bridge event with unexpected data shape: {}", e);
            None
        }
    }
}

/// Discovered devices accumulate for the duration, keyed by ieee address.
fn upsert_discovered(discovered: &mut Vec<DiscoveredDevice>, device: DiscoveredDevice) {
    match discovered.iter_mut().find(|d| d.ieee_address == device.ieee_address) {
        Some(existing) => *existing = device,
        None => discovered.push(device),
    }
}
