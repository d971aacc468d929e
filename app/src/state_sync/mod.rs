//! State-sync worker: keeps the per-device attribute cache in the registry
//! fresh from `<base>/+` traffic and periodically asks every known device to
//! report. Queue items are drained by a single consumer; a row is written
//! only when at least one attribute actually changed.

use std::sync::Arc;

use api::Database;
use api::broadcast::{DeviceStateUpdate, DeviceSyncProgress};
use chrono::{DateTime, Utc};
use infrastructure::{MqttInMessage, MqttSubscription};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::port::{Broadcaster, CommandPort};

/// Spacing between poll publishes, to avoid radio congestion.
const POLL_PUBLISH_DELAY: std::time::Duration = std::time::Duration::from_millis(50);

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StateSyncConfig {
    /// 0 disables polling.
    #[serde(default)]
    pub poll_interval_seconds: u64,
}

/// Snapshot of one state message: the well-known attributes plus the full
/// raw object for the merge.
#[derive(Debug, Clone)]
pub struct DeviceStateQueueItem {
    pub device_id: String,
    pub link_quality: Option<i64>,
    pub state: Option<String>,
    pub brightness: Option<f64>,
    pub color_temp: Option<f64>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub battery: Option<f64>,
    pub contact: Option<bool>,
    pub occupancy: Option<bool>,
    pub raw: serde_json::Map<String, serde_json::Value>,
    pub received_at: DateTime<Utc>,
}

impl DeviceStateQueueItem {
    pub fn from_payload(device_id: &str, object: &serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            device_id: device_id.to_string(),
            link_quality: object.get("linkquality").and_then(|v| v.as_i64()),
            state: object.get("state").and_then(|v| v.as_str()).map(str::to_string),
            brightness: object.get("brightness").and_then(|v| v.as_f64()),
            color_temp: object.get("color_temp").and_then(|v| v.as_f64()),
            temperature: object.get("temperature").and_then(|v| v.as_f64()),
            humidity: object.get("humidity").and_then(|v| v.as_f64()),
            battery: object.get("battery").and_then(|v| v.as_f64()),
            contact: object.get("contact").and_then(|v| v.as_bool()),
            occupancy: object.get("occupancy").and_then(|v| v.as_bool()),
            raw: object.clone(),
            received_at: support::time::now(),
        }
    }
}

pub struct StateSyncRunner<C: CommandPort> {
    listener: StateListener,
    drainer: QueueDrainer,
    poller: StatePoller<C>,
}

impl<C: CommandPort> StateSyncRunner<C> {
    pub fn new(
        db: Database,
        broadcaster: Arc<dyn Broadcaster>,
        commands: C,
        subscription: MqttSubscription,
        base_topic: &str,
        config: &StateSyncConfig,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        Self {
            listener: StateListener {
                subscription,
                base_topic: base_topic.trim_matches('/').to_owned(),
                queue: tx,
            },
            drainer: QueueDrainer {
                db: db.clone(),
                broadcaster: broadcaster.clone(),
                queue: rx,
                drain_lock: tokio::sync::Mutex::new(()),
            },
            poller: StatePoller {
                db,
                broadcaster,
                commands,
                poll_interval_seconds: config.poll_interval_seconds,
            },
        }
    }

    pub async fn run(self) {
        tokio::join!(self.listener.run(), self.drainer.run(), self.poller.run());
    }
}

struct StateListener {
    subscription: MqttSubscription,
    base_topic: String,
    queue: mpsc::UnboundedSender<DeviceStateQueueItem>,
}

impl StateListener {
    async fn run(mut self) {
        loop {
            let Some(msg) = self.subscription.recv().await else {
                continue;
            };

            let Some(item) = parse_state_message(&self.base_topic, &msg) else {
                continue;
            };

            if self.queue.send(item).is_err() {
                tracing::error!("State-sync queue closed, stopping listener");
                return;
            }
        }
    }
}

pub(crate) fn parse_state_message(base_topic: &str, msg: &MqttInMessage) -> Option<DeviceStateQueueItem> {
    let suffix = msg.topic.strip_prefix(base_topic)?.trim_matches('/');

    if suffix.is_empty()
        || suffix.contains("/bridge/")
        || suffix == "bridge"
        || suffix.starts_with("bridge/")
        || suffix.ends_with("/availability")
        || suffix.ends_with("/get")
        || suffix.ends_with("/set")
    {
        return None;
    }

    let payload: serde_json::Value = serde_json::from_str(&msg.payload).ok()?;
    let object = payload.as_object()?;

    Some(DeviceStateQueueItem::from_payload(suffix, object))
}

struct QueueDrainer {
    db: Database,
    broadcaster: Arc<dyn Broadcaster>,
    queue: mpsc::UnboundedReceiver<DeviceStateQueueItem>,
    drain_lock: tokio::sync::Mutex<()>,
}

impl QueueDrainer {
    async fn run(mut self) {
        while let Some(item) = self.queue.recv().await {
            let _guard = self.drain_lock.lock().await;
            if let Err(e) = apply_state_item(&self.db, self.broadcaster.as_ref(), &item).await {
                tracing::error!(device_id = %item.device_id, "Error applying device state: {:?}", e);
            }
        }
    }
}

/// Merge one queue item into the device registry. Returns whether a row was
/// written.
pub(crate) async fn apply_state_item(
    db: &Database,
    broadcaster: &dyn Broadcaster,
    item: &DeviceStateQueueItem,
) -> api::Result<bool> {
    let Some(mut device) = db.get_device(&item.device_id).await? else {
        tracing::debug!(device_id = %item.device_id, "State message for unknown device, dropping");
        return Ok(false);
    };

    let changed_keys = device.merge_attributes(&item.raw);
    if changed_keys.is_empty() {
        tracing::trace!(device_id = %device.device_id, "No attribute changed, skipping write");
        return Ok(false);
    }

    db.update_device_state(
        &device.device_id,
        &device.attributes,
        &device.capabilities,
        item.link_quality,
        item.received_at,
    )
    .await?;

    let changed = changed_keys
        .into_iter()
        .filter_map(|key| device.attributes.get(&key).map(|v| (key, v.clone())))
        .collect();

    broadcaster.device_state_update(&DeviceStateUpdate {
        device_id: device.device_id.clone(),
        changed,
        link_quality: item.link_quality.or(device.link_quality),
        is_available: true,
        timestamp: item.received_at,
    });

    Ok(true)
}

struct StatePoller<C: CommandPort> {
    db: Database,
    broadcaster: Arc<dyn Broadcaster>,
    commands: C,
    poll_interval_seconds: u64,
}

impl<C: CommandPort> StatePoller<C> {
    async fn run(self) {
        if self.poll_interval_seconds == 0 {
            tracing::info!("State polling disabled");
            return std::future::pending::<()>().await;
        }

        let mut interval = tokio::time::interval(std::time::Duration::from_secs(self.poll_interval_seconds));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await; //first tick is immediate

        loop {
            interval.tick().await;
            if let Err(e) = poll_once(&self.db, &self.commands, self.broadcaster.as_ref()).await {
                tracing::error!("State poll sweep failed: {:?}", e);
            }
        }
    }
}

/// One poll sweep: ask every known device for its state, spaced out.
pub(crate) async fn poll_once<C: CommandPort>(
    db: &Database,
    commands: &C,
    broadcaster: &dyn Broadcaster,
) -> api::Result<()> {
    let devices = db.all_devices().await?;
    let total = devices.len();

    for (index, device) in devices.iter().enumerate() {
        if let Err(e) = commands.request_state(&device.device_id).await {
            tracing::warn!(device_id = %device.device_id, "State request failed: {:?}", e);
        }

        broadcaster.device_sync_progress(&DeviceSyncProgress {
            current: index + 1,
            total,
            device_id: device.device_id.clone(),
            timestamp: support::time::now(),
        });

        tokio::time::sleep(POLL_PUBLISH_DELAY).await;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use api::device::Device;
    use serde_json::json;

    use crate::broadcast::{CollectingBroadcaster, PushMessage};
    use crate::command::testing::{SentCommand, SpyCommands};

    use super::*;

    fn message(topic: &str, payload: &str) -> MqttInMessage {
        MqttInMessage {
            topic: topic.to_string(),
            payload: payload.to_string(),
        }
    }

    #[test]
    fn parses_device_state_messages_only() {
        let msg = message("sdhome/kitchen_light", r#"{"state":"ON","brightness":120,"linkquality":180}"#);
        let item = parse_state_message("sdhome", &msg).unwrap();
        assert_eq!(item.device_id, "kitchen_light");
        assert_eq!(item.state.as_deref(), Some("ON"));
        assert_eq!(item.brightness, Some(120.0));
        assert_eq!(item.link_quality, Some(180));

        assert!(parse_state_message("sdhome", &message("sdhome/bridge/event", "{}")).is_none());
        assert!(parse_state_message("sdhome", &message("sdhome/kitchen_light/set", "{}")).is_none());
        assert!(parse_state_message("sdhome", &message("sdhome/kitchen_light/get", "{}")).is_none());
        assert!(parse_state_message("sdhome", &message("sdhome/kitchen_light/availability", "online")).is_none());
        assert!(parse_state_message("sdhome", &message("sdhome/kitchen_light", "online")).is_none());
    }

    #[test]
    fn captures_well_known_attributes() {
        let msg = message(
            "sdhome/sensor",
            r#"{"temperature":21.5,"humidity":40,"battery":90,"contact":true,"occupancy":false,"color_temp":350}"#,
        );
        let item = parse_state_message("sdhome", &msg).unwrap();
        assert_eq!(item.temperature, Some(21.5));
        assert_eq!(item.humidity, Some(40.0));
        assert_eq!(item.battery, Some(90.0));
        assert_eq!(item.contact, Some(true));
        assert_eq!(item.occupancy, Some(false));
        assert_eq!(item.color_temp, Some(350.0));
        assert_eq!(item.raw.len(), 6);
    }

    #[sqlx::test(migrations = false)]
    async fn unknown_devices_are_dropped(pool: sqlx::SqlitePool) {
        let db = Database::new(pool);
        db.migrate().await.unwrap();
        let broadcaster = CollectingBroadcaster::default();

        let item = parse_state_message("sdhome", &message("sdhome/ghost", r#"{"state":"ON"}"#)).unwrap();
        let written = apply_state_item(&db, &broadcaster, &item).await.unwrap();

        assert!(!written);
        assert!(broadcaster.messages.lock().unwrap().is_empty());
    }

    #[sqlx::test(migrations = false)]
    async fn merge_persists_and_broadcasts_only_changes(pool: sqlx::SqlitePool) {
        let db = Database::new(pool);
        db.migrate().await.unwrap();
        let broadcaster = CollectingBroadcaster::default();

        db.upsert_device(&Device::new("kitchen_light")).await.unwrap();

        let item = parse_state_message(
            "sdhome",
            &message("sdhome/kitchen_light", r#"{"state":"ON","brightness":120,"linkquality":180}"#),
        )
        .unwrap();

        assert!(apply_state_item(&db, &broadcaster, &item).await.unwrap());

        let device = db.get_device("kitchen_light").await.unwrap().unwrap();
        assert_eq!(device.attributes.get("state"), Some(&json!("ON")));
        assert_eq!(device.attributes.get("brightness"), Some(&json!(120)));
        assert_eq!(device.link_quality, Some(180));
        assert!(device.is_available);
        assert!(device.last_seen.is_some());
        assert!(device.capabilities.contains("brightness"));

        // Same payload again: attribute set unchanged, nothing written.
        assert!(!apply_state_item(&db, &broadcaster, &item).await.unwrap());

        let updates = broadcaster
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| matches!(m, PushMessage::DeviceStateUpdate(_)))
            .count();
        assert_eq!(updates, 1);
    }

    #[sqlx::test(migrations = false)]
    async fn poll_sweep_requests_state_for_every_device(pool: sqlx::SqlitePool) {
        let db = Database::new(pool);
        db.migrate().await.unwrap();
        let broadcaster = CollectingBroadcaster::default();
        let commands = SpyCommands::default();

        db.upsert_device(&Device::new("a_light")).await.unwrap();
        db.upsert_device(&Device::new("b_plug")).await.unwrap();

        poll_once(&db, &commands, &broadcaster).await.unwrap();

        assert_eq!(
            commands.sent(),
            vec![
                SentCommand::RequestState {
                    device_id: "a_light".to_string()
                },
                SentCommand::RequestState {
                    device_id: "b_plug".to_string()
                },
            ]
        );

        let progress: Vec<DeviceSyncProgress> = broadcaster
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter_map(|m| match m {
                PushMessage::DeviceSyncProgress(p) => Some(p.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(progress.len(), 2);
        assert_eq!(progress[0].current, 1);
        assert_eq!(progress[1].current, 2);
        assert_eq!(progress[1].total, 2);
    }
}
