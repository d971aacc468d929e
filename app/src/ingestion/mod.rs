//! Ingestion worker: one persistent subscription on the broker, dispatching
//! bridge traffic to the pairing protocol and everything else to the signal
//! pipeline. Messages are handled sequentially to preserve broker order;
//! heavy automation work is queued downstream.

use std::sync::Arc;

use api::Database;
use infrastructure::{MqttInMessage, MqttSubscription};
use serde::Deserialize;

use crate::pairing::PairingService;
use crate::port::CommandPort;
use crate::signals::SignalsService;

#[derive(Debug, Deserialize, Clone)]
pub struct IngestionConfig {
    #[serde(default = "default_topic_filter")]
    pub topic_filter: String,
    #[serde(default = "default_base_topic")]
    pub base_topic: String,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            topic_filter: default_topic_filter(),
            base_topic: default_base_topic(),
        }
    }
}

fn default_topic_filter() -> String {
    "sdhome/#".to_string()
}

fn default_base_topic() -> String {
    "sdhome".to_string()
}

pub struct IngestionRunner<C: CommandPort> {
    subscription: MqttSubscription,
    signals: SignalsService,
    pairing: Arc<PairingService<C>>,
    db: Database,
    base_topic: String,
}

impl<C: CommandPort> IngestionRunner<C> {
    pub fn new(
        subscription: MqttSubscription,
        signals: SignalsService,
        pairing: Arc<PairingService<C>>,
        db: Database,
        base_topic: &str,
    ) -> Self {
        Self {
            subscription,
            signals,
            pairing,
            db,
            base_topic: base_topic.trim_matches('/').to_owned(),
        }
    }

    pub async fn run(mut self) {
        loop {
            let Some(msg) = self.subscription.recv().await else {
                continue;
            };
            self.handle(&msg).await;
        }
    }

    async fn handle(&self, msg: &MqttInMessage) {
        match route(&self.base_topic, &msg.topic) {
            Route::BridgeEvent | Route::PermitJoinResponse => {
                self.pairing.handle_bridge_message(msg).await;
            }
            Route::OtherBridge => {
                tracing::trace!(topic = %msg.topic, "Ignoring bridge topic");
            }
            Route::Availability(device_id) => {
                self.handle_availability(&device_id, &msg.payload).await;
            }
            Route::Signal => {
                self.signals.process(msg).await;
            }
        }
    }

    /// Availability payloads are `online`/`offline`, either bare or as
    /// `{"state": "..."}`.
    async fn handle_availability(&self, device_id: &str, payload: &str) {
        #[derive(Deserialize)]
        struct AvailabilityPayload {
            state: String,
        }

        let state = serde_json::from_str::<AvailabilityPayload>(payload)
            .map(|p| p.state)
            .unwrap_or_else(|_| payload.trim().trim_matches('"').to_string());

        let is_available = match state.as_str() {
            "online" => true,
            "offline" => false,
            other => {
                tracing::debug!(%device_id, "Unknown availability payload {:?}, ignoring", other);
                return;
            }
        };

        if let Err(e) = self.db.set_device_availability(device_id, is_available).await {
            tracing::error!(%device_id, "Error updating device availability: {:?}", e);
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Route {
    BridgeEvent,
    PermitJoinResponse,
    OtherBridge,
    Availability(String),
    Signal,
}

fn route(base_topic: &str, topic: &str) -> Route {
    let suffix = topic
        .strip_prefix(base_topic)
        .map(|s| s.trim_matches('/'))
        .unwrap_or(topic);

    if suffix == "bridge/event" {
        return Route::BridgeEvent;
    }
    if suffix == "bridge/response/permit_join" {
        return Route::PermitJoinResponse;
    }
    if suffix == "bridge" || suffix.starts_with("bridge/") {
        return Route::OtherBridge;
    }
    if let Some(device_id) = suffix.strip_suffix("/availability") {
        return Route::Availability(device_id.to_string());
    }

    Route::Signal
}
