//! Device command path: one long-lived publish connection to the broker.
//! The client queues messages and its event loop re-establishes a dropped
//! connection, so callers only see an error when the queue itself is gone.

use std::collections::BTreeMap;

use api::value::Value;
use infrastructure::{MqttSender, join_topic};

use crate::port::CommandPort;

#[derive(Clone)]
pub struct CommandService {
    sender: MqttSender,
    base_topic: String,
}

impl CommandService {
    pub fn new(sender: MqttSender, base_topic: &str) -> Self {
        Self {
            sender,
            base_topic: base_topic.trim_matches('/').to_owned(),
        }
    }

    fn set_topic(&self, device_id: &str) -> String {
        join_topic(&self.base_topic, &format!("{device_id}/set"))
    }

    fn get_topic(&self, device_id: &str) -> String {
        join_topic(&self.base_topic, &format!("{device_id}/get"))
    }

    fn permit_join_topic(&self) -> String {
        join_topic(&self.base_topic, "bridge/request/permit_join")
    }
}

impl CommandPort for CommandService {
    #[tracing::instrument(skip_all, fields(%device_id, %property))]
    async fn set_device_state(&self, device_id: &str, property: &str, value: &Value) -> anyhow::Result<()> {
        let mut payload = serde_json::Map::new();
        payload.insert(property.to_string(), value.to_json());

        self.sender
            .send(self.set_topic(device_id), serde_json::Value::Object(payload).to_string())
            .await
    }

    async fn apply_device_state(&self, device_id: &str, state: &BTreeMap<String, Value>) -> anyhow::Result<()> {
        let mut payload = serde_json::Map::new();
        for (property, value) in state {
            payload.insert(property.clone(), value.to_json());
        }

        self.sender
            .send(self.set_topic(device_id), serde_json::Value::Object(payload).to_string())
            .await
    }

    async fn request_state(&self, device_id: &str) -> anyhow::Result<()> {
        self.sender
            .send(self.get_topic(device_id), r#"{"state":""}"#.to_string())
            .await
    }

    async fn request_permit_join(&self, value: bool, time_s: u64) -> anyhow::Result<()> {
        self.sender
            .send_json(self.permit_join_topic(), &serde_json::json!({"value": value, "time": time_s}))
            .await
    }
}

/// Command spy recording every publish instead of talking to the broker.
#[cfg(test)]
pub mod testing {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub enum SentCommand {
        SetState {
            device_id: String,
            property: String,
            value: Value,
        },
        ApplyState {
            device_id: String,
            state: BTreeMap<String, Value>,
        },
        RequestState {
            device_id: String,
        },
        PermitJoin {
            value: bool,
            time_s: u64,
        },
    }

    #[derive(Default, Clone)]
    pub struct SpyCommands {
        pub sent: Arc<Mutex<Vec<SentCommand>>>,
        /// Device ids whose publishes fail.
        pub failing_devices: Arc<Mutex<Vec<String>>>,
    }

    impl SpyCommands {
        pub fn sent(&self) -> Vec<SentCommand> {
            self.sent.lock().unwrap().clone()
        }

        pub fn fail_device(&self, device_id: &str) {
            self.failing_devices.lock().unwrap().push(device_id.to_string());
        }

        fn check(&self, device_id: &str) -> anyhow::Result<()> {
            if self.failing_devices.lock().unwrap().iter().any(|d| d == device_id) {
                anyhow::bail!("publish to {device_id} failed");
            }
            Ok(())
        }
    }

    impl CommandPort for SpyCommands {
        async fn set_device_state(&self, device_id: &str, property: &str, value: &Value) -> anyhow::Result<()> {
            self.check(device_id)?;
            self.sent.lock().unwrap().push(SentCommand::SetState {
                device_id: device_id.to_string(),
                property: property.to_string(),
                value: value.clone(),
            });
            Ok(())
        }

        async fn apply_device_state(&self, device_id: &str, state: &BTreeMap<String, Value>) -> anyhow::Result<()> {
            self.check(device_id)?;
            self.sent.lock().unwrap().push(SentCommand::ApplyState {
                device_id: device_id.to_string(),
                state: state.clone(),
            });
            Ok(())
        }

        async fn request_state(&self, device_id: &str) -> anyhow::Result<()> {
            self.check(device_id)?;
            self.sent.lock().unwrap().push(SentCommand::RequestState {
                device_id: device_id.to_string(),
            });
            Ok(())
        }

        async fn request_permit_join(&self, value: bool, time_s: u64) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push(SentCommand::PermitJoin { value, time_s });
            Ok(())
        }
    }
}
