mod client;
mod receiver;
mod sender;

pub use client::Mqtt;
pub use receiver::{MqttInMessage, MqttSubscription};
pub use sender::{MqttSender, join_topic};

use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct MqttConfig {
    pub enabled: bool,
    host: String,
    port: u16,
    client_id: String,
}

impl MqttConfig {
    /// Connect a new client. The client identifier is suffixed with a random
    /// token so it is unique per process lifetime.
    pub fn new_client(&self) -> Mqtt {
        let client_id = format!("{}-{}", self.client_id, uuid::Uuid::new_v4().simple());
        Mqtt::connect(&self.host, self.port, &client_id)
    }
}
