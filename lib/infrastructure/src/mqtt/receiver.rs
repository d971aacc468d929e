use tokio::sync::mpsc;

/// An inbound broker message with topic and payload decoded to UTF-8.
/// Binary payloads are rejected at the connection layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttInMessage {
    pub topic: String,
    pub payload: String,
}

impl TryFrom<&rumqttc::v5::mqttbytes::v5::Publish> for MqttInMessage {
    type Error = std::str::Utf8Error;

    fn try_from(publish: &rumqttc::v5::mqttbytes::v5::Publish) -> Result<Self, Self::Error> {
        Ok(MqttInMessage {
            topic: std::str::from_utf8(&publish.topic)?.to_string(),
            payload: std::str::from_utf8(&publish.payload)?.to_string(),
        })
    }
}

/// Receiving end of one topic subscription.
pub struct MqttSubscription {
    rx: mpsc::Receiver<MqttInMessage>,
}

impl MqttSubscription {
    pub(super) fn new(rx: mpsc::Receiver<MqttInMessage>) -> Self {
        Self { rx }
    }

    /// Next message, or `None` once the connection task is gone.
    pub async fn recv(&mut self) -> Option<MqttInMessage> {
        self.rx.recv().await
    }
}
