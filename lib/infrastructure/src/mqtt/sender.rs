use std::sync::Arc;

use rumqttc::v5::{AsyncClient, mqttbytes::QoS};

/// Cheap cloneable publish handle over the process-wide broker connection.
/// Messages are queued on the client and flushed by the event loop, which
/// also takes care of re-establishing a dropped connection.
#[derive(Clone)]
pub struct MqttSender {
    client: Arc<AsyncClient>,
}

impl MqttSender {
    pub(super) fn new(client: Arc<AsyncClient>) -> Self {
        Self { client }
    }

    /// Publish a JSON document, at-least-once.
    pub async fn send_json(&self, topic: impl Into<String>, payload: &impl serde::Serialize) -> anyhow::Result<()> {
        let payload = serde_json::to_string(payload)?;
        self.send(topic.into(), payload).await
    }

    #[tracing::instrument(skip_all, fields(topic = %topic))]
    pub async fn send(&self, topic: String, payload: String) -> anyhow::Result<()> {
        tracing::debug!("Publishing MQTT message to {}: {:?}", topic, payload);

        self.client
            .publish(topic.clone(), QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| {
                tracing::error!("Error publishing MQTT message to {}: {}", topic, e);
                e.into()
            })
    }
}

/// Join a base topic and a suffix with exactly one separator.
pub fn join_topic(base_topic: &str, topic: &str) -> String {
    let base_topic = base_topic.trim_matches('/');
    let topic = topic.trim_matches('/');

    match (base_topic.is_empty(), topic.is_empty()) {
        (true, true) => String::new(),
        (false, true) => base_topic.to_string(),
        (true, false) => topic.to_string(),
        (false, false) => format!("{base_topic}/{topic}"),
    }
}

#[cfg(test)]
mod tests {
    use super::join_topic;

    #[test]
    fn join_topic_uses_single_separator() {
        assert_eq!(join_topic("sdhome/", "/hallway_light/set"), "sdhome/hallway_light/set");
    }

    #[test]
    fn join_topic_handles_missing_separators() {
        assert_eq!(join_topic("sdhome", "hallway_light/set"), "sdhome/hallway_light/set");
    }

    #[test]
    fn join_topic_handles_empty_base() {
        assert_eq!(join_topic("", "/hallway_light/set/"), "hallway_light/set");
    }
}
