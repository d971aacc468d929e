use config::{Config, ConfigError, File};
use infrastructure::{DatabaseConfig, MonitoringConfig, MqttConfig};
use serde::Deserialize;

use crate::ingestion::IngestionConfig;
use crate::state_sync::StateSyncConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub database: DatabaseConfig,
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub state_sync: StateSyncConfig,
    #[serde(default)]
    pub webhooks: WebhookConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct WebhookConfig {
    pub main: Option<String>,
    pub test: Option<String>,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let s = Config::builder().add_source(File::with_name("config.toml")).build()?;

        s.try_deserialize()
    }
}
