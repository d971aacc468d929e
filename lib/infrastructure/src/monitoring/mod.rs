use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct MonitoringConfig {
    pub logs: EnvFilterConfig,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct EnvFilterConfig {
    pub default_level: String,
    #[serde(default)]
    pub filters: Vec<String>,
}

impl TryInto<EnvFilter> for EnvFilterConfig {
    type Error = tracing_subscriber::filter::ParseError;

    fn try_into(self) -> Result<EnvFilter, Self::Error> {
        EnvFilter::builder()
            .with_default_directive(self.default_level.parse()?)
            .parse(self.filters.join(","))
    }
}

impl MonitoringConfig {
    pub fn init(&self) -> anyhow::Result<()> {
        let filter: EnvFilter = self.logs.clone().try_into()?;
        tracing_subscriber::fmt().with_env_filter(filter).init();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_env_filter_from_settings() {
        let config = EnvFilterConfig {
            default_level: "warn".to_string(),
            filters: vec!["sdhome=debug".to_string(), "rumqttc=error".to_string()],
        };

        let filter: EnvFilter = config.try_into().expect("filter should parse");
        assert!(format!("{}", filter).contains("sdhome=debug"));
    }
}
