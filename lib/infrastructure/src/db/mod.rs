use std::str::FromStr as _;

use anyhow::Context as _;
use serde::Deserialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    url: String,
}

impl DatabaseConfig {
    pub async fn new_pool(&self) -> anyhow::Result<sqlx::SqlitePool> {
        let options = SqliteConnectOptions::from_str(&self.url)
            .with_context(|| format!("Invalid database url {}", self.url))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .with_context(|| format!("Error connecting to database {}", self.url))
    }
}
