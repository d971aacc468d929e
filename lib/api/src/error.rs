pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("entity not found")]
    NotFound,
    #[error("error in database query")]
    Persistence(#[from] sqlx::Error),
    #[error("error applying database migrations")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("deserialization failed")]
    Deserialization(#[from] serde_json::Error),
    #[error("invalid identifier")]
    Id(#[from] uuid::Error),
    #[error("zone {0} would become its own ancestor")]
    ZoneCycle(i64),
}
