mod automation;
mod device;
mod scene;
mod signal;
mod zone;

use crate::Result;

/// Facade over the connection pool. Cheap to clone; every unit of work
/// acquires its own connection from the pool.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: sqlx::SqlitePool,
}

impl Database {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}
