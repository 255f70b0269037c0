use std::time::Duration;

use sqlx::{postgres::PgPoolOptions, PgPool};

/// Connection-pool wrapper. Storage is optional for the pipeline; when
/// `DATABASE_URL` is unset the run stays in-memory and this is never
/// constructed.
pub struct Database {
    pub pool: PgPool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;

        let db = Self { pool };
        db.ping().await?;
        Ok(db)
    }

    /// Round-trip check used at startup so a bad URL fails the run
    /// before any batch work starts.
    pub async fn ping(&self) -> anyhow::Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
