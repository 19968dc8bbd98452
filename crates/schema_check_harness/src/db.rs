//! Scratch Postgres databases for the pipeline tests.
//!
//! A `ScratchDb` owns one freshly created database with the workspace
//! migrations applied. Tests call `destroy` when done; the admin connection
//! is kept around so the database can be dropped after the test pool closes.

use std::str::FromStr;

use sqlx::migrate::Migrator;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use uuid::Uuid;

/// Workspace migrations, embedded at compile time.
pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub struct ScratchDb {
    name: String,
    pool: PgPool,
    admin: PgPool,
}

impl ScratchDb {
    /// Create a uniquely named database next to `admin_url` and migrate it.
    ///
    /// `admin_url` must allow CREATE/DROP DATABASE, e.g. `postgresql:///postgres`.
    pub async fn create(admin_url: &str) -> sqlx::Result<Self> {
        let options = PgConnectOptions::from_str(admin_url)?;
        let admin = PgPoolOptions::new()
            .max_connections(1)
            .connect_with(options.clone())
            .await?;

        let name = format!("schema_check_scratch_{}", Uuid::new_v4().simple());
        sqlx::query(&format!(r#"CREATE DATABASE "{name}""#))
            .execute(&admin)
            .await?;

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_with(options.database(&name))
            .await?;
        MIGRATOR.run(&pool).await?;
        tracing::debug!(database = %name, "scratch database migrated");

        Ok(Self { name, pool, admin })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Close both pools and drop the database. Errors are logged, not returned,
    /// so cleanup never masks the test's own failure.
    pub async fn destroy(self) {
        self.pool.close().await;
        let drop = format!(r#"DROP DATABASE IF EXISTS "{}" WITH (FORCE)"#, self.name);
        if let Err(e) = sqlx::query(&drop).execute(&self.admin).await {
            tracing::warn!(database = %self.name, error = %e, "scratch database not dropped");
        }
        self.admin.close().await;
    }
}
