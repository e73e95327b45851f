//! Postgres connection pool for the store backend.

use std::time::Duration;

use serde::Deserialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::DbError;

pub type DbPool = PgPool;

/// Connection settings of the `postgres` store kind, read from the store's
/// config block.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PoolConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// How long a store call may wait for a free connection.
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    /// Apply pending migrations right after connecting.
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

fn default_max_connections() -> u32 {
    10
}

fn default_acquire_timeout_ms() -> u64 {
    5_000
}

fn default_run_migrations() -> bool {
    true
}

impl PoolConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: default_max_connections(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            run_migrations: default_run_migrations(),
        }
    }

    /// Parse a free-form store config block.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, DbError> {
        let config: Self =
            serde_json::from_value(value.clone()).map_err(|e| DbError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DbError> {
        if self.url.trim().is_empty() {
            return Err(DbError::InvalidConfig("postgres url is empty".into()));
        }
        if self.max_connections == 0 {
            return Err(DbError::InvalidConfig("max_connections must be at least 1".into()));
        }
        Ok(())
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

/// Open a pool for `config`, migrating the schema first when asked to.
pub async fn connect(config: &PoolConfig) -> Result<DbPool, DbError> {
    config.validate()?;
    info!(max_connections = config.max_connections, "connecting to database");
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout())
        .connect(&config.url)
        .await?;
    if config.run_migrations {
        migrate(&pool).await?;
    }
    Ok(pool)
}

/// Bring the task, job, trigger and workflow tables up to date.
pub async fn migrate(pool: &DbPool) -> Result<(), DbError> {
    info!("applying schema migrations");
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}
