//! Store registration table.
//!
//! Maps a configured store kind (`memory`, `postgres`, ...) to a factory that
//! builds the engine's [`Stores`] from a free-form JSON config block.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use engine::Stores;
use tracing::info;

use crate::pool::{connect, PoolConfig};
use crate::{DbError, PgStore};

#[async_trait]
pub trait StoreFactory: Send + Sync {
    async fn create(&self, config: &serde_json::Value) -> Result<Stores, DbError>;
}

/// In-process stores. Ignores its config.
pub struct MemoryStoreFactory;

#[async_trait]
impl StoreFactory for MemoryStoreFactory {
    async fn create(&self, _config: &serde_json::Value) -> Result<Stores, DbError> {
        Ok(Stores::in_memory())
    }
}

/// Postgres-backed stores sharing one pool.
pub struct PostgresStoreFactory;

#[async_trait]
impl StoreFactory for PostgresStoreFactory {
    async fn create(&self, config: &serde_json::Value) -> Result<Stores, DbError> {
        let pool = connect(&PoolConfig::from_value(config)?).await?;
        Ok(Stores::from_shared(Arc::new(PgStore::new(pool))))
    }
}

#[derive(Default)]
pub struct StoreRegistry {
    factories: HashMap<String, Arc<dyn StoreFactory>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in `memory` and `postgres` kinds.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("memory", Arc::new(MemoryStoreFactory));
        registry.register("postgres", Arc::new(PostgresStoreFactory));
        registry
    }

    /// Register a factory, replacing any previous one under the same kind.
    pub fn register(&mut self, kind: impl Into<String>, factory: Arc<dyn StoreFactory>) {
        self.factories.insert(kind.into(), factory);
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    pub async fn create(&self, kind: &str, config: &serde_json::Value) -> Result<Stores, DbError> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| DbError::UnknownStoreKind(kind.to_string()))?;
        info!(kind, "creating stores");
        factory.create(config).await
    }
}
