//! `db` crate: Postgres persistence for the scheduler's stores.
//!
//! Provides a connection pool, typed row structs, one repository module per
//! table, [`PgStore`] implementing the engine's store traits on top of them,
//! and the [`StoreRegistry`] that resolves a configured store kind to a
//! backend at start-up.

pub mod error;
pub mod models;
pub mod pool;
pub mod registry;
pub mod repository;
pub mod store;

pub use error::DbError;
pub use pool::{DbPool, PoolConfig};
pub use registry::{StoreFactory, StoreRegistry};
pub use store::PgStore;
