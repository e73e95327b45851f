//! Typed error type for the db crate.

use engine::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("row not found: {0}")]
    NotFound(String),

    #[error("row already exists: {0}")]
    AlreadyExists(String),

    /// A stored value could not be turned back into a domain value.
    #[error("corrupt row: {0}")]
    Decode(String),

    #[error("unknown store kind '{0}'")]
    UnknownStoreKind(String),

    #[error("invalid store configuration: {0}")]
    InvalidConfig(String),
}

impl From<serde_json::Error> for DbError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

impl From<DbError> for StoreError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound(what)      => StoreError::NotFound(what),
            DbError::AlreadyExists(what) => StoreError::AlreadyExists(what),
            other                        => StoreError::Backend(other.to_string()),
        }
    }
}
