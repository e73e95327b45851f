//! Repository functions: one function per database operation.
//!
//! Every function takes a `&PgPool` and returns a `Result<T, DbError>`.
//! No business logic; rows are converted to domain types in [`crate::models`].

pub mod jobs;
pub mod tasks;
pub mod triggers;
pub mod workflows;
