//! `executor` crate: the consuming side of the task queue.
//!
//! Every task type is served by a [`TaskHandler`]. A [`Worker`] pulls task
//! messages, acknowledges them as running, runs the handler registered for
//! the task's type and reports the outcome back on the result queue.

pub mod error;
pub mod handlers;
pub mod mock;
pub mod registry;
pub mod traits;
pub mod worker;

pub use error::HandlerError;
pub use registry::HandlerRegistry;
pub use traits::TaskHandler;
pub use worker::{Worker, WorkerConfig};
