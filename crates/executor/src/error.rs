//! Handler-level error type.

use thiserror::Error;

/// Errors returned by a handler's `handle` method. Either one is reported to
/// the scheduler as a FAILED task with the error text as status message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("task failed: {0}")]
    Failed(String),

    #[error("no handler registered for task type '{0}'")]
    UnknownHandler(String),
}
