//! Queue-level error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    /// The transport has been shut down; no more messages will flow.
    #[error("queue '{0}' is closed")]
    Closed(&'static str),

    /// A message could not be encoded or decoded.
    #[error("message serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
