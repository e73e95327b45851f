//! `queue` crate: the hand-off boundary between the scheduler and executors.
//!
//! Ready tasks travel outbound as [`TaskMessage`]s; executor outcomes travel
//! back as [`ResultMessage`]s. Delivery is at-least-once: consumers on both
//! sides must tolerate duplicates.

pub mod error;
pub mod message;
pub mod memory;

pub use error::QueueError;
pub use message::{ResultMessage, ResultStatus, TaskMessage};
pub use memory::InMemoryQueue;

use async_trait::async_trait;

/// Transport for task and result messages.
///
/// `recv_*` waits until a message is available and fails with
/// [`QueueError::Closed`] once the transport is shut down.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Place a ready task on the outbound queue.
    async fn send_task(&self, message: &TaskMessage) -> Result<(), QueueError>;

    /// Take the next task off the outbound queue (executor side).
    async fn recv_task(&self) -> Result<TaskMessage, QueueError>;

    /// Report a task outcome on the inbound queue (executor side).
    async fn send_result(&self, message: &ResultMessage) -> Result<(), QueueError>;

    /// Take the next task outcome off the inbound queue.
    async fn recv_result(&self) -> Result<ResultMessage, QueueError>;
}
