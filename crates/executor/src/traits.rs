//! The `TaskHandler` trait: the contract every task type implements.

use async_trait::async_trait;
use queue::TaskMessage;

use crate::HandlerError;

/// Runs one dispatched task.
///
/// `Ok(())` is reported as SUCCESSFUL, any error as FAILED. Handlers must
/// tolerate being invoked more than once for the same task since delivery is
/// at-least-once.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &TaskMessage) -> Result<(), HandlerError>;
}
