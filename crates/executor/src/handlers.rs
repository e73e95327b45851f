//! Built-in handlers.

use std::time::Duration;

use async_trait::async_trait;
use queue::TaskMessage;
use tracing::info;

use crate::{HandlerError, TaskHandler};

/// Logs the task and its properties, then succeeds.
pub struct EchoHandler;

#[async_trait]
impl TaskHandler for EchoHandler {
    async fn handle(&self, task: &TaskMessage) -> Result<(), HandlerError> {
        info!(
            job_id = %task.job_id,
            task = %task.task_name,
            properties = %task.properties,
            "echo"
        );
        Ok(())
    }
}

/// Sleeps for `properties.millis` milliseconds, then succeeds.
pub struct SleepHandler;

#[async_trait]
impl TaskHandler for SleepHandler {
    async fn handle(&self, task: &TaskMessage) -> Result<(), HandlerError> {
        let millis = match task.properties.get("millis") {
            None => 0,
            Some(value) => value
                .as_u64()
                .ok_or_else(|| HandlerError::Failed(format!("'millis' must be a non-negative integer, got {value}")))?,
        };
        tokio::time::sleep(Duration::from_millis(millis)).await;
        Ok(())
    }
}
