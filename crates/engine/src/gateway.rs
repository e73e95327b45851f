//! Dispatch/consume gateway between the scheduler and the task queue.
//!
//! Outbound, a task is persisted as SCHEDULED before its message is
//! enqueued, so a crash or queue outage never loses it: recovery and the
//! retry sweep find it in the store and publish it again. Inbound, results
//! are checked against the stored task and turned into [`Signal`]s; results
//! for unknown or already-finished tasks are logged and dropped.

use std::sync::Arc;

use queue::{ResultMessage, ResultStatus, TaskQueue};
use tracing::{debug, instrument, warn};

use crate::clock::Clock;
use crate::models::{Task, TaskId, TaskStatus};
use crate::store::TaskStore;
use crate::EngineError;

/// An executor outcome that passed the gateway's checks.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    /// The executor picked the task up.
    Running(TaskId),
    /// The executor finished the task.
    Terminal {
        id: TaskId,
        status: TaskStatus,
        message: Option<String>,
    },
}

pub struct DispatchGateway {
    tasks: Arc<dyn TaskStore>,
    queue: Arc<dyn TaskQueue>,
    clock: Arc<dyn Clock>,
}

impl DispatchGateway {
    pub fn new(tasks: Arc<dyn TaskStore>, queue: Arc<dyn TaskQueue>, clock: Arc<dyn Clock>) -> Self {
        Self { tasks, queue, clock }
    }

    /// Mark `task` SCHEDULED in the store, then enqueue it.
    ///
    /// On [`EngineError::Dispatch`] the task is already SCHEDULED in the
    /// store and must be published again later.
    #[instrument(skip(self, task), fields(task = %task.id()))]
    pub async fn dispatch(&self, task: &mut Task) -> Result<(), EngineError> {
        task.status = TaskStatus::Scheduled;
        task.submitted_at.get_or_insert_with(|| self.clock.now());
        self.tasks.update(task).await?;
        self.publish(task).await
    }

    /// Enqueue an already SCHEDULED task without touching the store.
    pub async fn publish(&self, task: &Task) -> Result<(), EngineError> {
        self.queue.send_task(&task.to_message()).await?;
        debug!(task = %task.id(), task_type = %task.task_type, "task dispatched");
        Ok(())
    }

    /// Wait for the next inbound result.
    pub async fn recv_result(&self) -> Result<ResultMessage, EngineError> {
        Ok(self.queue.recv_result().await?)
    }

    /// Check an inbound result against the stored task.
    ///
    /// Returns `None` for results that must be discarded: the task is
    /// unknown (never existed, or its job was deleted) or already terminal
    /// (a duplicate delivery, or a late result after a timeout).
    pub async fn accept_result(&self, result: &ResultMessage) -> Result<Option<Signal>, EngineError> {
        let id = TaskId::new(&result.namespace, result.job_id, &result.task_name);
        let Some(task) = self.tasks.load(&id).await? else {
            warn!(task = %id, status = ?result.status, "discarding result for unknown task");
            return Ok(None);
        };
        if task.status.is_terminal() {
            warn!(
                task = %id,
                current = %task.status,
                reported = ?result.status,
                "discarding late or duplicate result"
            );
            return Ok(None);
        }

        let signal = match result.status {
            ResultStatus::Running => Signal::Running(id),
            ResultStatus::Successful => Signal::Terminal {
                id,
                status: TaskStatus::Successful,
                message: result.status_message.clone(),
            },
            ResultStatus::Failed => Signal::Terminal {
                id,
                status: TaskStatus::Failed,
                message: result.status_message.clone(),
            },
        };
        Ok(Some(signal))
    }
}
