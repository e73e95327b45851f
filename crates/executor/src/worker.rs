//! Worker loop: pulls task messages and reports their outcomes.

use std::sync::Arc;

use queue::{QueueError, ResultMessage, ResultStatus, TaskMessage, TaskQueue};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::HandlerRegistry;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of concurrent worker loops.
    pub workers: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

/// Consumes the task queue with the handlers of a [`HandlerRegistry`].
#[derive(Clone)]
pub struct Worker {
    queue: Arc<dyn TaskQueue>,
    handlers: Arc<HandlerRegistry>,
}

impl Worker {
    pub fn new(queue: Arc<dyn TaskQueue>, handlers: HandlerRegistry) -> Self {
        Self {
            queue,
            handlers: Arc::new(handlers),
        }
    }

    /// Start `config.workers` loops sharing the queue.
    pub fn spawn(&self, config: &WorkerConfig, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        (0..config.workers.max(1))
            .map(|n| tokio::spawn(self.clone().run(n, shutdown.clone())))
            .collect()
    }

    /// Run until shutdown is signalled or the task queue closes.
    ///
    /// A hung handler does not hold up shutdown; its task is left for the
    /// scheduler to time out.
    pub async fn run(self, worker: usize, mut shutdown: watch::Receiver<bool>) {
        info!(worker, "worker started");
        loop {
            let task = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                received = self.queue.recv_task() => match received {
                    Ok(task) => task,
                    Err(QueueError::Closed(_)) => {
                        info!(worker, "task queue closed");
                        break;
                    }
                    Err(e) => {
                        error!(worker, error = %e, "failed to receive task");
                        continue;
                    }
                },
            };

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        warn!(worker, job_id = %task.job_id, task = %task.task_name, "abandoning task on shutdown");
                        break;
                    }
                }
                result = self.process(&task) => {
                    if let Err(e) = result {
                        error!(worker, job_id = %task.job_id, task = %task.task_name, error = %e, "failed to report task outcome");
                    }
                }
            }
        }
        info!(worker, "worker stopped");
    }

    /// Acknowledge, run and report one task.
    #[instrument(skip(self, task), fields(job_id = %task.job_id, task = %task.task_name, task_type = %task.task_type))]
    pub async fn process(&self, task: &TaskMessage) -> Result<(), QueueError> {
        self.queue
            .send_result(&ResultMessage::new(task, ResultStatus::Running, None))
            .await?;

        let outcome = match self.handlers.get(&task.task_type) {
            Ok(handler) => handler.handle(task).await,
            Err(e) => Err(e),
        };

        let result = match outcome {
            Ok(()) => {
                debug!("task succeeded");
                ResultMessage::new(task, ResultStatus::Successful, None)
            }
            Err(e) => {
                warn!(error = %e, "task failed");
                ResultMessage::new(task, ResultStatus::Failed, Some(e.to_string()))
            }
        };
        self.queue.send_result(&result).await
    }
}
