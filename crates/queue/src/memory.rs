//! In-process transport backed by tokio channels.
//!
//! Messages are JSON-encoded before they enter the channel so that the
//! in-process path exercises the same serialization as a networked broker.
//! Receivers are shared behind a mutex so several workers can pull from the
//! same queue.

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::message::{decode, encode};
use crate::{QueueError, ResultMessage, TaskMessage, TaskQueue};

struct Channel {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    name: &'static str,
}

impl Channel {
    fn new(name: &'static str) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx: Mutex::new(rx), name }
    }

    fn send(&self, bytes: Vec<u8>) -> Result<(), QueueError> {
        self.tx.send(bytes).map_err(|_| QueueError::Closed(self.name))
    }

    async fn recv(&self) -> Result<Vec<u8>, QueueError> {
        self.rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(QueueError::Closed(self.name))
    }

    async fn try_recv(&self) -> Option<Vec<u8>> {
        self.rx.lock().await.try_recv().ok()
    }

    async fn close(&self) {
        self.rx.lock().await.close();
    }
}

/// Unbounded in-process task and result queues.
pub struct InMemoryQueue {
    tasks: Channel,
    results: Channel,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self {
            tasks: Channel::new("tasks"),
            results: Channel::new("results"),
        }
    }

    /// Take a queued task without waiting, if one is available.
    pub async fn try_recv_task(&self) -> Result<Option<TaskMessage>, QueueError> {
        match self.tasks.try_recv().await {
            Some(bytes) => decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Drain every task currently queued.
    pub async fn drain_tasks(&self) -> Result<Vec<TaskMessage>, QueueError> {
        let mut drained = Vec::new();
        while let Some(task) = self.try_recv_task().await? {
            drained.push(task);
        }
        Ok(drained)
    }

    /// Stop accepting messages. Messages already queued can still be received.
    pub async fn close(&self) {
        self.tasks.close().await;
        self.results.close().await;
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskQueue for InMemoryQueue {
    async fn send_task(&self, message: &TaskMessage) -> Result<(), QueueError> {
        debug!(job_id = %message.job_id, task = %message.task_name, "enqueue task");
        self.tasks.send(encode(message)?)
    }

    async fn recv_task(&self) -> Result<TaskMessage, QueueError> {
        decode(&self.tasks.recv().await?)
    }

    async fn send_result(&self, message: &ResultMessage) -> Result<(), QueueError> {
        debug!(
            job_id = %message.job_id,
            task = %message.task_name,
            status = ?message.status,
            "enqueue result"
        );
        self.results.send(encode(message)?)
    }

    async fn recv_result(&self) -> Result<ResultMessage, QueueError> {
        decode(&self.results.recv().await?)
    }
}
