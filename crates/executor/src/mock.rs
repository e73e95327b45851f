//! `MockHandler`: a test double for `TaskHandler`.
//!
//! Records every task it receives and behaves as configured at construction
//! time.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use queue::TaskMessage;

use crate::{HandlerError, TaskHandler};

#[derive(Debug, Clone)]
pub enum MockBehaviour {
    Succeed,
    Fail(String),
    /// Never returns. Used to exercise scheduler-side timeouts.
    Hang,
}

pub struct MockHandler {
    pub behaviour: MockBehaviour,
    /// Every task seen by this handler, in call order.
    pub calls: Arc<Mutex<Vec<TaskMessage>>>,
}

impl MockHandler {
    fn with(behaviour: MockBehaviour) -> Self {
        Self {
            behaviour,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn succeeding() -> Self {
        Self::with(MockBehaviour::Succeed)
    }

    pub fn failing(msg: impl Into<String>) -> Self {
        Self::with(MockBehaviour::Fail(msg.into()))
    }

    pub fn hanging() -> Self {
        Self::with(MockBehaviour::Hang)
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Names of the tasks handled so far.
    pub fn task_names(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|t| t.task_name.clone())
            .collect()
    }
}

#[async_trait]
impl TaskHandler for MockHandler {
    async fn handle(&self, task: &TaskMessage) -> Result<(), HandlerError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(task.clone());

        match &self.behaviour {
            MockBehaviour::Succeed => Ok(()),
            MockBehaviour::Fail(msg) => Err(HandlerError::Failed(msg.clone())),
            MockBehaviour::Hang => std::future::pending().await,
        }
    }
}
