//! Wire messages exchanged with executors.
//!
//! Both message kinds are encoded as JSON on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::QueueError;

/// One dispatched task, published once per dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub namespace: String,
    pub job_id: Uuid,
    pub task_name: String,
    /// Selects the executor-side handler.
    pub task_type: String,
    /// Handler configuration, passed through untouched.
    #[serde(default)]
    pub properties: serde_json::Value,
    /// Absolute instant after which the scheduler fails the task.
    pub timeout_at: DateTime<Utc>,
}

/// Outcome reported by an executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultStatus {
    /// Acknowledgment that the executor picked the task up.
    Running,
    Successful,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMessage {
    pub namespace: String,
    pub job_id: Uuid,
    pub task_name: String,
    pub status: ResultStatus,
    #[serde(default)]
    pub status_message: Option<String>,
}

impl ResultMessage {
    pub fn new(task: &TaskMessage, status: ResultStatus, status_message: Option<String>) -> Self {
        Self {
            namespace: task.namespace.clone(),
            job_id: task.job_id,
            task_name: task.task_name.clone(),
            status,
            status_message,
        }
    }
}

pub(crate) fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, QueueError> {
    Ok(serde_json::to_vec(message)?)
}

pub(crate) fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, QueueError> {
    Ok(serde_json::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn result_status_uses_upper_case_on_the_wire() {
        let raw = json!({
            "namespace": "ns",
            "job_id": Uuid::nil(),
            "task_name": "taskOne",
            "status": "SUCCESSFUL",
        });
        let msg: ResultMessage = serde_json::from_value(raw).expect("valid message");
        assert_eq!(msg.status, ResultStatus::Successful);
        assert_eq!(msg.status_message, None);
    }

    #[test]
    fn unknown_result_status_is_rejected() {
        let bytes = br#"{"namespace":"ns","job_id":"00000000-0000-0000-0000-000000000000","task_name":"t","status":"SKIPPED"}"#;
        assert!(matches!(
            decode::<ResultMessage>(bytes),
            Err(QueueError::Serialization(_))
        ));
    }
}
