//! Engine-level error types.

use thiserror::Error;
use uuid::Uuid;

use crate::models::{WorkflowId, WorkflowTriggerId};

/// Reasons a workflow definition or trigger is rejected before scheduling.
///
/// Each variant maps to a stable [`code`](ValidationError::code) that front
/// doors can match on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("trigger '{0}' has no schedule")]
    MissingSchedule(String),

    #[error("trigger '{trigger}' has an invalid schedule: {reason}")]
    InvalidSchedule { trigger: String, reason: String },

    #[error("workflow '{0}' declares no tasks")]
    MissingTasks(String),

    #[error("task '{0}' is declared more than once")]
    DuplicateTask(String),

    #[error("task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    #[error("task '{task}' depends on disabled task '{dependency}'")]
    DisabledTaskDependency { task: String, dependency: String },

    /// Tasks along the first cycle found, closed by repeating the first name.
    #[error("cyclic dependency: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingSchedule(_)             => "missing_schedule",
            Self::InvalidSchedule { .. }         => "invalid_schedule",
            Self::MissingTasks(_)                => "missing_tasks",
            Self::DuplicateTask(_)               => "duplicate_task",
            Self::UnknownDependency { .. }       => "unknown_dependency",
            Self::DisabledTaskDependency { .. }  => "disabled_task_dependency",
            Self::CyclicDependency(_)            => "cyclic_dependency",
        }
    }
}

/// Errors surfaced by the pluggable stores.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("record already exists: {0}")]
    AlreadyExists(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Errors produced by the scheduling engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Definition rejected before scheduling; nothing was applied.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Job creation rolled back; the trigger stays scheduled.
    #[error("failed to expand job for trigger '{trigger}': {source}")]
    Expansion {
        trigger: WorkflowTriggerId,
        source: StoreError,
    },

    /// The outbound queue rejected a task; it stays SCHEDULED for the retry sweep.
    #[error("dispatch failed: {0}")]
    Dispatch(#[from] queue::QueueError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The fire-time facility refused a registration.
    #[error("schedule error: {0}")]
    Schedule(String),

    #[error("unknown workflow '{0}'")]
    UnknownWorkflow(WorkflowId),

    #[error("unknown trigger '{0}'")]
    UnknownTrigger(WorkflowTriggerId),

    #[error("unknown job '{0}'")]
    UnknownJob(Uuid),
}
