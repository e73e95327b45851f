//! Row structs that map 1-to-1 onto database tables.
//!
//! These are *persistence* models. Conversions to and from the engine's
//! domain types live here so the repositories stay pure SQL.

use chrono::{DateTime, Utc};
use engine::{Job, Task, Workflow, WorkflowTrigger};
use sqlx::FromRow;
use uuid::Uuid;

use crate::DbError;

// ---------------------------------------------------------------------------
// workflows
// ---------------------------------------------------------------------------

/// A persisted workflow definition row.
#[derive(Debug, Clone, FromRow)]
pub struct WorkflowRow {
    pub namespace: String,
    pub name: String,
    /// Full JSON workflow definition (description, tasks, …)
    pub definition: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<WorkflowRow> for Workflow {
    type Error = DbError;
    fn try_from(row: WorkflowRow) -> Result<Self, Self::Error> {
        let mut workflow: Workflow = serde_json::from_value(row.definition)?;
        workflow.namespace = row.namespace;
        workflow.name = row.name;
        Ok(workflow)
    }
}

// ---------------------------------------------------------------------------
// workflow_triggers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, FromRow)]
pub struct TriggerRow {
    pub namespace: String,
    pub workflow: String,
    pub name: String,
    pub schedule: Option<serde_json::Value>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
}

impl TryFrom<TriggerRow> for WorkflowTrigger {
    type Error = DbError;
    fn try_from(row: TriggerRow) -> Result<Self, Self::Error> {
        Ok(Self {
            namespace: row.namespace,
            workflow: row.workflow,
            name: row.name,
            schedule: row.schedule.map(serde_json::from_value).transpose()?,
            start_at: row.start_at,
            end_at: row.end_at,
        })
    }
}

// ---------------------------------------------------------------------------
// jobs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub id: Uuid,
    pub namespace: String,
    pub workflow: String,
    pub trigger: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for Job {
    type Error = DbError;
    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            namespace: row.namespace,
            workflow: row.workflow,
            trigger: row.trigger,
            status: row.status.parse().map_err(DbError::Decode)?,
            created_at: row.created_at,
            completed_at: row.completed_at,
        })
    }
}

// ---------------------------------------------------------------------------
// tasks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, FromRow)]
pub struct TaskRow {
    pub job_id: Uuid,
    pub name: String,
    pub namespace: String,
    pub workflow: String,
    pub task_type: String,
    pub properties: serde_json::Value,
    pub depends_on: Vec<String>,
    pub ordinal: i32,
    pub status: String,
    pub status_message: Option<String>,
    pub timeout_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<TaskRow> for Task {
    type Error = DbError;
    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        Ok(Self {
            namespace: row.namespace,
            job_id: row.job_id,
            name: row.name,
            workflow: row.workflow,
            task_type: row.task_type,
            properties: row.properties,
            depends_on: row.depends_on,
            ordinal: u32::try_from(row.ordinal)
                .map_err(|_| DbError::Decode(format!("negative task ordinal {}", row.ordinal)))?,
            status: row.status.parse().map_err(DbError::Decode)?,
            status_message: row.status_message,
            timeout_at: row.timeout_at,
            created_at: row.created_at,
            submitted_at: row.submitted_at,
            completed_at: row.completed_at,
        })
    }
}
