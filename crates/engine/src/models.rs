//! Core domain models for the scheduler.
//!
//! A [`Workflow`] is a reusable template; a [`WorkflowTrigger`] binds it to a
//! schedule; every firing produces one [`Job`] owning one [`Task`] per
//! enabled workflow task.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use queue::TaskMessage;

/// Status message recorded on a task failed by the timeout supervisor.
pub const TIMED_OUT: &str = "timed out";

/// Status message recorded on tasks cancelled by a job deletion.
pub const JOB_DELETED: &str = "job deleted";

/// Status message for a task skipped because an upstream task did not succeed.
pub fn dependency_failed(ancestor: &str) -> String {
    format!("skipped: dependency '{ancestor}' did not succeed")
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkflowId {
    pub namespace: String,
    pub name: String,
}

impl WorkflowId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

fn enabled_by_default() -> bool {
    true
}

/// A single node of the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTask {
    /// Unique within the workflow; referenced by `depends_on`.
    pub name: String,
    /// Selects the executor-side handler.
    #[serde(rename = "type")]
    pub task_type: String,
    /// Disabled tasks are kept in the definition but never instantiated.
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Handler configuration passed through to the executor.
    #[serde(default)]
    pub properties: serde_json::Value,
    /// Falls back to the scheduler's default task timeout when unset.
    #[serde(default)]
    pub max_execution_time_ms: Option<u64>,
}

impl WorkflowTask {
    pub fn new(name: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            task_type: task_type.into(),
            enabled: true,
            depends_on: Vec::new(),
            properties: serde_json::Value::Null,
            max_execution_time_ms: None,
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.max_execution_time_ms = Some(timeout_ms);
        self
    }
}

/// A complete workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tasks: Vec<WorkflowTask>,
}

impl Workflow {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        tasks: Vec<WorkflowTask>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            description: None,
            tasks,
        }
    }

    pub fn id(&self) -> WorkflowId {
        WorkflowId::new(&self.namespace, &self.name)
    }

    pub fn enabled_tasks(&self) -> impl Iterator<Item = &WorkflowTask> {
        self.tasks.iter().filter(|t| t.enabled)
    }
}

// ---------------------------------------------------------------------------
// Trigger
// ---------------------------------------------------------------------------

/// When a trigger fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schedule {
    /// Recurring cron schedule (5 or 6 fields; 5-field expressions fire at second 0).
    Cron { expression: String },
    /// Fires exactly once.
    Fixed { fire_at: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkflowTriggerId {
    pub namespace: String,
    pub workflow: String,
    pub name: String,
}

impl WorkflowTriggerId {
    pub fn new(
        namespace: impl Into<String>,
        workflow: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            workflow: workflow.into(),
            name: name.into(),
        }
    }

    pub fn workflow_id(&self) -> WorkflowId {
        WorkflowId::new(&self.namespace, &self.workflow)
    }
}

impl fmt::Display for WorkflowTriggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.workflow, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowTrigger {
    pub namespace: String,
    pub workflow: String,
    pub name: String,
    /// Required; kept optional so a missing schedule is reported by validation
    /// rather than by deserialization.
    #[serde(default)]
    pub schedule: Option<Schedule>,
    #[serde(default)]
    pub start_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_at: Option<DateTime<Utc>>,
}

impl WorkflowTrigger {
    pub fn new(workflow: &WorkflowId, name: impl Into<String>, schedule: Schedule) -> Self {
        Self {
            namespace: workflow.namespace.clone(),
            workflow: workflow.name.clone(),
            name: name.into(),
            schedule: Some(schedule),
            start_at: None,
            end_at: None,
        }
    }

    pub fn id(&self) -> WorkflowTriggerId {
        WorkflowTriggerId::new(&self.namespace, &self.workflow, &self.name)
    }

    pub fn workflow_id(&self) -> WorkflowId {
        WorkflowId::new(&self.namespace, &self.workflow)
    }

    /// Whether `at` falls inside the trigger's validity window.
    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        self.start_at.map_or(true, |start| at >= start) && self.end_at.map_or(true, |end| at <= end)
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Created,
    Running,
    Successful,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Successful | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created    => write!(f, "CREATED"),
            Self::Running    => write!(f, "RUNNING"),
            Self::Successful => write!(f, "SUCCESSFUL"),
            Self::Failed     => write!(f, "FAILED"),
        }
    }
}

impl FromStr for JobStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED"    => Ok(Self::Created),
            "RUNNING"    => Ok(Self::Running),
            "SUCCESSFUL" => Ok(Self::Successful),
            "FAILED"     => Ok(Self::Failed),
            other        => Err(format!("unknown job status: {other}")),
        }
    }
}

/// One instantiation of a trigger firing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub namespace: String,
    pub workflow: String,
    pub trigger: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn workflow_id(&self) -> WorkflowId {
        WorkflowId::new(&self.namespace, &self.workflow)
    }

    pub fn trigger_id(&self) -> WorkflowTriggerId {
        WorkflowTriggerId::new(&self.namespace, &self.workflow, &self.trigger)
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Created,
    /// Blocked on at least one unfinished dependency.
    Waiting,
    /// Handed to the dispatch gateway.
    Scheduled,
    /// Acknowledged by an executor.
    Running,
    Successful,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Successful | Self::Failed | Self::Skipped)
    }

    /// Dispatched and not yet finished.
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Scheduled | Self::Running)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created    => write!(f, "CREATED"),
            Self::Waiting    => write!(f, "WAITING"),
            Self::Scheduled  => write!(f, "SCHEDULED"),
            Self::Running    => write!(f, "RUNNING"),
            Self::Successful => write!(f, "SUCCESSFUL"),
            Self::Failed     => write!(f, "FAILED"),
            Self::Skipped    => write!(f, "SKIPPED"),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED"    => Ok(Self::Created),
            "WAITING"    => Ok(Self::Waiting),
            "SCHEDULED"  => Ok(Self::Scheduled),
            "RUNNING"    => Ok(Self::Running),
            "SUCCESSFUL" => Ok(Self::Successful),
            "FAILED"     => Ok(Self::Failed),
            "SKIPPED"    => Ok(Self::Skipped),
            other        => Err(format!("unknown task status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId {
    pub namespace: String,
    pub job_id: Uuid,
    pub name: String,
}

impl TaskId {
    pub fn new(namespace: impl Into<String>, job_id: Uuid, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), job_id, name: name.into() }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.job_id, self.name)
    }
}

/// One instance of a [`WorkflowTask`] within a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub namespace: String,
    pub job_id: Uuid,
    pub name: String,
    pub workflow: String,
    pub task_type: String,
    pub properties: serde_json::Value,
    /// Names of sibling tasks in the same job.
    pub depends_on: Vec<String>,
    /// Position in the job's dependency-respecting declaration order.
    /// Tasks made ready by the same event are dispatched in this order.
    #[serde(default)]
    pub ordinal: u32,
    pub status: TaskStatus,
    pub status_message: Option<String>,
    pub timeout_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn id(&self) -> TaskId {
        TaskId::new(&self.namespace, self.job_id, &self.name)
    }

    pub fn to_message(&self) -> TaskMessage {
        TaskMessage {
            namespace: self.namespace.clone(),
            job_id: self.job_id,
            task_name: self.name.clone(),
            task_type: self.task_type.clone(),
            properties: self.properties.clone(),
            timeout_at: self.timeout_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn workflow_definition_parses_with_defaults() {
        let raw = serde_json::json!({
            "namespace": "default",
            "name": "nightly",
            "tasks": [
                { "name": "extract", "type": "shell" },
                { "name": "load", "type": "shell", "depends_on": ["extract"], "enabled": false }
            ]
        });
        let workflow: Workflow = serde_json::from_value(raw).expect("valid definition");
        assert!(workflow.tasks[0].enabled);
        assert!(!workflow.tasks[1].enabled);
        assert_eq!(workflow.enabled_tasks().count(), 1);
        assert_eq!(workflow.id().to_string(), "default/nightly");
    }

    #[test]
    fn schedule_is_tagged_by_type() {
        let raw = serde_json::json!({ "type": "cron", "expression": "0 * * * *" });
        let schedule: Schedule = serde_json::from_value(raw).unwrap();
        assert_eq!(schedule, Schedule::Cron { expression: "0 * * * *".into() });
    }

    #[test]
    fn trigger_window_bounds_are_inclusive() {
        let now = Utc::now();
        let wf = WorkflowId::new("ns", "wf");
        let mut trigger = WorkflowTrigger::new(&wf, "t", Schedule::Fixed { fire_at: now });
        trigger.start_at = Some(now);
        trigger.end_at = Some(now + Duration::minutes(1));

        assert!(trigger.is_active_at(now));
        assert!(trigger.is_active_at(now + Duration::minutes(1)));
        assert!(!trigger.is_active_at(now - Duration::seconds(1)));
        assert!(!trigger.is_active_at(now + Duration::minutes(2)));
    }

    #[test]
    fn task_status_round_trips_through_text() {
        for status in [
            TaskStatus::Created,
            TaskStatus::Waiting,
            TaskStatus::Scheduled,
            TaskStatus::Running,
            TaskStatus::Successful,
            TaskStatus::Failed,
            TaskStatus::Skipped,
        ] {
            assert_eq!(status.to_string().parse::<TaskStatus>(), Ok(status));
        }
        assert!("DONE".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn only_final_statuses_are_terminal() {
        assert!(TaskStatus::Skipped.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }
}
