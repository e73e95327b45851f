//! Job status aggregation.
//!
//! After every task transition the aggregator re-derives the owning job's
//! status from the stored task statuses. A job is finished once no task is
//! left non-terminal; it is FAILED if any task FAILED or was SKIPPED, and
//! SUCCESSFUL otherwise. Finishing a job persists it and broadcasts a
//! [`JobCompleted`] notification.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::Clock;
use crate::models::{Job, JobStatus, TaskStatus};
use crate::store::{JobStore, TaskStore};
use crate::StoreError;

/// Broadcast once per job when it reaches a terminal status.
#[derive(Debug, Clone, PartialEq)]
pub struct JobCompleted {
    pub job_id: Uuid,
    pub namespace: String,
    pub workflow: String,
    pub trigger: String,
    pub status: JobStatus,
}

impl From<&Job> for JobCompleted {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            namespace: job.namespace.clone(),
            workflow: job.workflow.clone(),
            trigger: job.trigger.clone(),
            status: job.status,
        }
    }
}

pub struct StatusAggregator {
    jobs: Arc<dyn JobStore>,
    tasks: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    completed: broadcast::Sender<JobCompleted>,
    /// Serializes recomputation per job so a job is finalized exactly once.
    in_progress: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl StatusAggregator {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        tasks: Arc<dyn TaskStore>,
        clock: Arc<dyn Clock>,
        capacity: usize,
    ) -> Self {
        let (completed, _) = broadcast::channel(capacity.max(1));
        Self {
            jobs,
            tasks,
            clock,
            completed,
            in_progress: DashMap::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobCompleted> {
        self.completed.subscribe()
    }

    /// Recompute the status of `job_id`.
    ///
    /// Returns the job's status after recomputation, or `None` if the job no
    /// longer exists. Safe to call any number of times, including after the
    /// job finished.
    pub async fn on_task_transition(&self, job_id: Uuid) -> Result<Option<JobStatus>, StoreError> {
        let lock = Arc::clone(self.in_progress.entry(job_id).or_default().value());
        let _guard = lock.lock().await;

        let Some(mut job) = self.jobs.load(job_id).await? else {
            debug!(%job_id, "job no longer exists");
            self.in_progress.remove(&job_id);
            return Ok(None);
        };
        if job.status.is_terminal() {
            self.in_progress.remove(&job_id);
            return Ok(Some(job.status));
        }

        let tasks = self.tasks.load_by_job(job_id).await?;
        if tasks.iter().any(|t| !t.status.is_terminal()) {
            let started = tasks
                .iter()
                .any(|t| !matches!(t.status, TaskStatus::Created | TaskStatus::Waiting));
            if job.status == JobStatus::Created && started {
                job.status = JobStatus::Running;
                self.jobs.update(&job).await?;
                debug!(%job_id, "job running");
            }
            return Ok(Some(job.status));
        }

        let failed = tasks
            .iter()
            .any(|t| matches!(t.status, TaskStatus::Failed | TaskStatus::Skipped));
        job.status = if failed { JobStatus::Failed } else { JobStatus::Successful };
        job.completed_at = Some(self.clock.now());
        self.jobs.update(&job).await?;
        self.in_progress.remove(&job_id);

        info!(
            %job_id,
            workflow = %job.workflow_id(),
            trigger = %job.trigger,
            status = %job.status,
            "job finished"
        );
        // No subscribers is fine.
        let _ = self.completed.send(JobCompleted::from(&job));
        Ok(Some(job.status))
    }
}
