//! Job expansion: one trigger firing becomes a job and its tasks.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::dag::resolve_order;
use crate::models::{Job, JobStatus, Task, TaskStatus, Workflow, WorkflowTask, WorkflowTriggerId};
use crate::store::{JobStore, TaskStore};
use crate::{EngineError, StoreError};

pub struct JobExpander {
    jobs: Arc<dyn JobStore>,
    tasks: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    default_timeout: Duration,
}

impl JobExpander {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        tasks: Arc<dyn TaskStore>,
        clock: Arc<dyn Clock>,
        default_timeout: Duration,
    ) -> Self {
        Self { jobs, tasks, clock, default_timeout }
    }

    /// Create and persist a job with one CREATED task per enabled workflow
    /// task, in dependency order.
    ///
    /// Each task's deadline is `fired_at` plus its timeout. Persistence is
    /// all-or-nothing: if any task fails to store, the job is deleted again
    /// and [`EngineError::Expansion`] is returned. The same holds if the
    /// returned future is dropped before it completes; the partial job is
    /// then deleted in the background.
    #[instrument(skip(self, workflow), fields(workflow = %workflow.id()))]
    pub async fn expand(
        &self,
        workflow: &Workflow,
        trigger: &WorkflowTriggerId,
        fired_at: DateTime<Utc>,
    ) -> Result<(Job, Vec<Task>), EngineError> {
        let enabled: Vec<WorkflowTask> = workflow.enabled_tasks().cloned().collect();
        let ordered = resolve_order(&enabled)?;

        let created_at = self.clock.now();
        let job = Job {
            id: Uuid::new_v4(),
            namespace: workflow.namespace.clone(),
            workflow: workflow.name.clone(),
            trigger: trigger.name.clone(),
            status: JobStatus::Created,
            created_at,
            completed_at: None,
        };

        let tasks: Vec<Task> = ordered
            .into_iter()
            .enumerate()
            .map(|(ordinal, template)| self.instantiate(&job, template, ordinal as u32, fired_at))
            .collect();

        self.jobs.store(&job).await.map_err(|source| EngineError::Expansion {
            trigger: trigger.clone(),
            source,
        })?;

        let pending = PendingJob::new(Arc::clone(&self.jobs), job.id);
        for task in &tasks {
            if let Err(source) = self.tasks.store(task).await {
                error!(job_id = %job.id, task = %task.name, error = %source, "task persistence failed, rolling back job");
                pending.rollback().await;
                return Err(EngineError::Expansion { trigger: trigger.clone(), source });
            }
        }
        pending.commit();

        info!(job_id = %job.id, tasks = tasks.len(), "job created");
        Ok((job, tasks))
    }

    fn instantiate(&self, job: &Job, template: &WorkflowTask, ordinal: u32, fired_at: DateTime<Utc>) -> Task {
        let timeout = template
            .max_execution_time_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout);
        let timeout = chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::days(36_500));

        Task {
            namespace: job.namespace.clone(),
            job_id: job.id,
            name: template.name.clone(),
            workflow: job.workflow.clone(),
            task_type: template.task_type.clone(),
            properties: template.properties.clone(),
            depends_on: template.depends_on.clone(),
            ordinal,
            status: TaskStatus::Created,
            status_message: None,
            timeout_at: fired_at.checked_add_signed(timeout).unwrap_or(DateTime::<Utc>::MAX_UTC),
            created_at: job.created_at,
            submitted_at: None,
            completed_at: None,
        }
    }

}

/// A job whose tasks are still being persisted. Unless committed, the job
/// is deleted again, including when the expansion future is dropped.
struct PendingJob {
    jobs: Arc<dyn JobStore>,
    job_id: Uuid,
    armed: bool,
}

impl PendingJob {
    fn new(jobs: Arc<dyn JobStore>, job_id: Uuid) -> Self {
        Self { jobs, job_id, armed: true }
    }

    fn commit(mut self) {
        self.armed = false;
    }

    async fn rollback(mut self) {
        self.armed = false;
        delete_job(self.jobs.as_ref(), self.job_id).await;
    }
}

impl Drop for PendingJob {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let jobs = Arc::clone(&self.jobs);
        let job_id = self.job_id;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                warn!(%job_id, "expansion abandoned, rolling back job");
                runtime.spawn(async move { delete_job(jobs.as_ref(), job_id).await });
            }
            Err(_) => warn!(%job_id, "expansion abandoned outside a runtime, job left behind"),
        }
    }
}

async fn delete_job(jobs: &dyn JobStore, job_id: Uuid) {
    match jobs.delete(job_id).await {
        Ok(()) | Err(StoreError::NotFound(_)) => {}
        Err(e) => warn!(%job_id, error = %e, "failed to roll back partially created job"),
    }
}
