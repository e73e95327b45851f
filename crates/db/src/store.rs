//! [`PgStore`]: the engine's store traits backed by Postgres.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use engine::{
    Job, JobStatus, JobStore, StoreError, Task, TaskId, TaskStore, TriggerStore, Workflow,
    WorkflowId, WorkflowStore, WorkflowTrigger, WorkflowTriggerId,
};
use uuid::Uuid;

use crate::pool::DbPool;
use crate::repository::{jobs, tasks, triggers, workflows};

/// One pool shared by all four stores.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl WorkflowStore for PgStore {
    async fn store(&self, workflow: &Workflow) -> Result<(), StoreError> {
        Ok(workflows::upsert_workflow(&self.pool, workflow).await?)
    }

    async fn load(&self, id: &WorkflowId) -> Result<Option<Workflow>, StoreError> {
        Ok(workflows::get_workflow(&self.pool, id).await?)
    }

    async fn load_by_namespace(&self, namespace: &str) -> Result<Vec<Workflow>, StoreError> {
        Ok(workflows::list_workflows(&self.pool, namespace).await?)
    }

    async fn delete(&self, id: &WorkflowId) -> Result<(), StoreError> {
        Ok(workflows::delete_workflow(&self.pool, id).await?)
    }
}

#[async_trait]
impl TriggerStore for PgStore {
    async fn store(&self, trigger: &WorkflowTrigger) -> Result<(), StoreError> {
        Ok(triggers::upsert_trigger(&self.pool, trigger).await?)
    }

    async fn load(&self, id: &WorkflowTriggerId) -> Result<Option<WorkflowTrigger>, StoreError> {
        Ok(triggers::get_trigger(&self.pool, id).await?)
    }

    async fn load_all(&self) -> Result<Vec<WorkflowTrigger>, StoreError> {
        Ok(triggers::list_all_triggers(&self.pool).await?)
    }

    async fn load_by_namespace(&self, namespace: &str) -> Result<Vec<WorkflowTrigger>, StoreError> {
        Ok(triggers::list_triggers_by_namespace(&self.pool, namespace).await?)
    }

    async fn load_by_workflow(&self, workflow: &WorkflowId) -> Result<Vec<WorkflowTrigger>, StoreError> {
        Ok(triggers::list_triggers_by_workflow(&self.pool, workflow).await?)
    }

    async fn delete(&self, id: &WorkflowTriggerId) -> Result<(), StoreError> {
        Ok(triggers::delete_trigger(&self.pool, id).await?)
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn store(&self, job: &Job) -> Result<(), StoreError> {
        Ok(jobs::insert_job(&self.pool, job).await?)
    }

    async fn update(&self, job: &Job) -> Result<(), StoreError> {
        Ok(jobs::update_job(&self.pool, job).await?)
    }

    async fn load(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        Ok(jobs::get_job(&self.pool, id).await?)
    }

    async fn load_by_namespace(&self, namespace: &str) -> Result<Vec<Job>, StoreError> {
        Ok(jobs::list_jobs_by_namespace(&self.pool, namespace).await?)
    }

    async fn load_by_workflow(
        &self,
        workflow: &WorkflowId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Job>, StoreError> {
        Ok(jobs::list_jobs_by_workflow(&self.pool, workflow, from, to).await?)
    }

    async fn load_by_trigger(
        &self,
        trigger: &WorkflowTriggerId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Job>, StoreError> {
        Ok(jobs::list_jobs_by_trigger(&self.pool, trigger, from, to).await?)
    }

    async fn load_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<Job>, StoreError> {
        Ok(jobs::list_jobs_by_status(&self.pool, statuses).await?)
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        Ok(jobs::delete_job(&self.pool, id).await?)
    }
}

#[async_trait]
impl TaskStore for PgStore {
    async fn store(&self, task: &Task) -> Result<(), StoreError> {
        Ok(tasks::insert_task(&self.pool, task).await?)
    }

    async fn update(&self, task: &Task) -> Result<(), StoreError> {
        Ok(tasks::update_task(&self.pool, task).await?)
    }

    async fn load(&self, id: &TaskId) -> Result<Option<Task>, StoreError> {
        Ok(tasks::get_task(&self.pool, id).await?)
    }

    async fn load_by_job(&self, job_id: Uuid) -> Result<Vec<Task>, StoreError> {
        Ok(tasks::list_tasks_by_job(&self.pool, job_id).await?)
    }
}
