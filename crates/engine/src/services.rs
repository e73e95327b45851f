//! Front-door services over the scheduler: workflow, trigger and job
//! management as used by the HTTP API and the CLI.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use queue::TaskQueue;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::dag::validate_workflow;
use crate::models::{Job, Task, Workflow, WorkflowId, WorkflowTriggerId};
use crate::scheduler::TaskScheduler;
use crate::store::{JobStore, Stores, TaskStore, WorkflowStore};
use crate::trigger::{CronTimer, TriggerScheduler};
use crate::{EngineError, StoreError};

// ---------------------------------------------------------------------------
// Workflows
// ---------------------------------------------------------------------------

pub struct WorkflowService {
    workflows: Arc<dyn WorkflowStore>,
    triggers: Arc<TriggerScheduler>,
}

impl WorkflowService {
    pub fn new(workflows: Arc<dyn WorkflowStore>, triggers: Arc<TriggerScheduler>) -> Self {
        Self { workflows, triggers }
    }

    /// Validate and store a workflow, replacing any previous definition.
    ///
    /// Triggers already bound to the workflow pick up the new definition on
    /// their next firing.
    #[instrument(skip(self, workflow), fields(workflow = %workflow.id()))]
    pub async fn save(&self, workflow: Workflow) -> Result<(), EngineError> {
        validate_workflow(&workflow)?;
        self.workflows.store(&workflow).await?;
        info!(tasks = workflow.tasks.len(), "workflow saved");
        Ok(())
    }

    pub async fn get(&self, id: &WorkflowId) -> Result<Option<Workflow>, EngineError> {
        Ok(self.workflows.load(id).await?)
    }

    pub async fn list(&self, namespace: &str) -> Result<Vec<Workflow>, EngineError> {
        Ok(self.workflows.load_by_namespace(namespace).await?)
    }

    /// Delete a workflow and unschedule all of its triggers. Jobs already
    /// created from it run to completion.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &WorkflowId) -> Result<(), EngineError> {
        if self.workflows.load(id).await?.is_none() {
            return Err(EngineError::UnknownWorkflow(id.clone()));
        }
        let triggers = self.triggers.delete_for_workflow(id).await?;
        match self.workflows.delete(id).await {
            Ok(()) | Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        info!(triggers, "workflow deleted");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

pub struct JobService {
    jobs: Arc<dyn JobStore>,
    tasks: Arc<dyn TaskStore>,
    scheduler: Arc<TaskScheduler>,
}

impl JobService {
    pub fn new(jobs: Arc<dyn JobStore>, tasks: Arc<dyn TaskStore>, scheduler: Arc<TaskScheduler>) -> Self {
        Self { jobs, tasks, scheduler }
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Job>, EngineError> {
        Ok(self.jobs.load(id).await?)
    }

    pub async fn list_by_namespace(&self, namespace: &str) -> Result<Vec<Job>, EngineError> {
        Ok(self.jobs.load_by_namespace(namespace).await?)
    }

    pub async fn list_by_workflow(
        &self,
        workflow: &WorkflowId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Job>, EngineError> {
        Ok(self.jobs.load_by_workflow(workflow, from, to).await?)
    }

    pub async fn list_by_trigger(
        &self,
        trigger: &WorkflowTriggerId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Job>, EngineError> {
        Ok(self.jobs.load_by_trigger(trigger, from, to).await?)
    }

    /// Tasks of a job with their statuses and messages.
    pub async fn tasks(&self, id: Uuid) -> Result<Vec<Task>, EngineError> {
        if self.jobs.load(id).await?.is_none() {
            return Err(EngineError::UnknownJob(id));
        }
        Ok(self.tasks.load_by_job(id).await?)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), EngineError> {
        self.scheduler.delete_job(id).await
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// A fully wired scheduling tier.
pub struct Services {
    pub scheduler: Arc<TaskScheduler>,
    pub triggers: Arc<TriggerScheduler>,
    pub workflows: WorkflowService,
    pub jobs: JobService,
}

impl Services {
    pub fn new(
        stores: Stores,
        queue: Arc<dyn TaskQueue>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        let scheduler = Arc::new(TaskScheduler::new(
            stores.clone(),
            queue,
            Arc::clone(&clock),
            config,
        ));
        let triggers = Arc::new(TriggerScheduler::new(
            Arc::new(CronTimer::new(clock)),
            Arc::clone(&stores.workflows),
            Arc::clone(&stores.triggers),
            scheduler.clone(),
        ));
        Self {
            workflows: WorkflowService::new(Arc::clone(&stores.workflows), Arc::clone(&triggers)),
            jobs: JobService::new(stores.jobs, stores.tasks, Arc::clone(&scheduler)),
            scheduler,
            triggers,
        }
    }

    /// Recover in-flight work, reschedule stored triggers and start the
    /// background loops. Recovery runs before any trigger can fire.
    pub async fn start(&self, shutdown: watch::Receiver<bool>) -> Result<Vec<JoinHandle<()>>, EngineError> {
        self.scheduler.recover().await?;
        self.triggers.restore().await?;
        Ok(self.scheduler.spawn(shutdown))
    }
}
