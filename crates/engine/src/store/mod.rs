//! Pluggable persistence for workflows, triggers, jobs and tasks.
//!
//! The stores are the durable record; the in-memory task provider is only a
//! cache rebuilt from them on restart. Implementations must be safe to share
//! across tasks.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    Job, JobStatus, Task, TaskId, Workflow, WorkflowId, WorkflowTrigger, WorkflowTriggerId,
};
use crate::StoreError;

pub use memory::MemoryStore;

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Insert or replace by identity.
    async fn store(&self, workflow: &Workflow) -> Result<(), StoreError>;
    async fn load(&self, id: &WorkflowId) -> Result<Option<Workflow>, StoreError>;
    async fn load_by_namespace(&self, namespace: &str) -> Result<Vec<Workflow>, StoreError>;
    /// Fails with [`StoreError::NotFound`] if absent.
    async fn delete(&self, id: &WorkflowId) -> Result<(), StoreError>;
}

#[async_trait]
pub trait TriggerStore: Send + Sync {
    /// Insert or replace by identity.
    async fn store(&self, trigger: &WorkflowTrigger) -> Result<(), StoreError>;
    async fn load(&self, id: &WorkflowTriggerId) -> Result<Option<WorkflowTrigger>, StoreError>;
    async fn load_all(&self) -> Result<Vec<WorkflowTrigger>, StoreError>;
    async fn load_by_namespace(&self, namespace: &str) -> Result<Vec<WorkflowTrigger>, StoreError>;
    async fn load_by_workflow(&self, workflow: &WorkflowId) -> Result<Vec<WorkflowTrigger>, StoreError>;
    /// Fails with [`StoreError::NotFound`] if absent.
    async fn delete(&self, id: &WorkflowTriggerId) -> Result<(), StoreError>;
}

/// Job queries return jobs ordered by `created_at`.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Fails with [`StoreError::AlreadyExists`] on a duplicate id.
    async fn store(&self, job: &Job) -> Result<(), StoreError>;
    async fn update(&self, job: &Job) -> Result<(), StoreError>;
    async fn load(&self, id: Uuid) -> Result<Option<Job>, StoreError>;
    async fn load_by_namespace(&self, namespace: &str) -> Result<Vec<Job>, StoreError>;
    /// Jobs of a workflow created within `[from, to]`.
    async fn load_by_workflow(
        &self,
        workflow: &WorkflowId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Job>, StoreError>;
    /// Jobs of a trigger created within `[from, to]`.
    async fn load_by_trigger(
        &self,
        trigger: &WorkflowTriggerId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Job>, StoreError>;
    async fn load_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<Job>, StoreError>;
    /// Removes the job and every task it owns.
    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Fails with [`StoreError::AlreadyExists`] on a duplicate id.
    async fn store(&self, task: &Task) -> Result<(), StoreError>;
    async fn update(&self, task: &Task) -> Result<(), StoreError>;
    async fn load(&self, id: &TaskId) -> Result<Option<Task>, StoreError>;
    /// Tasks of a job in declaration order (by ordinal, then name).
    async fn load_by_job(&self, job_id: Uuid) -> Result<Vec<Task>, StoreError>;
}

/// The set of stores a scheduler runs against.
#[derive(Clone)]
pub struct Stores {
    pub workflows: Arc<dyn WorkflowStore>,
    pub triggers: Arc<dyn TriggerStore>,
    pub jobs: Arc<dyn JobStore>,
    pub tasks: Arc<dyn TaskStore>,
}

impl Stores {
    /// Every store backed by a single shared [`MemoryStore`].
    pub fn in_memory() -> Self {
        Self::from_shared(Arc::new(MemoryStore::new()))
    }

    /// Use one backend that implements all four stores.
    pub fn from_shared<S>(store: Arc<S>) -> Self
    where
        S: WorkflowStore + TriggerStore + JobStore + TaskStore + 'static,
    {
        Self {
            workflows: store.clone(),
            triggers: store.clone(),
            jobs: store.clone(),
            tasks: store,
        }
    }
}
