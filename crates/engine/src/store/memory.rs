//! In-process store used by tests and single-node deployments.
//!
//! One [`MemoryStore`] implements all four store traits over a shared state,
//! which is what lets job deletion cascade to tasks.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{JobStore, TaskStore, TriggerStore, WorkflowStore};
use crate::models::{
    Job, JobStatus, Task, TaskId, Workflow, WorkflowId, WorkflowTrigger, WorkflowTriggerId,
};
use crate::StoreError;

#[derive(Default)]
struct State {
    workflows: BTreeMap<WorkflowId, Workflow>,
    triggers: BTreeMap<WorkflowTriggerId, WorkflowTrigger>,
    jobs: HashMap<Uuid, Job>,
    /// Tasks per job, in creation order.
    tasks: HashMap<Uuid, Vec<Task>>,
}

impl State {
    fn jobs_where(&self, pred: impl Fn(&Job) -> bool) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.values().filter(|j| pred(j)).cloned().collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn store(&self, workflow: &Workflow) -> Result<(), StoreError> {
        self.state.write().await.workflows.insert(workflow.id(), workflow.clone());
        Ok(())
    }

    async fn load(&self, id: &WorkflowId) -> Result<Option<Workflow>, StoreError> {
        Ok(self.state.read().await.workflows.get(id).cloned())
    }

    async fn load_by_namespace(&self, namespace: &str) -> Result<Vec<Workflow>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .workflows
            .values()
            .filter(|w| w.namespace == namespace)
            .cloned()
            .collect())
    }

    async fn delete(&self, id: &WorkflowId) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .workflows
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}

#[async_trait]
impl TriggerStore for MemoryStore {
    async fn store(&self, trigger: &WorkflowTrigger) -> Result<(), StoreError> {
        self.state.write().await.triggers.insert(trigger.id(), trigger.clone());
        Ok(())
    }

    async fn load(&self, id: &WorkflowTriggerId) -> Result<Option<WorkflowTrigger>, StoreError> {
        Ok(self.state.read().await.triggers.get(id).cloned())
    }

    async fn load_all(&self) -> Result<Vec<WorkflowTrigger>, StoreError> {
        Ok(self.state.read().await.triggers.values().cloned().collect())
    }

    async fn load_by_namespace(&self, namespace: &str) -> Result<Vec<WorkflowTrigger>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .triggers
            .values()
            .filter(|t| t.namespace == namespace)
            .cloned()
            .collect())
    }

    async fn load_by_workflow(&self, workflow: &WorkflowId) -> Result<Vec<WorkflowTrigger>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .triggers
            .values()
            .filter(|t| t.namespace == workflow.namespace && t.workflow == workflow.name)
            .cloned()
            .collect())
    }

    async fn delete(&self, id: &WorkflowTriggerId) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .triggers
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn store(&self, job: &Job) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.jobs.contains_key(&job.id) {
            return Err(StoreError::AlreadyExists(job.id.to_string()));
        }
        state.jobs.insert(job.id, job.clone());
        state.tasks.entry(job.id).or_default();
        Ok(())
    }

    async fn update(&self, job: &Job) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let slot = state
            .jobs
            .get_mut(&job.id)
            .ok_or_else(|| StoreError::NotFound(job.id.to_string()))?;
        *slot = job.clone();
        Ok(())
    }

    async fn load(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        Ok(self.state.read().await.jobs.get(&id).cloned())
    }

    async fn load_by_namespace(&self, namespace: &str) -> Result<Vec<Job>, StoreError> {
        Ok(self.state.read().await.jobs_where(|j| j.namespace == namespace))
    }

    async fn load_by_workflow(
        &self,
        workflow: &WorkflowId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Job>, StoreError> {
        Ok(self.state.read().await.jobs_where(|j| {
            j.namespace == workflow.namespace
                && j.workflow == workflow.name
                && j.created_at >= from
                && j.created_at <= to
        }))
    }

    async fn load_by_trigger(
        &self,
        trigger: &WorkflowTriggerId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Job>, StoreError> {
        Ok(self.state.read().await.jobs_where(|j| {
            j.trigger_id() == *trigger && j.created_at >= from && j.created_at <= to
        }))
    }

    async fn load_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<Job>, StoreError> {
        Ok(self.state.read().await.jobs_where(|j| statuses.contains(&j.status)))
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.tasks.remove(&id);
        state
            .jobs
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn store(&self, task: &Task) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if !state.jobs.contains_key(&task.job_id) {
            return Err(StoreError::NotFound(task.job_id.to_string()));
        }
        let tasks = state.tasks.entry(task.job_id).or_default();
        if tasks.iter().any(|t| t.name == task.name) {
            return Err(StoreError::AlreadyExists(task.id().to_string()));
        }
        tasks.push(task.clone());
        Ok(())
    }

    async fn update(&self, task: &Task) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let slot = state
            .tasks
            .get_mut(&task.job_id)
            .and_then(|tasks| tasks.iter_mut().find(|t| t.name == task.name))
            .ok_or_else(|| StoreError::NotFound(task.id().to_string()))?;
        *slot = task.clone();
        Ok(())
    }

    async fn load(&self, id: &TaskId) -> Result<Option<Task>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .tasks
            .get(&id.job_id)
            .and_then(|tasks| tasks.iter().find(|t| t.name == id.name && t.namespace == id.namespace))
            .cloned())
    }

    async fn load_by_job(&self, job_id: Uuid) -> Result<Vec<Task>, StoreError> {
        let mut tasks = self
            .state
            .read()
            .await
            .tasks
            .get(&job_id)
            .cloned()
            .unwrap_or_default();
        tasks.sort_by(|a, b| a.ordinal.cmp(&b.ordinal).then_with(|| a.name.cmp(&b.name)));
        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskStatus;
    use chrono::Duration;

    fn job(trigger: &str, created_at: DateTime<Utc>) -> Job {
        Job {
            id: Uuid::new_v4(),
            namespace: "default".into(),
            workflow: "wf".into(),
            trigger: trigger.into(),
            status: JobStatus::Created,
            created_at,
            completed_at: None,
        }
    }

    fn task(job: &Job, name: &str) -> Task {
        Task {
            namespace: job.namespace.clone(),
            job_id: job.id,
            name: name.into(),
            workflow: job.workflow.clone(),
            task_type: "mock".into(),
            properties: serde_json::Value::Null,
            depends_on: vec![],
            ordinal: 0,
            status: TaskStatus::Created,
            status_message: None,
            timeout_at: job.created_at,
            created_at: job.created_at,
            submitted_at: None,
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn deleting_a_job_cascades_to_its_tasks() {
        let store = MemoryStore::new();
        let j = job("t", Utc::now());
        JobStore::store(&store, &j).await.unwrap();
        TaskStore::store(&store, &task(&j, "one")).await.unwrap();
        TaskStore::store(&store, &task(&j, "two")).await.unwrap();
        assert_eq!(store.load_by_job(j.id).await.unwrap().len(), 2);

        JobStore::delete(&store, j.id).await.unwrap();
        assert!(store.load_by_job(j.id).await.unwrap().is_empty());
        assert!(matches!(
            JobStore::delete(&store, j.id).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn job_tasks_load_in_declaration_order() {
        let store = MemoryStore::new();
        let j = job("t", Utc::now());
        JobStore::store(&store, &j).await.unwrap();
        for (ordinal, name) in [(2, "alpha"), (0, "zeta"), (1, "mid")] {
            let mut t = task(&j, name);
            t.ordinal = ordinal;
            TaskStore::store(&store, &t).await.unwrap();
        }
        let names: Vec<String> = store.load_by_job(j.id).await.unwrap().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["zeta", "mid", "alpha"]);
    }

    #[tokio::test]
    async fn duplicate_task_is_rejected() {
        let store = MemoryStore::new();
        let j = job("t", Utc::now());
        JobStore::store(&store, &j).await.unwrap();
        TaskStore::store(&store, &task(&j, "one")).await.unwrap();
        assert!(matches!(
            TaskStore::store(&store, &task(&j, "one")).await,
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn trigger_range_query_filters_and_orders_by_creation() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let older = job("hourly", now - Duration::hours(2));
        let newer = job("hourly", now - Duration::hours(1));
        let other = job("daily", now - Duration::hours(1));
        for j in [&newer, &older, &other] {
            JobStore::store(&store, j).await.unwrap();
        }

        let trigger = WorkflowTriggerId::new("default", "wf", "hourly");
        let all = store
            .load_by_trigger(&trigger, now - Duration::days(1), now)
            .await
            .unwrap();
        assert_eq!(all.iter().map(|j| j.id).collect::<Vec<_>>(), vec![older.id, newer.id]);

        let recent = store
            .load_by_trigger(&trigger, now - Duration::minutes(90), now)
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);

        let by_workflow = JobStore::load_by_workflow(
            &store,
            &WorkflowId::new("default", "wf"),
            now - Duration::days(1),
            now,
        )
        .await
        .unwrap();
        assert_eq!(by_workflow.len(), 3);
    }
}
