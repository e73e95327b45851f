//! The task scheduler: wires expansion, readiness tracking, dispatch,
//! timeout supervision and status aggregation together.
//!
//! Terminal signals arrive from two independent sources (executor results
//! and expired deadlines). Both go through [`TaskScheduler::complete_task`],
//! which serializes per job and relies on the provider's compare-and-set
//! transition, so whichever signal comes first wins and the other is a
//! logged no-op.
//!
//! A transition is persisted before the provider commits it, so a failed
//! write leaves both sides unchanged and the signal can be applied again.
//! Follow-up writes (dependents, dispatch, job status) that fail mark the
//! job dirty; the retry sweep rebuilds a dirty job's tracking from the store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use queue::{QueueError, TaskQueue};
use tokio::sync::{broadcast, watch, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::aggregator::{JobCompleted, StatusAggregator};
use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::expander::JobExpander;
use crate::gateway::{DispatchGateway, Signal};
use crate::models::{
    Job, JobStatus, Task, TaskId, TaskStatus, Workflow, WorkflowTrigger, WorkflowTriggerId,
    JOB_DELETED, TIMED_OUT,
};
use crate::provider::{Advance, TaskProvider};
use crate::store::Stores;
use crate::supervisor::TimeoutSupervisor;
use crate::trigger::FireHandler;
use crate::EngineError;

pub struct TaskScheduler {
    config: SchedulerConfig,
    stores: Stores,
    clock: Arc<dyn Clock>,
    provider: TaskProvider,
    supervisor: TimeoutSupervisor,
    aggregator: StatusAggregator,
    expander: JobExpander,
    gateway: DispatchGateway,
    /// SCHEDULED tasks whose message never reached the queue.
    undelivered: DashSet<TaskId>,
    /// Jobs whose stored state may lag the provider after a failed write.
    dirty_jobs: DashSet<Uuid>,
    job_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

/// Exclusive access to one job. Dropping it releases the lock entry once
/// nothing else holds or tracks the job.
struct JobGuard<'a> {
    scheduler: &'a TaskScheduler,
    job_id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for JobGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.scheduler.release_lock(self.job_id);
    }
}

impl TaskScheduler {
    pub fn new(
        stores: Stores,
        queue: Arc<dyn TaskQueue>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        let aggregator = StatusAggregator::new(
            Arc::clone(&stores.jobs),
            Arc::clone(&stores.tasks),
            Arc::clone(&clock),
            config.completion_channel_capacity,
        );
        let expander = JobExpander::new(
            Arc::clone(&stores.jobs),
            Arc::clone(&stores.tasks),
            Arc::clone(&clock),
            config.default_task_timeout(),
        );
        let gateway = DispatchGateway::new(Arc::clone(&stores.tasks), queue, Arc::clone(&clock));
        Self {
            supervisor: TimeoutSupervisor::new(Arc::clone(&clock)),
            provider: TaskProvider::new(),
            undelivered: DashSet::new(),
            dirty_jobs: DashSet::new(),
            job_locks: DashMap::new(),
            aggregator,
            expander,
            gateway,
            config,
            stores,
            clock,
        }
    }

    /// Receive a notification for every job that reaches a terminal status.
    pub fn subscribe(&self) -> broadcast::Receiver<JobCompleted> {
        self.aggregator.subscribe()
    }

    pub fn provider(&self) -> &TaskProvider {
        &self.provider
    }

    pub fn supervisor(&self) -> &TimeoutSupervisor {
        &self.supervisor
    }

    /// Number of SCHEDULED tasks waiting to be re-published.
    pub fn undelivered(&self) -> usize {
        self.undelivered.len()
    }

    /// Number of jobs waiting for the retry sweep to resync them.
    pub fn dirty_jobs(&self) -> usize {
        self.dirty_jobs.len()
    }

    /// Number of per-job lock entries currently allocated.
    pub fn tracked_locks(&self) -> usize {
        self.job_locks.len()
    }

    async fn lock_job(&self, job_id: Uuid) -> JobGuard<'_> {
        let lock = Arc::clone(self.job_locks.entry(job_id).or_default().value());
        JobGuard { scheduler: self, job_id, guard: Some(lock.lock_owned().await) }
    }

    fn release_lock(&self, job_id: Uuid) {
        if self.provider.contains_job(job_id) || self.dirty_jobs.contains(&job_id) {
            return;
        }
        self.job_locks.remove_if(&job_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    // -----------------------------------------------------------------------
    // Job lifecycle
    // -----------------------------------------------------------------------

    /// Expand a trigger firing into a job and dispatch its ready tasks.
    ///
    /// Once the job is persisted it is returned even if dispatching its
    /// first tasks failed; the retry sweep finishes that part.
    #[instrument(skip(self, workflow), fields(workflow = %workflow.id()))]
    pub async fn execute(
        &self,
        workflow: &Workflow,
        trigger: &WorkflowTriggerId,
        fired_at: DateTime<Utc>,
    ) -> Result<Job, EngineError> {
        let (job, tasks) = self.expander.expand(workflow, trigger, fired_at).await?;

        let _job = self.lock_job(job.id).await;
        let advance = self.provider.register(job.id, tasks, self.clock.now());
        self.settle(job.id, advance).await;
        Ok(job)
    }

    /// Record a terminal outcome for a task and propagate it.
    ///
    /// Returns `false` when the outcome was discarded because the task is
    /// unknown, already terminal, or was never dispatched. If the terminal
    /// status cannot be persisted nothing changes and the error is returned,
    /// so a redelivered result or the task's timeout can try again.
    #[instrument(skip(self, message))]
    pub async fn complete_task(
        &self,
        id: &TaskId,
        status: TaskStatus,
        message: Option<String>,
    ) -> Result<bool, EngineError> {
        let _job = self.lock_job(id.job_id).await;

        let current = match self.provider.task(id) {
            Some(task) if task.status.is_in_flight() => task,
            _ => {
                warn!(task = %id, %status, "duplicate or late signal discarded");
                return Ok(false);
            }
        };

        let now = self.clock.now();
        let mut finished = current;
        finished.status = status;
        finished.status_message = message.clone();
        finished.completed_at = Some(now);
        if let Err(e) = self.stores.tasks.update(&finished).await {
            error!(task = %id, %status, error = %e, "failed to persist task outcome");
            if !self.supervisor.is_watched(id) {
                // The expired deadline consumed the watch; the resync re-arms it.
                self.dirty_jobs.insert(id.job_id);
            }
            return Err(e.into());
        }

        let Some(mut advance) = self.provider.on_task_terminal(id, status, message, now) else {
            return Ok(false);
        };
        advance.updated.retain(|t| t.name != id.name);
        self.supervisor.unwatch(id);
        self.undelivered.remove(id);
        self.settle(id.job_id, advance).await;
        Ok(true)
    }

    /// Record the executor's acknowledgment that it started a task.
    pub async fn mark_running(&self, id: &TaskId) -> Result<bool, EngineError> {
        let _job = self.lock_job(id.job_id).await;

        let mut running = match self.provider.task(id) {
            Some(task) if task.status == TaskStatus::Scheduled => task,
            _ => {
                debug!(task = %id, "running acknowledgment ignored");
                return Ok(false);
            }
        };
        let now = self.clock.now();
        running.status = TaskStatus::Running;
        running.submitted_at.get_or_insert(now);
        self.stores.tasks.update(&running).await?;
        Ok(self.provider.mark_running(id, now).is_some())
    }

    /// Handle one inbound executor result.
    pub async fn on_result(&self, result: queue::ResultMessage) -> Result<(), EngineError> {
        match self.gateway.accept_result(&result).await? {
            None => {}
            Some(Signal::Running(id)) => {
                self.mark_running(&id).await?;
            }
            Some(Signal::Terminal { id, status, message }) => {
                self.complete_task(&id, status, message).await?;
            }
        }
        Ok(())
    }

    /// Fail a task whose deadline passed.
    pub async fn on_timeout(&self, id: &TaskId) -> Result<bool, EngineError> {
        let failed = self
            .complete_task(id, TaskStatus::Failed, Some(TIMED_OUT.to_string()))
            .await?;
        if failed {
            info!(task = %id, "task timed out");
        }
        Ok(failed)
    }

    /// Cancel and remove a job.
    ///
    /// Outstanding watches are dropped and every non-terminal task is marked
    /// SKIPPED before the job and its tasks are removed from the store.
    /// Results that arrive later for its tasks are discarded as unknown.
    #[instrument(skip(self))]
    pub async fn delete_job(&self, job_id: Uuid) -> Result<(), EngineError> {
        let _job = self.lock_job(job_id).await;

        if self.stores.jobs.load(job_id).await?.is_none() {
            return Err(EngineError::UnknownJob(job_id));
        }

        let unwatched = self.supervisor.unwatch_job(job_id);
        self.provider.remove_job(job_id);
        self.undelivered.retain(|id| id.job_id != job_id);
        self.dirty_jobs.remove(&job_id);

        let now = self.clock.now();
        let mut skipped = 0;
        for mut task in self.stores.tasks.load_by_job(job_id).await? {
            if task.status.is_terminal() {
                continue;
            }
            task.status = TaskStatus::Skipped;
            task.status_message = Some(JOB_DELETED.to_string());
            task.completed_at = Some(now);
            self.stores.tasks.update(&task).await?;
            skipped += 1;
        }

        self.stores.jobs.delete(job_id).await?;
        info!(%job_id, unwatched, skipped, "job deleted");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Recovery
    // -----------------------------------------------------------------------

    /// Rebuild in-memory tracking from the store.
    ///
    /// Every CREATED or RUNNING job is re-registered with dependency counts
    /// recomputed from stored task statuses. In-flight tasks are watched
    /// again and SCHEDULED ones re-published, since their message may never
    /// have reached the queue. Returns the number of jobs recovered.
    #[instrument(skip(self))]
    pub async fn recover(&self) -> Result<usize, EngineError> {
        self.provider.reinit();
        self.undelivered.clear();
        self.dirty_jobs.clear();

        let jobs = self
            .stores
            .jobs
            .load_by_status(&[JobStatus::Created, JobStatus::Running])
            .await?;
        let recovered = jobs.len();
        for job in jobs {
            let _job = self.lock_job(job.id).await;

            let tasks = self.stores.tasks.load_by_job(job.id).await?;
            let advance = self.provider.register(job.id, tasks, self.clock.now());
            self.settle(job.id, advance).await;
        }

        info!(
            jobs = recovered,
            tracked = self.provider.size(),
            watched = self.supervisor.len(),
            "recovered in-flight work"
        );
        Ok(recovered)
    }

    /// Rebuild the tracking of every dirty job from the store and re-apply
    /// what the provider derives from it. Returns how many jobs were resynced.
    ///
    /// A job whose tasks cannot be loaded stays dirty for the next sweep.
    pub async fn resync_dirty_jobs(&self) -> usize {
        let job_ids: Vec<Uuid> = self.dirty_jobs.iter().map(|id| *id.key()).collect();
        let mut resynced = 0;
        for job_id in job_ids {
            match self.resync_job(job_id).await {
                Ok(()) => resynced += 1,
                Err(e) => warn!(%job_id, error = %e, "job resync failed"),
            }
        }
        if resynced > 0 {
            info!(resynced, "resynced jobs after failed writes");
        }
        resynced
    }

    async fn resync_job(&self, job_id: Uuid) -> Result<(), EngineError> {
        let _job = self.lock_job(job_id).await;
        if !self.dirty_jobs.contains(&job_id) {
            return Ok(());
        }

        let job = self.stores.jobs.load(job_id).await?;
        let tasks = match job {
            Some(_) => self.stores.tasks.load_by_job(job_id).await?,
            None => Vec::new(),
        };

        self.provider.remove_job(job_id);
        self.supervisor.unwatch_job(job_id);
        self.undelivered.retain(|id| id.job_id != job_id);
        self.dirty_jobs.remove(&job_id);
        if job.is_none() {
            debug!(%job_id, "dirty job no longer exists");
            return Ok(());
        }

        let advance = self.provider.register(job_id, tasks, self.clock.now());
        self.settle(job_id, advance).await;
        Ok(())
    }

    /// Re-publish tasks whose earlier dispatch failed. Returns how many were
    /// delivered this time.
    pub async fn retry_undelivered(&self) -> Result<usize, EngineError> {
        let ids: Vec<TaskId> = self.undelivered.iter().map(|id| id.key().clone()).collect();
        let mut delivered = 0;
        for id in ids {
            let task = match self.provider.task(&id) {
                Some(task) if task.status == TaskStatus::Scheduled => task,
                _ => {
                    self.undelivered.remove(&id);
                    continue;
                }
            };
            match self.gateway.publish(&task).await {
                Ok(()) => {
                    self.undelivered.remove(&id);
                    delivered += 1;
                }
                Err(e) => {
                    warn!(task = %id, error = %e, "re-dispatch failed");
                    break;
                }
            }
        }
        if delivered > 0 {
            info!(delivered, "re-dispatched undelivered tasks");
        }
        Ok(delivered)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Apply a committed provider advance, then recompute the job status.
    ///
    /// Failures are logged and mark the job dirty instead of being returned:
    /// the provider has already moved on, and only a resync from the store
    /// can bring the two back together.
    async fn settle(&self, job_id: Uuid, advance: Advance) {
        let settled = match self.apply(advance).await {
            Ok(()) => self.aggregator.on_task_transition(job_id).await.map_err(EngineError::from),
            Err(e) => Err(e),
        };
        match settled {
            Ok(status) => self.evict_if_finished(job_id, status),
            Err(e) => {
                error!(%job_id, error = %e, "job left dirty after a failed write");
                self.dirty_jobs.insert(job_id);
            }
        }
    }

    /// Persist and act on every part of `advance`, carrying on past failures.
    /// Returns the first error.
    async fn apply(&self, advance: Advance) -> Result<(), EngineError> {
        // Every task the provider considers in flight is supervised before
        // any write that can fail.
        for task in advance.ready.iter().chain(&advance.in_flight) {
            self.supervisor.watch(task);
        }

        let mut first_error = None;
        for task in &advance.updated {
            if task.status.is_terminal() {
                self.supervisor.unwatch(&task.id());
                self.undelivered.remove(&task.id());
            }
            if let Err(e) = self.stores.tasks.update(task).await {
                first_error.get_or_insert(EngineError::from(e));
            }
        }
        for mut task in advance.ready {
            let result = self.gateway.dispatch(&mut task).await;
            if let Err(e) = self.track_delivery(&task, result) {
                first_error.get_or_insert(e);
            }
        }
        for task in advance.in_flight {
            if task.status == TaskStatus::Scheduled {
                let result = self.gateway.publish(&task).await;
                if let Err(e) = self.track_delivery(&task, result) {
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn track_delivery(&self, task: &Task, result: Result<(), EngineError>) -> Result<(), EngineError> {
        match result {
            Ok(()) => Ok(()),
            Err(EngineError::Dispatch(e)) => {
                error!(task = %task.id(), error = %e, "dispatch failed, task left SCHEDULED for retry");
                self.undelivered.insert(task.id());
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn evict_if_finished(&self, job_id: Uuid, status: Option<JobStatus>) {
        if status.map_or(true, JobStatus::is_terminal) {
            self.provider.remove_job(job_id);
            self.supervisor.unwatch_job(job_id);
            self.undelivered.retain(|id| id.job_id != job_id);
        }
    }

    // -----------------------------------------------------------------------
    // Background loops
    // -----------------------------------------------------------------------

    /// Spawn the result consumer, the timeout loop and the retry sweep
    /// (dirty-job resync and re-dispatch). All three stop once `shutdown`
    /// turns true.
    pub fn spawn(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(Arc::clone(self).consume_results(shutdown.clone())),
            tokio::spawn(Arc::clone(self).supervise_timeouts(shutdown.clone())),
            tokio::spawn(Arc::clone(self).retry_loop(shutdown)),
        ]
    }

    async fn consume_results(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("result consumer started");
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                received = self.gateway.recv_result() => match received {
                    Ok(result) => {
                        if let Err(e) = self.on_result(result).await {
                            error!(error = %e, "failed to apply task result");
                        }
                    }
                    Err(EngineError::Dispatch(QueueError::Closed(_))) => {
                        info!("result queue closed");
                        break;
                    }
                    Err(e) => error!(error = %e, "failed to receive task result"),
                },
            }
        }
        info!("result consumer stopped");
    }

    async fn supervise_timeouts(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let scan_interval = self.config.timeout_scan_interval();
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                expired = self.supervisor.next_expired(scan_interval) => {
                    for id in expired {
                        if let Err(e) = self.on_timeout(&id).await {
                            error!(task = %id, error = %e, "failed to apply timeout");
                        }
                    }
                }
            }
        }
        debug!("timeout supervisor stopped");
    }

    async fn retry_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.dispatch_retry_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if !self.dirty_jobs.is_empty() {
                        self.resync_dirty_jobs().await;
                    }
                    if self.undelivered.is_empty() {
                        continue;
                    }
                    if let Err(e) = self.retry_undelivered().await {
                        error!(error = %e, "dispatch retry sweep failed");
                    }
                }
            }
        }
        debug!("dispatch retry sweep stopped");
    }
}

#[async_trait]
impl FireHandler for TaskScheduler {
    async fn on_fire(&self, trigger: &WorkflowTrigger, fired_at: DateTime<Utc>) {
        let trigger_id = trigger.id();
        if !trigger.is_active_at(fired_at) {
            debug!(trigger = %trigger_id, %fired_at, "firing outside trigger window ignored");
            return;
        }
        let workflow = match self.stores.workflows.load(&trigger.workflow_id()).await {
            Ok(Some(workflow)) => workflow,
            Ok(None) => {
                warn!(trigger = %trigger_id, "workflow no longer exists, firing skipped");
                return;
            }
            Err(e) => {
                error!(trigger = %trigger_id, error = %e, "failed to load workflow for firing");
                return;
            }
        };
        match self.execute(&workflow, &trigger_id, fired_at).await {
            Ok(job) => debug!(trigger = %trigger_id, job_id = %job.id, "firing expanded"),
            Err(e) => error!(trigger = %trigger_id, error = %e, "job expansion failed"),
        }
    }
}
