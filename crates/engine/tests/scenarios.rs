//! End-to-end scheduling scenarios over the in-memory store and queue.
//!
//! Most tests drive results by hand through `TaskScheduler::on_result` so
//! every step is deterministic. The tests that run the background loops
//! wait on the job-completed broadcast rather than sleeping.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, mpsc, watch, Notify};
use tokio::task::JoinHandle;

use engine::models::{dependency_failed, TIMED_OUT};
use engine::{
    EngineError, Job, JobCompleted, JobStatus, JobStore, MemoryStore, SchedulerConfig, Schedule,
    Services, StoreError, Stores, SystemClock, Task, TaskId, TaskScheduler, TaskStatus, TaskStore,
    ValidationError, Workflow, WorkflowId, WorkflowTask, WorkflowTrigger, WorkflowTriggerId,
};
use uuid::Uuid;
use queue::{InMemoryQueue, QueueError, ResultMessage, ResultStatus, TaskMessage, TaskQueue};

// ============================================================
// Fixtures
// ============================================================

struct Harness {
    scheduler: Arc<TaskScheduler>,
    queue: Arc<InMemoryQueue>,
    store: Arc<MemoryStore>,
}

impl Harness {
    fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()))
    }

    fn with_store(store: Arc<MemoryStore>) -> Self {
        Self::with_task_store(store.clone(), store)
    }

    /// Everything in `store` except task persistence, which goes through `tasks`.
    fn with_task_store(store: Arc<MemoryStore>, tasks: Arc<dyn TaskStore>) -> Self {
        let queue = Arc::new(InMemoryQueue::new());
        let stores = Stores {
            workflows: store.clone(),
            triggers: store.clone(),
            jobs: store.clone(),
            tasks,
        };
        let scheduler = Arc::new(TaskScheduler::new(
            stores,
            queue.clone(),
            Arc::new(SystemClock),
            SchedulerConfig::default(),
        ));
        Self { scheduler, queue, store }
    }

    /// Report every dispatched task as successful until nothing is left.
    async fn run_to_completion(&self) {
        loop {
            let batch = self.dispatched().await;
            if batch.is_empty() {
                break;
            }
            for message in &batch {
                self.report(message, ResultStatus::Successful, None).await;
            }
        }
    }

    async fn execute(&self, workflow: &Workflow) -> Job {
        let trigger = WorkflowTriggerId::new(&workflow.namespace, &workflow.name, "manual");
        self.scheduler
            .execute(workflow, &trigger, Utc::now())
            .await
            .expect("job expands")
    }

    /// Drain the task messages currently on the outbound queue.
    async fn dispatched(&self) -> Vec<TaskMessage> {
        self.queue.drain_tasks().await.unwrap()
    }

    async fn report(&self, message: &TaskMessage, status: ResultStatus, text: Option<&str>) {
        let result = ResultMessage::new(message, status, text.map(str::to_string));
        self.scheduler.on_result(result).await.unwrap();
    }

    async fn task_status(&self, job: &Job, name: &str) -> (TaskStatus, Option<String>) {
        let task = TaskStore::load(self.store.as_ref(), &TaskId::new(&job.namespace, job.id, name))
            .await
            .unwrap()
            .expect("task exists");
        (task.status, task.status_message)
    }

    async fn job_status(&self, job: &Job) -> JobStatus {
        JobStore::load(self.store.as_ref(), job.id)
            .await
            .unwrap()
            .expect("job exists")
            .status
    }
}

/// one -> two -> three
fn chain() -> Workflow {
    Workflow::new(
        "default",
        "chain",
        vec![
            WorkflowTask::new("one", "mock"),
            WorkflowTask::new("two", "mock").depends_on(["one"]),
            WorkflowTask::new("three", "mock").depends_on(["two"]),
        ],
    )
}

fn names(messages: &[TaskMessage]) -> Vec<&str> {
    messages.iter().map(|m| m.task_name.as_str()).collect()
}

#[derive(Clone, Copy)]
enum Outcome {
    Succeed,
    Hang,
}

/// A stand-in executor answering from a fixed outcome table.
fn spawn_executor(queue: Arc<InMemoryQueue>, outcomes: HashMap<&'static str, Outcome>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Ok(task) = queue.recv_task().await {
            let _ = queue
                .send_result(&ResultMessage::new(&task, ResultStatus::Running, None))
                .await;
            let status = match outcomes.get(task.task_name.as_str()).copied().unwrap_or(Outcome::Succeed) {
                Outcome::Succeed => ResultStatus::Successful,
                Outcome::Hang => continue,
            };
            let _ = queue
                .send_result(&ResultMessage::new(&task, status, Some("handler finished".into())))
                .await;
        }
    })
}

async fn next_completion(completed: &mut broadcast::Receiver<JobCompleted>) -> JobCompleted {
    tokio::time::timeout(Duration::from_secs(2 * 3600), completed.recv())
        .await
        .expect("job completes")
        .expect("channel open")
}

// ============================================================
// Dependency propagation
// ============================================================

#[tokio::test]
async fn linear_chain_succeeds() {
    let h = Harness::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut completed = h.scheduler.subscribe();
    let loops = h.scheduler.spawn(shutdown_rx);
    let executor = spawn_executor(h.queue.clone(), HashMap::new());

    let job = h.execute(&chain()).await;
    let done = next_completion(&mut completed).await;
    assert_eq!(done.job_id, job.id);
    assert_eq!(done.status, JobStatus::Successful);

    for name in ["one", "two", "three"] {
        assert_eq!(h.task_status(&job, name).await.0, TaskStatus::Successful);
    }
    let stored = JobStore::load(h.store.as_ref(), job.id).await.unwrap().unwrap();
    assert!(stored.completed_at.is_some());
    assert_eq!(h.scheduler.provider().size(), 0);
    assert!(h.scheduler.supervisor().is_empty());

    shutdown_tx.send(true).unwrap();
    for handle in loops {
        handle.await.unwrap();
    }
    executor.abort();
}

#[tokio::test]
async fn failed_task_skips_its_dependents() {
    let h = Harness::new();
    let job = h.execute(&chain()).await;

    let first = h.dispatched().await;
    assert_eq!(names(&first), vec!["one"]);
    assert_eq!(h.task_status(&job, "two").await.0, TaskStatus::Waiting);
    h.report(&first[0], ResultStatus::Successful, None).await;

    let second = h.dispatched().await;
    assert_eq!(names(&second), vec!["two"]);
    h.report(&second[0], ResultStatus::Failed, Some("exit status 2")).await;

    assert_eq!(
        h.task_status(&job, "two").await,
        (TaskStatus::Failed, Some("exit status 2".into()))
    );
    assert_eq!(
        h.task_status(&job, "three").await,
        (TaskStatus::Skipped, Some(dependency_failed("two")))
    );
    assert_eq!(h.job_status(&job).await, JobStatus::Failed);
    assert!(h.dispatched().await.is_empty(), "skipped tasks are never dispatched");
}

#[tokio::test]
async fn failure_skips_transitive_dependents_but_not_siblings() {
    let wf = Workflow::new(
        "default",
        "fan",
        vec![
            WorkflowTask::new("root", "mock"),
            WorkflowTask::new("left", "mock").depends_on(["root"]),
            WorkflowTask::new("right", "mock"),
            WorkflowTask::new("leaf", "mock").depends_on(["left"]),
        ],
    );
    let h = Harness::new();
    let job = h.execute(&wf).await;

    let ready = h.dispatched().await;
    assert_eq!(names(&ready), vec!["right", "root"]);
    h.report(&ready[1], ResultStatus::Failed, None).await;

    assert_eq!(h.task_status(&job, "left").await.0, TaskStatus::Skipped);
    assert_eq!(
        h.task_status(&job, "leaf").await,
        (TaskStatus::Skipped, Some(dependency_failed("root")))
    );
    assert_eq!(h.job_status(&job).await, JobStatus::Running);

    h.report(&ready[0], ResultStatus::Successful, None).await;
    assert_eq!(h.job_status(&job).await, JobStatus::Failed);
}

#[tokio::test]
async fn diamond_waits_for_every_dependency() {
    let wf = Workflow::new(
        "default",
        "diamond",
        vec![
            WorkflowTask::new("a", "mock"),
            WorkflowTask::new("b", "mock").depends_on(["a"]),
            WorkflowTask::new("c", "mock").depends_on(["a"]),
            WorkflowTask::new("d", "mock").depends_on(["b", "c"]),
        ],
    );
    let h = Harness::new();
    let job = h.execute(&wf).await;

    let a = h.dispatched().await;
    h.report(&a[0], ResultStatus::Successful, None).await;
    let bc = h.dispatched().await;
    assert_eq!(names(&bc), vec!["b", "c"]);

    h.report(&bc[0], ResultStatus::Successful, None).await;
    assert!(h.dispatched().await.is_empty());
    assert_eq!(h.task_status(&job, "d").await.0, TaskStatus::Waiting);

    h.report(&bc[1], ResultStatus::Successful, None).await;
    let d = h.dispatched().await;
    assert_eq!(names(&d), vec!["d"]);
    h.report(&d[0], ResultStatus::Successful, None).await;
    assert_eq!(h.job_status(&job).await, JobStatus::Successful);
}

#[tokio::test]
async fn disabled_tasks_are_not_instantiated() {
    let wf = Workflow::new(
        "default",
        "partial",
        vec![
            WorkflowTask::new("kept", "mock"),
            WorkflowTask::new("dropped", "mock").disabled(),
        ],
    );
    let h = Harness::new();
    let job = h.execute(&wf).await;

    let tasks = h.store.load_by_job(job.id).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].name, "kept");
}

#[tokio::test]
async fn independent_tasks_dispatch_in_declaration_order() {
    let wf = Workflow::new(
        "default",
        "fan",
        vec![
            WorkflowTask::new("zeta", "mock"),
            WorkflowTask::new("alpha", "mock"),
            WorkflowTask::new("mid", "mock"),
        ],
    );
    let h = Harness::new();
    let job = h.execute(&wf).await;
    assert_eq!(names(&h.dispatched().await), vec!["zeta", "alpha", "mid"]);

    let stored: Vec<String> = h.store.load_by_job(job.id).await.unwrap().into_iter().map(|t| t.name).collect();
    assert_eq!(stored, vec!["zeta", "alpha", "mid"]);
}

// ============================================================
// Duplicate and late signals
// ============================================================

#[tokio::test]
async fn duplicate_result_transitions_once() {
    let h = Harness::new();
    let job = h.execute(&chain()).await;
    let one = h.dispatched().await;

    h.report(&one[0], ResultStatus::Successful, None).await;
    h.report(&one[0], ResultStatus::Successful, None).await;
    h.report(&one[0], ResultStatus::Failed, Some("redelivered")).await;

    assert_eq!(h.task_status(&job, "one").await, (TaskStatus::Successful, None));
    assert_eq!(names(&h.dispatched().await), vec!["two"], "two is dispatched exactly once");
}

#[tokio::test]
async fn running_acknowledgment_is_not_terminal() {
    let h = Harness::new();
    let job = h.execute(&chain()).await;
    let one = h.dispatched().await;

    h.report(&one[0], ResultStatus::Running, None).await;
    assert_eq!(h.task_status(&job, "one").await.0, TaskStatus::Running);
    assert_eq!(h.job_status(&job).await, JobStatus::Running);

    h.report(&one[0], ResultStatus::Successful, None).await;
    h.report(&one[0], ResultStatus::Running, None).await;
    assert_eq!(h.task_status(&job, "one").await.0, TaskStatus::Successful);
}

#[tokio::test]
async fn result_for_an_undispatched_task_is_ignored() {
    let h = Harness::new();
    let job = h.execute(&chain()).await;
    let mut early = h.dispatched().await.remove(0);
    early.task_name = "three".into();

    h.report(&early, ResultStatus::Successful, None).await;
    assert_eq!(h.task_status(&job, "three").await.0, TaskStatus::Waiting);
}

// ============================================================
// Timeouts
// ============================================================

#[tokio::test(start_paused = true)]
async fn hung_task_times_out_and_late_result_is_discarded() {
    let mut wf = chain();
    wf.tasks[2] = WorkflowTask::new("three", "mock")
        .depends_on(["two"])
        .with_timeout_ms(30_000);

    let h = Harness::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut completed = h.scheduler.subscribe();
    let _loops = h.scheduler.spawn(shutdown_rx);
    let _executor = spawn_executor(h.queue.clone(), HashMap::from([("three", Outcome::Hang)]));

    let job = h.execute(&wf).await;
    let done = next_completion(&mut completed).await;
    assert_eq!(done.job_id, job.id);
    assert_eq!(done.status, JobStatus::Failed);
    assert_eq!(
        h.task_status(&job, "three").await,
        (TaskStatus::Failed, Some(TIMED_OUT.into()))
    );
    assert_eq!(h.task_status(&job, "two").await.0, TaskStatus::Successful);

    let three = h.store.load_by_job(job.id).await.unwrap().remove(2);
    h.report(&three.to_message(), ResultStatus::Successful, None).await;
    assert_eq!(
        h.task_status(&job, "three").await,
        (TaskStatus::Failed, Some(TIMED_OUT.into()))
    );
    assert_eq!(h.job_status(&job).await, JobStatus::Failed);
    shutdown_tx.send(true).unwrap();
}

#[tokio::test]
async fn timeout_after_result_is_a_no_op() {
    let h = Harness::new();
    let job = h.execute(&chain()).await;
    let one = h.dispatched().await;
    h.report(&one[0], ResultStatus::Successful, None).await;

    let id = TaskId::new("default", job.id, "one");
    assert!(!h.scheduler.on_timeout(&id).await.unwrap());
    assert_eq!(h.task_status(&job, "one").await.0, TaskStatus::Successful);
}

// ============================================================
// Deletion
// ============================================================

#[tokio::test]
async fn deleting_a_job_clears_watches_and_tasks() {
    let wf = Workflow::new(
        "default",
        "fork",
        vec![
            WorkflowTask::new("one", "mock"),
            WorkflowTask::new("two", "mock").depends_on(["one"]),
            WorkflowTask::new("three", "mock").depends_on(["one"]),
        ],
    );
    let h = Harness::new();
    let job = h.execute(&wf).await;
    let one = h.dispatched().await;
    h.report(&one[0], ResultStatus::Successful, None).await;
    let pending = h.dispatched().await;
    assert_eq!(pending.len(), 2);
    assert_eq!(h.scheduler.supervisor().len(), 2);

    h.scheduler.delete_job(job.id).await.unwrap();

    assert!(h.scheduler.supervisor().is_empty());
    assert!(!h.scheduler.provider().contains_job(job.id));
    assert!(h.store.load_by_job(job.id).await.unwrap().is_empty());
    assert!(JobStore::load(h.store.as_ref(), job.id).await.unwrap().is_none());

    h.report(&pending[0], ResultStatus::Successful, None).await;
    assert!(h.store.load_by_job(job.id).await.unwrap().is_empty());

    assert!(matches!(
        h.scheduler.delete_job(job.id).await.unwrap_err(),
        EngineError::UnknownJob(_)
    ));
}

#[tokio::test]
async fn job_locks_are_released_once_a_job_is_done() {
    let h = Harness::new();
    assert!(matches!(
        h.scheduler.delete_job(Uuid::new_v4()).await.unwrap_err(),
        EngineError::UnknownJob(_)
    ));
    assert_eq!(h.scheduler.tracked_locks(), 0);

    let job = h.execute(&chain()).await;
    assert_eq!(h.scheduler.tracked_locks(), 1);
    h.run_to_completion().await;
    assert_eq!(h.job_status(&job).await, JobStatus::Successful);
    assert_eq!(h.scheduler.tracked_locks(), 0);

    // Signals for a job that is no longer tracked.
    let stale = TaskId::new("default", job.id, "one");
    assert!(!h.scheduler.complete_task(&stale, TaskStatus::Failed, None).await.unwrap());
    assert!(!h.scheduler.mark_running(&stale).await.unwrap());
    assert_eq!(h.scheduler.tracked_locks(), 0);
}

// ============================================================
// Validation
// ============================================================

#[tokio::test]
async fn cyclic_definition_never_produces_a_job() {
    let cyclic = Workflow::new(
        "default",
        "cyclic",
        vec![
            WorkflowTask::new("a", "mock").depends_on(["c"]),
            WorkflowTask::new("b", "mock").depends_on(["a"]),
            WorkflowTask::new("c", "mock").depends_on(["b"]),
        ],
    );
    let store = Arc::new(MemoryStore::new());
    let services = Services::new(
        Stores::from_shared(store.clone()),
        Arc::new(InMemoryQueue::new()),
        Arc::new(SystemClock),
        SchedulerConfig::default(),
    );

    let err = services.workflows.save(cyclic.clone()).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(ValidationError::CyclicDependency(_))));

    let trigger = WorkflowTriggerId::new("default", "cyclic", "manual");
    let err = services
        .scheduler
        .execute(&cyclic, &trigger, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(ValidationError::CyclicDependency(_))));
    assert!(JobStore::load_by_namespace(store.as_ref(), "default").await.unwrap().is_empty());
}

// ============================================================
// Recovery and redelivery
// ============================================================

#[tokio::test]
async fn restart_rebuilds_tracking_from_the_store() {
    let store = Arc::new(MemoryStore::new());
    let before = Harness::with_store(store.clone());
    let wf = Workflow::new(
        "default",
        "pair",
        vec![
            WorkflowTask::new("acked", "mock"),
            WorkflowTask::new("queued", "mock"),
            WorkflowTask::new("after", "mock").depends_on(["acked", "queued"]),
        ],
    );
    let job = before.execute(&wf).await;
    let ready = before.dispatched().await;
    before.report(&ready[0], ResultStatus::Running, None).await;
    drop(before);

    let after = Harness::with_store(store);
    assert_eq!(after.scheduler.recover().await.unwrap(), 1);

    // Only the unacknowledged task is published again; both are supervised.
    let republished = after.dispatched().await;
    assert_eq!(names(&republished), vec!["queued"]);
    assert_eq!(after.scheduler.supervisor().len(), 2);
    assert_eq!(after.scheduler.provider().size(), 3);

    after.report(&ready[0], ResultStatus::Successful, None).await;
    after.report(&republished[0], ResultStatus::Successful, None).await;
    let last = after.dispatched().await;
    assert_eq!(names(&last), vec!["after"]);
    after.report(&last[0], ResultStatus::Successful, None).await;
    assert_eq!(after.job_status(&job).await, JobStatus::Successful);
}

/// Queue whose outbound side can be switched off.
struct FlakyQueue {
    inner: InMemoryQueue,
    down: AtomicBool,
}

#[async_trait]
impl TaskQueue for FlakyQueue {
    async fn send_task(&self, message: &TaskMessage) -> Result<(), QueueError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(QueueError::Closed("tasks"));
        }
        self.inner.send_task(message).await
    }
    async fn recv_task(&self) -> Result<TaskMessage, QueueError> {
        self.inner.recv_task().await
    }
    async fn send_result(&self, message: &ResultMessage) -> Result<(), QueueError> {
        self.inner.send_result(message).await
    }
    async fn recv_result(&self) -> Result<ResultMessage, QueueError> {
        self.inner.recv_result().await
    }
}

#[tokio::test]
async fn undelivered_tasks_are_retried() {
    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(FlakyQueue { inner: InMemoryQueue::new(), down: AtomicBool::new(true) });
    let scheduler = TaskScheduler::new(
        Stores::from_shared(store.clone()),
        queue.clone(),
        Arc::new(SystemClock),
        SchedulerConfig::default(),
    );

    let trigger = WorkflowTriggerId::new("default", "chain", "manual");
    let job = scheduler.execute(&chain(), &trigger, Utc::now()).await.unwrap();
    assert_eq!(scheduler.undelivered(), 1);
    let one = TaskStore::load(store.as_ref(), &TaskId::new("default", job.id, "one"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(one.status, TaskStatus::Scheduled);

    assert_eq!(scheduler.retry_undelivered().await.unwrap(), 0);
    queue.down.store(false, Ordering::SeqCst);
    assert_eq!(scheduler.retry_undelivered().await.unwrap(), 1);
    assert_eq!(scheduler.undelivered(), 0);

    let sent = queue.inner.drain_tasks().await.unwrap();
    assert_eq!(names(&sent), vec!["one"]);
}

// ============================================================
// Store failures
// ============================================================

/// Task store that fails the next update moving a given task into a given
/// status, once.
struct FailingTaskStore {
    inner: Arc<MemoryStore>,
    fail_next: Mutex<Option<(String, TaskStatus)>>,
}

impl FailingTaskStore {
    fn new(inner: Arc<MemoryStore>) -> Arc<Self> {
        Arc::new(Self { inner, fail_next: Mutex::new(None) })
    }

    fn fail_next(&self, task: &str, status: TaskStatus) {
        *self.fail_next.lock().unwrap() = Some((task.to_string(), status));
    }
}

#[async_trait]
impl TaskStore for FailingTaskStore {
    async fn store(&self, task: &Task) -> Result<(), StoreError> {
        TaskStore::store(self.inner.as_ref(), task).await
    }
    async fn update(&self, task: &Task) -> Result<(), StoreError> {
        {
            let mut armed = self.fail_next.lock().unwrap();
            if matches!(armed.as_ref(), Some((name, status)) if *name == task.name && *status == task.status) {
                *armed = None;
                return Err(StoreError::Backend("connection reset".into()));
            }
        }
        TaskStore::update(self.inner.as_ref(), task).await
    }
    async fn load(&self, id: &TaskId) -> Result<Option<Task>, StoreError> {
        TaskStore::load(self.inner.as_ref(), id).await
    }
    async fn load_by_job(&self, job_id: Uuid) -> Result<Vec<Task>, StoreError> {
        self.inner.load_by_job(job_id).await
    }
}

#[tokio::test]
async fn outcome_that_fails_to_persist_can_be_redelivered() {
    let store = Arc::new(MemoryStore::new());
    let tasks = FailingTaskStore::new(store.clone());
    let h = Harness::with_task_store(store, tasks.clone());
    let job = h.execute(&chain()).await;
    let one = h.dispatched().await;
    let id = TaskId::new("default", job.id, "one");

    tasks.fail_next("one", TaskStatus::Successful);
    let result = ResultMessage::new(&one[0], ResultStatus::Successful, None);
    assert!(h.scheduler.on_result(result.clone()).await.is_err());

    // Nothing moved: the task is still in flight on both sides and supervised.
    assert_eq!(h.task_status(&job, "one").await.0, TaskStatus::Scheduled);
    assert_eq!(h.scheduler.provider().status(&id), Some(TaskStatus::Scheduled));
    assert!(h.scheduler.supervisor().is_watched(&id));
    assert!(h.dispatched().await.is_empty());

    h.scheduler.on_result(result).await.unwrap();
    assert_eq!(h.task_status(&job, "one").await.0, TaskStatus::Successful);
    h.run_to_completion().await;
    assert_eq!(h.job_status(&job).await, JobStatus::Successful);
    assert_eq!(h.scheduler.dirty_jobs(), 0);
}

#[tokio::test]
async fn failed_dispatch_write_is_repaired_by_the_resync() {
    let store = Arc::new(MemoryStore::new());
    let tasks = FailingTaskStore::new(store.clone());
    let h = Harness::with_task_store(store, tasks.clone());
    let job = h.execute(&chain()).await;
    let one = h.dispatched().await;

    tasks.fail_next("two", TaskStatus::Scheduled);
    h.report(&one[0], ResultStatus::Successful, None).await;

    assert_eq!(h.task_status(&job, "one").await.0, TaskStatus::Successful);
    assert_eq!(h.task_status(&job, "two").await.0, TaskStatus::Waiting);
    assert!(h.dispatched().await.is_empty());
    assert!(h.scheduler.supervisor().is_watched(&TaskId::new("default", job.id, "two")));
    assert_eq!(h.scheduler.dirty_jobs(), 1);

    assert_eq!(h.scheduler.resync_dirty_jobs().await, 1);
    assert_eq!(h.scheduler.dirty_jobs(), 0);
    let two = h.dispatched().await;
    assert_eq!(names(&two), vec!["two"]);
    assert_eq!(h.task_status(&job, "two").await.0, TaskStatus::Scheduled);

    h.run_to_completion().await;
    assert_eq!(h.job_status(&job).await, JobStatus::Successful);
}

#[tokio::test(start_paused = true)]
async fn timeout_that_fails_to_persist_is_retried() {
    let mut wf = chain();
    wf.tasks[0] = WorkflowTask::new("one", "mock").with_timeout_ms(30_000);

    let store = Arc::new(MemoryStore::new());
    let tasks = FailingTaskStore::new(store.clone());
    let h = Harness::with_task_store(store, tasks.clone());
    tasks.fail_next("one", TaskStatus::Failed);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut completed = h.scheduler.subscribe();
    let _loops = h.scheduler.spawn(shutdown_rx);

    let job = h.execute(&wf).await;
    let done = next_completion(&mut completed).await;
    assert_eq!(done.job_id, job.id);
    assert_eq!(done.status, JobStatus::Failed);
    assert_eq!(
        h.task_status(&job, "one").await,
        (TaskStatus::Failed, Some(TIMED_OUT.into()))
    );
    assert_eq!(h.task_status(&job, "three").await.0, TaskStatus::Skipped);
    shutdown_tx.send(true).unwrap();
}

// ============================================================
// Triggers
// ============================================================

#[tokio::test(start_paused = true)]
async fn fixed_trigger_fires_a_job() {
    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(InMemoryQueue::new());
    let services = Services::new(
        Stores::from_shared(store.clone()),
        queue.clone(),
        Arc::new(SystemClock),
        SchedulerConfig::default(),
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut completed = services.scheduler.subscribe();
    services.start(shutdown_rx).await.unwrap();
    let _executor = spawn_executor(queue, HashMap::new());

    services.workflows.save(chain()).await.unwrap();
    let trigger = WorkflowTrigger::new(
        &WorkflowId::new("default", "chain"),
        "soon",
        Schedule::Fixed { fire_at: Utc::now() + chrono::Duration::seconds(10) },
    );
    services.triggers.add(trigger.clone()).await.unwrap();

    let done = next_completion(&mut completed).await;
    assert_eq!(done.trigger, "soon");
    assert_eq!(done.status, JobStatus::Successful);

    let jobs = services
        .jobs
        .list_by_trigger(&trigger.id(), Utc::now() - chrono::Duration::hours(1), Utc::now())
        .await
        .unwrap();
    assert_eq!(jobs.len(), 1);
    let tasks = services.jobs.tasks(jobs[0].id).await.unwrap();
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Successful));
    shutdown_tx.send(true).unwrap();
}

#[tokio::test]
async fn firing_outside_the_window_is_ignored() {
    use engine::FireHandler;

    let h = Harness::new();
    let mut trigger = WorkflowTrigger::new(
        &WorkflowId::new("default", "chain"),
        "windowed",
        Schedule::Cron { expression: "* * * * *".into() },
    );
    trigger.end_at = Some(Utc::now() - chrono::Duration::days(1));
    engine::WorkflowStore::store(h.store.as_ref(), &chain()).await.unwrap();

    h.scheduler.on_fire(&trigger, Utc::now()).await;
    assert!(JobStore::load_by_namespace(h.store.as_ref(), "default").await.unwrap().is_empty());

    trigger.end_at = None;
    h.scheduler.on_fire(&trigger, Utc::now()).await;
    let jobs = JobStore::load_by_namespace(h.store.as_ref(), "default").await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].trigger, "windowed");
}

/// Task store that parks the first insert of one task until released.
struct ParkingTaskStore {
    inner: Arc<MemoryStore>,
    park: &'static str,
    parked: mpsc::UnboundedSender<()>,
    release: Notify,
}

#[async_trait]
impl TaskStore for ParkingTaskStore {
    async fn store(&self, task: &Task) -> Result<(), StoreError> {
        if task.name == self.park {
            let _ = self.parked.send(());
            self.release.notified().await;
        }
        TaskStore::store(self.inner.as_ref(), task).await
    }
    async fn update(&self, task: &Task) -> Result<(), StoreError> {
        TaskStore::update(self.inner.as_ref(), task).await
    }
    async fn load(&self, id: &TaskId) -> Result<Option<Task>, StoreError> {
        TaskStore::load(self.inner.as_ref(), id).await
    }
    async fn load_by_job(&self, job_id: Uuid) -> Result<Vec<Task>, StoreError> {
        self.inner.load_by_job(job_id).await
    }
}

#[tokio::test(start_paused = true)]
async fn trigger_deleted_mid_firing_still_yields_a_complete_job() {
    let store = Arc::new(MemoryStore::new());
    let (parked_tx, mut parked) = mpsc::unbounded_channel();
    let tasks = Arc::new(ParkingTaskStore {
        inner: store.clone(),
        park: "two",
        parked: parked_tx,
        release: Notify::new(),
    });
    let queue = Arc::new(InMemoryQueue::new());
    let services = Services::new(
        Stores {
            workflows: store.clone(),
            triggers: store.clone(),
            jobs: store.clone(),
            tasks: tasks.clone(),
        },
        queue.clone(),
        Arc::new(SystemClock),
        SchedulerConfig::default(),
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut completed = services.scheduler.subscribe();
    services.start(shutdown_rx).await.unwrap();
    let _executor = spawn_executor(queue, HashMap::new());

    services.workflows.save(chain()).await.unwrap();
    let trigger = WorkflowTrigger::new(
        &WorkflowId::new("default", "chain"),
        "soon",
        Schedule::Fixed { fire_at: Utc::now() + chrono::Duration::seconds(10) },
    );
    services.triggers.add(trigger.clone()).await.unwrap();

    // The firing is halfway through persisting the job's tasks.
    parked.recv().await.unwrap();
    assert!(services.triggers.delete(&trigger.id()).await.unwrap());
    assert!(!services.triggers.is_scheduled(&trigger.id()));
    tasks.release.notify_one();

    let done = next_completion(&mut completed).await;
    assert_eq!(done.trigger, "soon");
    assert_eq!(done.status, JobStatus::Successful);
    let finished = services.jobs.tasks(done.job_id).await.unwrap();
    assert_eq!(finished.len(), 3);
    assert!(finished.iter().all(|t| t.status == TaskStatus::Successful));
    shutdown_tx.send(true).unwrap();
}
