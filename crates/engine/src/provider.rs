//! Task provider: the in-memory readiness tracker.
//!
//! For every active job the provider keeps the non-terminal tasks together
//! with their unresolved-dependency counts and reverse edges. Terminal tasks
//! are evicted as soon as their transition has been applied; the stores stay
//! the durable record, and the provider is rebuilt from them after a restart.
//!
//! Each job sits behind its own lock, so transitions on different jobs never
//! contend. Terminal transitions are compare-and-set: only a task that is
//! still tracked and in flight can finish, so a second signal for the same
//! task (a late result after a timeout, a redelivered message) is a no-op.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{dependency_failed, Task, TaskId, TaskStatus};

struct Node {
    task: Task,
    unresolved: usize,
    /// Names of tasks that list this one in `depends_on`.
    dependents: Vec<String>,
}

#[derive(Default)]
struct JobGraph {
    nodes: HashMap<String, Node>,
}

/// State changes produced by one provider operation, for the caller to
/// persist and act upon.
#[derive(Debug, Default)]
pub struct Advance {
    /// Tasks whose dependencies are all satisfied; now SCHEDULED and due for dispatch.
    pub ready: Vec<Task>,
    /// Tasks whose status changed without becoming ready (WAITING, terminal, SKIPPED).
    pub updated: Vec<Task>,
    /// Tasks that were already in flight when registered (recovery only).
    pub in_flight: Vec<Task>,
}

impl Advance {
    pub fn is_empty(&self) -> bool {
        self.ready.is_empty() && self.updated.is_empty() && self.in_flight.is_empty()
    }
}

#[derive(Default)]
pub struct TaskProvider {
    jobs: DashMap<Uuid, Arc<Mutex<JobGraph>>>,
}

fn lock(graph: &Mutex<JobGraph>) -> MutexGuard<'_, JobGraph> {
    graph.lock().unwrap_or_else(|e| e.into_inner())
}

impl TaskProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn graph(&self, job_id: Uuid) -> Option<Arc<Mutex<JobGraph>>> {
        self.jobs.get(&job_id).map(|g| Arc::clone(g.value()))
    }

    /// Start tracking a job's tasks.
    ///
    /// Works for freshly expanded jobs (every task CREATED) as well as jobs
    /// reloaded from the store after a restart: terminal tasks are not tracked
    /// but count towards their dependents' readiness, and tasks already in
    /// flight are reported in [`Advance::in_flight`] so they can be
    /// re-supervised.
    pub fn register(&self, job_id: Uuid, tasks: Vec<Task>, at: DateTime<Utc>) -> Advance {
        let status_of: HashMap<String, TaskStatus> =
            tasks.iter().map(|t| (t.name.clone(), t.status)).collect();

        let mut graph = JobGraph::default();
        let mut blocked_by: Vec<(String, String)> = Vec::new();

        for task in tasks.into_iter().filter(|t| !t.status.is_terminal()) {
            let mut unresolved = 0;
            for dep in &task.depends_on {
                match status_of.get(dep) {
                    Some(TaskStatus::Successful) => {}
                    Some(TaskStatus::Failed | TaskStatus::Skipped) | None => {
                        // A missing sibling can never succeed either.
                        blocked_by.push((task.name.clone(), dep.clone()));
                    }
                    Some(_) => unresolved += 1,
                }
            }
            graph.nodes.insert(
                task.name.clone(),
                Node { task, unresolved, dependents: Vec::new() },
            );
        }

        let edges: Vec<(String, String)> = graph
            .nodes
            .values()
            .flat_map(|n| n.task.depends_on.iter().map(|d| (d.clone(), n.task.name.clone())))
            .collect();
        for (dep, dependent) in edges {
            if let Some(node) = graph.nodes.get_mut(&dep) {
                node.dependents.push(dependent);
            }
        }

        let mut advance = Advance::default();
        for (task, dep) in blocked_by {
            skip_downstream_of(&mut graph, &[task], &dep, at, &mut advance);
        }

        for node in graph.nodes.values_mut() {
            match node.task.status {
                TaskStatus::Scheduled | TaskStatus::Running => {
                    advance.in_flight.push(node.task.clone());
                }
                _ if node.unresolved == 0 => {
                    node.task.status = TaskStatus::Scheduled;
                    node.task.submitted_at = Some(at);
                    advance.ready.push(node.task.clone());
                }
                TaskStatus::Created => {
                    node.task.status = TaskStatus::Waiting;
                    advance.updated.push(node.task.clone());
                }
                _ => {}
            }
        }

        sort_by_ordinal(&mut advance.ready);
        sort_by_ordinal(&mut advance.updated);
        sort_by_ordinal(&mut advance.in_flight);

        debug!(
            %job_id,
            tracked = graph.nodes.len(),
            ready = advance.ready.len(),
            "registered job"
        );
        if !graph.nodes.is_empty() {
            self.jobs.insert(job_id, Arc::new(Mutex::new(graph)));
        }
        advance
    }

    /// Record a terminal outcome for an in-flight task and propagate it.
    ///
    /// On success every dependent's unresolved count drops by one and the
    /// dependents reaching zero become ready. On failure (or skip) every
    /// transitive dependent is marked SKIPPED with a message naming the task
    /// that did not succeed.
    ///
    /// Returns `None`, changing nothing, when the task is unknown, already
    /// terminal, or was never dispatched.
    pub fn on_task_terminal(
        &self,
        id: &TaskId,
        status: TaskStatus,
        message: Option<String>,
        at: DateTime<Utc>,
    ) -> Option<Advance> {
        debug_assert!(status.is_terminal());
        let graph = self.graph(id.job_id)?;
        let mut graph = lock(&graph);

        match graph.nodes.get(&id.name) {
            None => return None,
            Some(node) if !node.task.status.is_in_flight() => {
                warn!(task = %id, status = %node.task.status, "ignoring outcome for a task that was never dispatched");
                return None;
            }
            Some(_) => {}
        }
        let mut node = graph.nodes.remove(&id.name)?;

        node.task.status = status;
        node.task.status_message = message;
        node.task.completed_at = Some(at);

        let mut advance = Advance::default();
        if status == TaskStatus::Successful {
            for name in &node.dependents {
                let Some(dependent) = graph.nodes.get_mut(name) else { continue };
                dependent.unresolved = dependent.unresolved.saturating_sub(1);
                if dependent.unresolved == 0 && !dependent.task.status.is_in_flight() {
                    dependent.task.status = TaskStatus::Scheduled;
                    dependent.task.submitted_at = Some(at);
                    advance.ready.push(dependent.task.clone());
                }
            }
            sort_by_ordinal(&mut advance.ready);
        } else {
            skip_downstream_of(&mut graph, &node.dependents, &id.name, at, &mut advance);
        }
        advance.updated.insert(0, node.task);

        if graph.nodes.is_empty() {
            drop(graph);
            self.jobs.remove(&id.job_id);
        }
        Some(advance)
    }

    /// Move a SCHEDULED task to RUNNING after the executor acknowledged it.
    pub fn mark_running(&self, id: &TaskId, at: DateTime<Utc>) -> Option<Task> {
        let graph = self.graph(id.job_id)?;
        let mut graph = lock(&graph);
        let node = graph.nodes.get_mut(&id.name)?;
        if node.task.status != TaskStatus::Scheduled {
            return None;
        }
        node.task.status = TaskStatus::Running;
        node.task.submitted_at.get_or_insert(at);
        Some(node.task.clone())
    }

    /// Stop tracking a job, returning the tasks that were still pending.
    pub fn remove_job(&self, job_id: Uuid) -> Vec<Task> {
        let Some((_, graph)) = self.jobs.remove(&job_id) else {
            return Vec::new();
        };
        let mut graph = lock(&graph);
        let mut tasks: Vec<Task> = graph.nodes.drain().map(|(_, n)| n.task).collect();
        sort_by_ordinal(&mut tasks);
        tasks
    }

    /// A copy of a tracked task as the provider currently sees it.
    pub fn task(&self, id: &TaskId) -> Option<Task> {
        let graph = self.graph(id.job_id)?;
        let graph = lock(&graph);
        graph.nodes.get(&id.name).map(|n| n.task.clone())
    }

    /// Current status of a tracked task.
    pub fn status(&self, id: &TaskId) -> Option<TaskStatus> {
        let graph = self.graph(id.job_id)?;
        let graph = lock(&graph);
        graph.nodes.get(&id.name).map(|n| n.task.status)
    }

    pub fn contains_job(&self, job_id: Uuid) -> bool {
        self.jobs.contains_key(&job_id)
    }

    /// Number of tracked (non-terminal) tasks across all jobs.
    pub fn size(&self) -> usize {
        let graphs: Vec<Arc<Mutex<JobGraph>>> =
            self.jobs.iter().map(|g| Arc::clone(g.value())).collect();
        graphs.iter().map(|g| lock(g).nodes.len()).sum()
    }

    /// Drop all tracking state. Must be followed by reloading non-terminal
    /// jobs from the store before dispatch resumes.
    pub fn reinit(&self) {
        self.jobs.clear();
    }
}

/// Mark every tracked task reachable from `roots` (inclusive) over reverse
/// edges as SKIPPED. Uses an explicit worklist so deep graphs cannot
/// overflow the stack.
fn skip_downstream_of(
    graph: &mut JobGraph,
    roots: &[String],
    ancestor: &str,
    at: DateTime<Utc>,
    advance: &mut Advance,
) {
    let mut worklist: VecDeque<String> = roots.iter().cloned().collect();
    while let Some(name) = worklist.pop_front() {
        let Some(mut node) = graph.nodes.remove(&name) else { continue };
        node.task.status = TaskStatus::Skipped;
        node.task.status_message = Some(dependency_failed(ancestor));
        node.task.completed_at = Some(at);
        worklist.extend(node.dependents.iter().cloned());
        advance.updated.push(node.task);
    }
}

fn sort_by_ordinal(tasks: &mut [Task]) {
    tasks.sort_by(|a, b| a.ordinal.cmp(&b.ordinal).then_with(|| a.name.cmp(&b.name)));
}
