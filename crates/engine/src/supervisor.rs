//! Timeout supervision for dispatched tasks.
//!
//! Every SCHEDULED or RUNNING task is watched until it finishes. Deadlines
//! are stored on the task as wall-clock instants, but the watch list converts
//! them to tokio's monotonic clock when the watch is registered, so wall-clock
//! adjustments cannot fire or delay a timeout.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::clock::Clock;
use crate::models::{Task, TaskId};

#[derive(Default)]
struct Watches {
    by_deadline: BTreeSet<(Instant, TaskId)>,
    by_task: HashMap<TaskId, Instant>,
}

impl Watches {
    fn remove(&mut self, id: &TaskId) -> bool {
        match self.by_task.remove(id) {
            Some(deadline) => {
                self.by_deadline.remove(&(deadline, id.clone()));
                true
            }
            None => false,
        }
    }
}

pub struct TimeoutSupervisor {
    watches: Mutex<Watches>,
    changed: Notify,
    clock: Arc<dyn Clock>,
}

impl TimeoutSupervisor {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            watches: Mutex::new(Watches::default()),
            changed: Notify::new(),
            clock,
        }
    }

    fn watches(&self) -> MutexGuard<'_, Watches> {
        self.watches.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Watch `task` against its `timeout_at`. Re-watching a task replaces
    /// its previous deadline.
    pub fn watch(&self, task: &Task) {
        let remaining = (task.timeout_at - self.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let deadline = Instant::now() + remaining;
        let id = task.id();

        let earliest = {
            let mut watches = self.watches();
            watches.remove(&id);
            watches.by_task.insert(id.clone(), deadline);
            watches.by_deadline.insert((deadline, id.clone()));
            watches.by_deadline.first().map(|(d, _)| *d) == Some(deadline)
        };
        debug!(task = %id, ?remaining, "watching task deadline");
        if earliest {
            self.changed.notify_one();
        }
    }

    pub fn unwatch(&self, id: &TaskId) -> bool {
        self.watches().remove(id)
    }

    /// Drop every watch belonging to a job; returns how many were removed.
    pub fn unwatch_job(&self, job_id: Uuid) -> usize {
        let mut watches = self.watches();
        let ids: Vec<TaskId> = watches
            .by_task
            .keys()
            .filter(|id| id.job_id == job_id)
            .cloned()
            .collect();
        ids.iter().filter(|id| watches.remove(id)).count()
    }

    pub fn is_watched(&self, id: &TaskId) -> bool {
        self.watches().by_task.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.watches().by_task.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.watches().by_deadline.first().map(|(d, _)| *d)
    }

    /// Remove and return every watch whose deadline is at or before `now`.
    pub fn take_expired(&self, now: Instant) -> Vec<TaskId> {
        let mut watches = self.watches();
        let mut expired = Vec::new();
        while let Some((deadline, _)) = watches.by_deadline.first() {
            if *deadline > now {
                break;
            }
            if let Some((_, id)) = watches.by_deadline.pop_first() {
                watches.by_task.remove(&id);
                expired.push(id);
            }
        }
        expired
    }

    /// Wait until at least one watched task is past its deadline.
    ///
    /// Sleeps until the nearest deadline, waking early when a nearer one is
    /// registered, and never longer than `scan_interval`.
    pub async fn next_expired(&self, scan_interval: Duration) -> Vec<TaskId> {
        loop {
            let now = Instant::now();
            let expired = self.take_expired(now);
            if !expired.is_empty() {
                return expired;
            }
            let cap = now + scan_interval;
            let wake = self.next_deadline().map_or(cap, |d| d.min(cap));
            tokio::select! {
                _ = tokio::time::sleep_until(wake) => {}
                _ = self.changed.notified() => {}
            }
        }
    }
}
