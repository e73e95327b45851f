//! Trigger scheduling.
//!
//! [`TriggerScheduler`] owns the lifecycle of triggers (validated, bound to
//! the fire-time facility, persisted) and [`CronTimer`] is the in-process
//! fire-time facility. Each registered trigger gets its own timer task that
//! awaits the firing callback before computing the next fire time, so two
//! firings of one trigger never overlap while different triggers fire
//! concurrently. Unscheduling a trigger stops its timer at the next wait,
//! never in the middle of a firing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, instrument, warn};

use crate::clock::Clock;
use crate::dag::{validate_trigger, validate_workflow};
use crate::models::{WorkflowId, WorkflowTrigger, WorkflowTriggerId};
use crate::schedule::next_fire_time;
use crate::store::{TriggerStore, WorkflowStore};
use crate::{EngineError, StoreError};

/// Callback invoked on every trigger firing.
#[async_trait]
pub trait FireHandler: Send + Sync {
    async fn on_fire(&self, trigger: &WorkflowTrigger, fired_at: DateTime<Utc>);
}

/// A facility that calls a [`FireHandler`] at a trigger's fire times.
pub trait FireTimer: Send + Sync {
    /// Fails if the trigger is already registered or its schedule is unusable.
    fn register(&self, trigger: &WorkflowTrigger, handler: Arc<dyn FireHandler>) -> Result<(), EngineError>;
    /// Returns whether the trigger was registered.
    fn unregister(&self, id: &WorkflowTriggerId) -> bool;
    fn is_registered(&self, id: &WorkflowTriggerId) -> bool;
}

// ---------------------------------------------------------------------------
// CronTimer
// ---------------------------------------------------------------------------

/// Tokio-driven fire-time facility for cron and fixed schedules.
///
/// Unregistering a trigger cancels its timer between firings only: a firing
/// already in progress runs to completion. Firings of the same trigger id
/// are serialized across re-registration, so an update never lets the new
/// schedule overlap the tail of the old one.
pub struct CronTimer {
    clock: Arc<dyn Clock>,
    timers: DashMap<WorkflowTriggerId, watch::Sender<bool>>,
    firing: Arc<DashMap<WorkflowTriggerId, Arc<Mutex<()>>>>,
}

impl CronTimer {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock, timers: DashMap::new(), firing: Arc::new(DashMap::new()) }
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

impl FireTimer for CronTimer {
    fn register(&self, trigger: &WorkflowTrigger, handler: Arc<dyn FireHandler>) -> Result<(), EngineError> {
        validate_trigger(trigger)?;
        match self.timers.entry(trigger.id()) {
            Entry::Occupied(entry) => Err(EngineError::Schedule(format!(
                "trigger '{}' is already registered",
                entry.key()
            ))),
            Entry::Vacant(entry) => {
                let (cancel_tx, cancel_rx) = watch::channel(false);
                let timer = Timer {
                    trigger: trigger.clone(),
                    handler,
                    clock: Arc::clone(&self.clock),
                    cancel: cancel_rx,
                    firing: Arc::clone(&self.firing),
                };
                tokio::spawn(timer.run());
                entry.insert(cancel_tx);
                debug!(trigger = %trigger.id(), "timer registered");
                Ok(())
            }
        }
    }

    fn unregister(&self, id: &WorkflowTriggerId) -> bool {
        match self.timers.remove(id) {
            Some((_, cancel)) => {
                // The timer may have exhausted its schedule already.
                let _ = cancel.send(true);
                debug!(trigger = %id, "timer unregistered");
                true
            }
            None => false,
        }
    }

    fn is_registered(&self, id: &WorkflowTriggerId) -> bool {
        self.timers.contains_key(id)
    }
}

/// One trigger's timer task. Dropping the sender side of `cancel` stops it
/// as well, which is how a dropped [`CronTimer`] winds its timers down.
struct Timer {
    trigger: WorkflowTrigger,
    handler: Arc<dyn FireHandler>,
    clock: Arc<dyn Clock>,
    cancel: watch::Receiver<bool>,
    firing: Arc<DashMap<WorkflowTriggerId, Arc<Mutex<()>>>>,
}

impl Timer {
    async fn run(mut self) {
        let id = self.trigger.id();
        let firing = Arc::clone(self.firing.entry(id.clone()).or_default().value());
        let mut after = self.clock.now();

        while let Some(fire_at) = next_fire_time(&self.trigger, after) {
            let wait = (fire_at - self.clock.now()).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.cancel.changed() => break,
            }

            // The handler is awaited outside the select so cancellation
            // never interrupts a firing halfway through.
            let _firing = firing.lock().await;
            if self.cancelled() {
                break;
            }
            debug!(trigger = %id, %fire_at, "trigger fired");
            self.handler.on_fire(&self.trigger, fire_at).await;
            after = fire_at;
        }
        drop(firing);
        self.firing.remove_if(&id, |_, lock| Arc::strong_count(lock) == 1);
        debug!(trigger = %id, "timer stopped");
    }

    fn cancelled(&self) -> bool {
        *self.cancel.borrow() || self.cancel.has_changed().is_err()
    }
}

// ---------------------------------------------------------------------------
// TriggerScheduler
// ---------------------------------------------------------------------------

pub struct TriggerScheduler {
    timer: Arc<dyn FireTimer>,
    workflows: Arc<dyn WorkflowStore>,
    triggers: Arc<dyn TriggerStore>,
    handler: Arc<dyn FireHandler>,
}

impl TriggerScheduler {
    pub fn new(
        timer: Arc<dyn FireTimer>,
        workflows: Arc<dyn WorkflowStore>,
        triggers: Arc<dyn TriggerStore>,
        handler: Arc<dyn FireHandler>,
    ) -> Self {
        Self { timer, workflows, triggers, handler }
    }

    async fn check(&self, trigger: &WorkflowTrigger) -> Result<(), EngineError> {
        let workflow_id = trigger.workflow_id();
        let workflow = self
            .workflows
            .load(&workflow_id)
            .await?
            .ok_or(EngineError::UnknownWorkflow(workflow_id))?;
        validate_workflow(&workflow)?;
        validate_trigger(trigger)?;
        Ok(())
    }

    /// Validate, schedule and persist a new trigger.
    #[instrument(skip(self, trigger), fields(trigger = %trigger.id()))]
    pub async fn add(&self, trigger: WorkflowTrigger) -> Result<(), EngineError> {
        let id = trigger.id();
        self.check(&trigger).await?;
        if self.triggers.load(&id).await?.is_some() {
            return Err(StoreError::AlreadyExists(id.to_string()).into());
        }

        self.timer.register(&trigger, Arc::clone(&self.handler))?;
        if let Err(e) = self.triggers.store(&trigger).await {
            self.timer.unregister(&id);
            return Err(e.into());
        }
        info!("trigger scheduled");
        Ok(())
    }

    /// Replace an existing trigger's schedule.
    #[instrument(skip(self, trigger), fields(trigger = %trigger.id()))]
    pub async fn update(&self, trigger: WorkflowTrigger) -> Result<(), EngineError> {
        let id = trigger.id();
        if self.triggers.load(&id).await?.is_none() {
            return Err(EngineError::UnknownTrigger(id));
        }
        self.check(&trigger).await?;

        self.timer.unregister(&id);
        self.timer.register(&trigger, Arc::clone(&self.handler))?;
        self.triggers.store(&trigger).await?;
        info!("trigger rescheduled");
        Ok(())
    }

    /// Unschedule and remove a trigger. Returns whether anything was removed;
    /// deleting an unknown trigger is not an error.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &WorkflowTriggerId) -> Result<bool, EngineError> {
        let unscheduled = self.timer.unregister(id);
        let removed = match self.triggers.delete(id).await {
            Ok(()) => true,
            Err(StoreError::NotFound(_)) => false,
            Err(e) => return Err(e.into()),
        };
        if unscheduled || removed {
            info!("trigger deleted");
        }
        Ok(unscheduled || removed)
    }

    /// Delete every trigger of a workflow; returns how many were removed.
    pub async fn delete_for_workflow(&self, workflow: &WorkflowId) -> Result<usize, EngineError> {
        let mut removed = 0;
        for trigger in self.triggers.load_by_workflow(workflow).await? {
            if self.delete(&trigger.id()).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub async fn get(&self, id: &WorkflowTriggerId) -> Result<Option<WorkflowTrigger>, EngineError> {
        Ok(self.triggers.load(id).await?)
    }

    pub async fn list_by_namespace(&self, namespace: &str) -> Result<Vec<WorkflowTrigger>, EngineError> {
        Ok(self.triggers.load_by_namespace(namespace).await?)
    }

    pub async fn list_by_workflow(&self, workflow: &WorkflowId) -> Result<Vec<WorkflowTrigger>, EngineError> {
        Ok(self.triggers.load_by_workflow(workflow).await?)
    }

    pub fn is_scheduled(&self, id: &WorkflowTriggerId) -> bool {
        self.timer.is_registered(id)
    }

    /// Re-register every stored trigger after a restart. Triggers that no
    /// longer validate are logged and left unscheduled.
    pub async fn restore(&self) -> Result<usize, EngineError> {
        let mut restored = 0;
        for trigger in self.triggers.load_all().await? {
            let id = trigger.id();
            if self.timer.is_registered(&id) {
                continue;
            }
            match self.timer.register(&trigger, Arc::clone(&self.handler)) {
                Ok(()) => restored += 1,
                Err(e) => warn!(trigger = %id, error = %e, "stored trigger could not be rescheduled"),
            }
        }
        info!(restored, "triggers restored");
        Ok(restored)
    }
}
