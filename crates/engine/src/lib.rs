//! `engine` crate: domain models, definition validation, and the scheduling
//! core that turns trigger firings into jobs and drives their tasks to a
//! terminal status.

pub mod aggregator;
pub mod clock;
pub mod config;
pub mod dag;
pub mod error;
pub mod expander;
pub mod gateway;
pub mod models;
pub mod provider;
pub mod schedule;
pub mod scheduler;
pub mod services;
pub mod store;
pub mod supervisor;
pub mod trigger;

pub use aggregator::{JobCompleted, StatusAggregator};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SchedulerConfig;
pub use dag::{resolve_order, validate_trigger, validate_workflow};
pub use error::{EngineError, StoreError, ValidationError};
pub use models::{
    Job, JobStatus, Schedule, Task, TaskId, TaskStatus, Workflow, WorkflowId, WorkflowTask,
    WorkflowTrigger, WorkflowTriggerId,
};
pub use provider::TaskProvider;
pub use scheduler::TaskScheduler;
pub use services::{JobService, Services, WorkflowService};
pub use store::{JobStore, MemoryStore, Stores, TaskStore, TriggerStore, WorkflowStore};
pub use supervisor::TimeoutSupervisor;
pub use trigger::{CronTimer, FireHandler, FireTimer, TriggerScheduler};
