use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use engine::{EngineError, Job, Task, WorkflowId, WorkflowTriggerId};
use serde::Deserialize;
use uuid::Uuid;

use crate::{ApiError, AppState};

/// Filters for the job listing. `from`/`to` bound `created_at` and default
/// to the Unix epoch and now.
#[derive(Debug, Default, Deserialize)]
pub struct JobQuery {
    pub workflow: Option<String>,
    pub trigger: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

pub async fn list_jobs(
    State(state): State<AppState>,
    Path(ns): Path<String>,
    Query(query): Query<JobQuery>,
) -> Result<Json<Vec<Job>>, ApiError> {
    let from = query.from.unwrap_or_default();
    let to = query.to.unwrap_or_else(Utc::now);
    let jobs = &state.services.jobs;

    let found = match (query.workflow, query.trigger) {
        (None, None) => jobs
            .list_by_namespace(&ns)
            .await?
            .into_iter()
            .filter(|job| job.created_at >= from && job.created_at <= to)
            .collect(),
        (Some(workflow), None) => {
            jobs.list_by_workflow(&WorkflowId::new(ns, workflow), from, to).await?
        }
        (Some(workflow), Some(trigger)) => {
            jobs.list_by_trigger(&WorkflowTriggerId::new(ns, workflow, trigger), from, to)
                .await?
        }
        (None, Some(_)) => {
            return Err(ApiError::BadRequest("'trigger' filter requires 'workflow'".into()))
        }
    };
    Ok(Json(found))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path((ns, id)): Path<(String, Uuid)>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(job_in_namespace(&state, &ns, id).await?))
}

pub async fn list_job_tasks(
    State(state): State<AppState>,
    Path((ns, id)): Path<(String, Uuid)>,
) -> Result<Json<Vec<Task>>, ApiError> {
    job_in_namespace(&state, &ns, id).await?;
    Ok(Json(state.services.jobs.tasks(id).await?))
}

pub async fn delete_job(
    State(state): State<AppState>,
    Path((ns, id)): Path<(String, Uuid)>,
) -> Result<StatusCode, ApiError> {
    job_in_namespace(&state, &ns, id).await?;
    state.services.jobs.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Jobs of other namespaces are reported as unknown.
async fn job_in_namespace(state: &AppState, ns: &str, id: Uuid) -> Result<Job, ApiError> {
    match state.services.jobs.get(id).await? {
        Some(job) if job.namespace == ns => Ok(job),
        _ => Err(EngineError::UnknownJob(id).into()),
    }
}
