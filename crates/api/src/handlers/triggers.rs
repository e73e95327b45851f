use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use engine::{EngineError, Schedule, WorkflowId, WorkflowTrigger, WorkflowTriggerId};
use serde::Deserialize;

use crate::{ApiError, AppState};

/// Schedule and validity window of a trigger.
#[derive(Debug, Deserialize)]
pub struct TriggerBody {
    #[serde(default)]
    pub schedule: Option<Schedule>,
    #[serde(default)]
    pub start_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_at: Option<DateTime<Utc>>,
}

impl TriggerBody {
    fn into_trigger(self, id: WorkflowTriggerId) -> WorkflowTrigger {
        WorkflowTrigger {
            namespace: id.namespace,
            workflow: id.workflow,
            name: id.name,
            schedule: self.schedule,
            start_at: self.start_at,
            end_at: self.end_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateTrigger {
    pub name: String,
    #[serde(flatten)]
    pub body: TriggerBody,
}

pub async fn create_trigger(
    State(state): State<AppState>,
    Path((ns, workflow)): Path<(String, String)>,
    Json(req): Json<CreateTrigger>,
) -> Result<(StatusCode, Json<WorkflowTrigger>), ApiError> {
    let trigger = req.body.into_trigger(WorkflowTriggerId::new(ns, workflow, req.name));
    state.services.triggers.add(trigger.clone()).await?;
    Ok((StatusCode::CREATED, Json(trigger)))
}

pub async fn list_triggers(
    State(state): State<AppState>,
    Path((ns, workflow)): Path<(String, String)>,
) -> Result<Json<Vec<WorkflowTrigger>>, ApiError> {
    let id = WorkflowId::new(ns, workflow);
    Ok(Json(state.services.triggers.list_by_workflow(&id).await?))
}

pub async fn list_namespace_triggers(
    State(state): State<AppState>,
    Path(ns): Path<String>,
) -> Result<Json<Vec<WorkflowTrigger>>, ApiError> {
    Ok(Json(state.services.triggers.list_by_namespace(&ns).await?))
}

pub async fn get_trigger(
    State(state): State<AppState>,
    Path((ns, workflow, name)): Path<(String, String, String)>,
) -> Result<Json<WorkflowTrigger>, ApiError> {
    let id = WorkflowTriggerId::new(ns, workflow, name);
    match state.services.triggers.get(&id).await? {
        Some(trigger) => Ok(Json(trigger)),
        None => Err(EngineError::UnknownTrigger(id).into()),
    }
}

pub async fn update_trigger(
    State(state): State<AppState>,
    Path((ns, workflow, name)): Path<(String, String, String)>,
    Json(body): Json<TriggerBody>,
) -> Result<Json<WorkflowTrigger>, ApiError> {
    let trigger = body.into_trigger(WorkflowTriggerId::new(ns, workflow, name));
    state.services.triggers.update(trigger.clone()).await?;
    Ok(Json(trigger))
}

pub async fn delete_trigger(
    State(state): State<AppState>,
    Path((ns, workflow, name)): Path<(String, String, String)>,
) -> Result<StatusCode, ApiError> {
    let id = WorkflowTriggerId::new(ns, workflow, name);
    if state.services.triggers.delete(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(EngineError::UnknownTrigger(id).into())
    }
}
