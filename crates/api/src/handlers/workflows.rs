use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use engine::{EngineError, Workflow, WorkflowId, WorkflowTask};
use serde::Deserialize;

use crate::{ApiError, AppState};

/// Workflow definition as submitted; the namespace comes from the path.
#[derive(Debug, Deserialize)]
pub struct WorkflowBody {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tasks: Vec<WorkflowTask>,
}

pub async fn create_workflow(
    State(state): State<AppState>,
    Path(ns): Path<String>,
    Json(body): Json<WorkflowBody>,
) -> Result<(StatusCode, Json<Workflow>), ApiError> {
    let workflow = Workflow {
        namespace: ns,
        name: body.name,
        description: body.description,
        tasks: body.tasks,
    };
    state.services.workflows.save(workflow.clone()).await?;
    Ok((StatusCode::CREATED, Json(workflow)))
}

pub async fn list_workflows(
    State(state): State<AppState>,
    Path(ns): Path<String>,
) -> Result<Json<Vec<Workflow>>, ApiError> {
    Ok(Json(state.services.workflows.list(&ns).await?))
}

pub async fn get_workflow(
    State(state): State<AppState>,
    Path((ns, name)): Path<(String, String)>,
) -> Result<Json<Workflow>, ApiError> {
    let id = WorkflowId::new(ns, name);
    match state.services.workflows.get(&id).await? {
        Some(workflow) => Ok(Json(workflow)),
        None => Err(EngineError::UnknownWorkflow(id).into()),
    }
}

pub async fn delete_workflow(
    State(state): State<AppState>,
    Path((ns, name)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    state.services.workflows.delete(&WorkflowId::new(ns, name)).await?;
    Ok(StatusCode::NO_CONTENT)
}
