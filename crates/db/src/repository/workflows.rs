//! Workflow CRUD operations.

use chrono::Utc;
use engine::{Workflow, WorkflowId};
use sqlx::PgPool;

use crate::{models::WorkflowRow, DbError};

/// Insert a workflow, replacing the definition stored under the same
/// namespace and name.
pub async fn upsert_workflow(pool: &PgPool, workflow: &Workflow) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO workflows (namespace, name, definition, updated_at)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (namespace, name)
        DO UPDATE SET definition = EXCLUDED.definition, updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(&workflow.namespace)
    .bind(&workflow.name)
    .bind(serde_json::to_value(workflow)?)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_workflow(pool: &PgPool, id: &WorkflowId) -> Result<Option<Workflow>, DbError> {
    sqlx::query_as::<_, WorkflowRow>(
        r#"SELECT namespace, name, definition, updated_at FROM workflows WHERE namespace = $1 AND name = $2"#,
    )
    .bind(&id.namespace)
    .bind(&id.name)
    .fetch_optional(pool)
    .await?
    .map(Workflow::try_from)
    .transpose()
}

/// All workflows of a namespace ordered by name.
pub async fn list_workflows(pool: &PgPool, namespace: &str) -> Result<Vec<Workflow>, DbError> {
    sqlx::query_as::<_, WorkflowRow>(
        r#"SELECT namespace, name, definition, updated_at FROM workflows WHERE namespace = $1 ORDER BY name"#,
    )
    .bind(namespace)
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(Workflow::try_from)
    .collect()
}

/// Returns `DbError::NotFound` if no row was deleted.
pub async fn delete_workflow(pool: &PgPool, id: &WorkflowId) -> Result<(), DbError> {
    let result = sqlx::query("DELETE FROM workflows WHERE namespace = $1 AND name = $2")
        .bind(&id.namespace)
        .bind(&id.name)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound(id.to_string()));
    }
    Ok(())
}
