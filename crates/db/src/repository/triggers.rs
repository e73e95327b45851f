//! Trigger CRUD operations.

use engine::{WorkflowId, WorkflowTrigger, WorkflowTriggerId};
use sqlx::PgPool;

use crate::{models::TriggerRow, DbError};

const COLUMNS: &str = "namespace, workflow, name, schedule, start_at, end_at";

pub async fn upsert_trigger(pool: &PgPool, trigger: &WorkflowTrigger) -> Result<(), DbError> {
    let schedule = trigger.schedule.as_ref().map(serde_json::to_value).transpose()?;
    sqlx::query(
        r#"
        INSERT INTO workflow_triggers (namespace, workflow, name, schedule, start_at, end_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (namespace, workflow, name)
        DO UPDATE SET schedule = EXCLUDED.schedule,
                      start_at = EXCLUDED.start_at,
                      end_at   = EXCLUDED.end_at
        "#,
    )
    .bind(&trigger.namespace)
    .bind(&trigger.workflow)
    .bind(&trigger.name)
    .bind(schedule)
    .bind(trigger.start_at)
    .bind(trigger.end_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_trigger(pool: &PgPool, id: &WorkflowTriggerId) -> Result<Option<WorkflowTrigger>, DbError> {
    let sql = format!(
        "SELECT {COLUMNS} FROM workflow_triggers WHERE namespace = $1 AND workflow = $2 AND name = $3"
    );
    sqlx::query_as::<_, TriggerRow>(&sql)
        .bind(&id.namespace)
        .bind(&id.workflow)
        .bind(&id.name)
        .fetch_optional(pool)
        .await?
        .map(WorkflowTrigger::try_from)
        .transpose()
}

pub async fn list_all_triggers(pool: &PgPool) -> Result<Vec<WorkflowTrigger>, DbError> {
    let sql = format!("SELECT {COLUMNS} FROM workflow_triggers ORDER BY namespace, workflow, name");
    collect(sqlx::query_as::<_, TriggerRow>(&sql).fetch_all(pool).await?)
}

pub async fn list_triggers_by_namespace(pool: &PgPool, namespace: &str) -> Result<Vec<WorkflowTrigger>, DbError> {
    let sql = format!(
        "SELECT {COLUMNS} FROM workflow_triggers WHERE namespace = $1 ORDER BY workflow, name"
    );
    collect(
        sqlx::query_as::<_, TriggerRow>(&sql)
            .bind(namespace)
            .fetch_all(pool)
            .await?,
    )
}

pub async fn list_triggers_by_workflow(pool: &PgPool, workflow: &WorkflowId) -> Result<Vec<WorkflowTrigger>, DbError> {
    let sql = format!(
        "SELECT {COLUMNS} FROM workflow_triggers WHERE namespace = $1 AND workflow = $2 ORDER BY name"
    );
    collect(
        sqlx::query_as::<_, TriggerRow>(&sql)
            .bind(&workflow.namespace)
            .bind(&workflow.name)
            .fetch_all(pool)
            .await?,
    )
}

/// Returns `DbError::NotFound` if no row was deleted.
pub async fn delete_trigger(pool: &PgPool, id: &WorkflowTriggerId) -> Result<(), DbError> {
    let result = sqlx::query(
        "DELETE FROM workflow_triggers WHERE namespace = $1 AND workflow = $2 AND name = $3",
    )
    .bind(&id.namespace)
    .bind(&id.workflow)
    .bind(&id.name)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound(id.to_string()));
    }
    Ok(())
}

fn collect(rows: Vec<TriggerRow>) -> Result<Vec<WorkflowTrigger>, DbError> {
    rows.into_iter().map(WorkflowTrigger::try_from).collect()
}
