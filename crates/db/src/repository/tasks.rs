//! Task repository functions.

use engine::{Task, TaskId};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{models::TaskRow, DbError};

const COLUMNS: &str = "job_id, name, namespace, workflow, task_type, properties, depends_on, ordinal, \
                       status, status_message, timeout_at, created_at, submitted_at, completed_at";

/// Insert a new task. Returns `DbError::AlreadyExists` if the job already
/// owns a task with that name.
pub async fn insert_task(pool: &PgPool, task: &Task) -> Result<(), DbError> {
    let result = sqlx::query(
        r#"
        INSERT INTO tasks (job_id, name, namespace, workflow, task_type, properties, depends_on, ordinal,
                           status, status_message, timeout_at, created_at, submitted_at, completed_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        ON CONFLICT (job_id, name) DO NOTHING
        "#,
    )
    .bind(task.job_id)
    .bind(&task.name)
    .bind(&task.namespace)
    .bind(&task.workflow)
    .bind(&task.task_type)
    .bind(&task.properties)
    .bind(&task.depends_on)
    .bind(i32::try_from(task.ordinal).unwrap_or(i32::MAX))
    .bind(task.status.to_string())
    .bind(&task.status_message)
    .bind(task.timeout_at)
    .bind(task.created_at)
    .bind(task.submitted_at)
    .bind(task.completed_at)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::AlreadyExists(task.id().to_string()));
    }
    Ok(())
}

/// Persist a task's lifecycle fields.
pub async fn update_task(pool: &PgPool, task: &Task) -> Result<(), DbError> {
    let result = sqlx::query(
        r#"
        UPDATE tasks
        SET status = $1, status_message = $2, submitted_at = $3, completed_at = $4
        WHERE job_id = $5 AND name = $6
        "#,
    )
    .bind(task.status.to_string())
    .bind(&task.status_message)
    .bind(task.submitted_at)
    .bind(task.completed_at)
    .bind(task.job_id)
    .bind(&task.name)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound(task.id().to_string()));
    }
    Ok(())
}

pub async fn get_task(pool: &PgPool, id: &TaskId) -> Result<Option<Task>, DbError> {
    let sql = format!("SELECT {COLUMNS} FROM tasks WHERE job_id = $1 AND name = $2 AND namespace = $3");
    sqlx::query_as::<_, TaskRow>(&sql)
        .bind(id.job_id)
        .bind(&id.name)
        .bind(&id.namespace)
        .fetch_optional(pool)
        .await?
        .map(Task::try_from)
        .transpose()
}

/// Tasks of a job in declaration order.
pub async fn list_tasks_by_job(pool: &PgPool, job_id: Uuid) -> Result<Vec<Task>, DbError> {
    let sql = format!("SELECT {COLUMNS} FROM tasks WHERE job_id = $1 ORDER BY ordinal, name");
    sqlx::query_as::<_, TaskRow>(&sql)
        .bind(job_id)
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(Task::try_from)
        .collect()
}
