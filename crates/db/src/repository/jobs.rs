//! Job repository functions.
//!
//! Every listing is ordered by `created_at`. Deleting a job cascades to its
//! tasks through the `tasks.job_id` foreign key.

use chrono::{DateTime, Utc};
use engine::{Job, JobStatus, WorkflowId, WorkflowTriggerId};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{models::JobRow, DbError};

const COLUMNS: &str = "id, namespace, workflow, trigger, status, created_at, completed_at";

/// Insert a new job. Returns `DbError::AlreadyExists` on a duplicate id.
pub async fn insert_job(pool: &PgPool, job: &Job) -> Result<(), DbError> {
    let result = sqlx::query(
        r#"
        INSERT INTO jobs (id, namespace, workflow, trigger, status, created_at, completed_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(job.id)
    .bind(&job.namespace)
    .bind(&job.workflow)
    .bind(&job.trigger)
    .bind(job.status.to_string())
    .bind(job.created_at)
    .bind(job.completed_at)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::AlreadyExists(job.id.to_string()));
    }
    Ok(())
}

/// Persist a job's status and completion time.
pub async fn update_job(pool: &PgPool, job: &Job) -> Result<(), DbError> {
    let result = sqlx::query("UPDATE jobs SET status = $1, completed_at = $2 WHERE id = $3")
        .bind(job.status.to_string())
        .bind(job.completed_at)
        .bind(job.id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound(job.id.to_string()));
    }
    Ok(())
}

pub async fn get_job(pool: &PgPool, id: Uuid) -> Result<Option<Job>, DbError> {
    let sql = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
    sqlx::query_as::<_, JobRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .map(Job::try_from)
        .transpose()
}

pub async fn list_jobs_by_namespace(pool: &PgPool, namespace: &str) -> Result<Vec<Job>, DbError> {
    let sql = format!("SELECT {COLUMNS} FROM jobs WHERE namespace = $1 ORDER BY created_at");
    collect(sqlx::query_as::<_, JobRow>(&sql).bind(namespace).fetch_all(pool).await?)
}

/// Jobs of a workflow created within `[from, to]`.
pub async fn list_jobs_by_workflow(
    pool: &PgPool,
    workflow: &WorkflowId,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<Job>, DbError> {
    let sql = format!(
        "SELECT {COLUMNS} FROM jobs
         WHERE namespace = $1 AND workflow = $2 AND created_at BETWEEN $3 AND $4
         ORDER BY created_at"
    );
    collect(
        sqlx::query_as::<_, JobRow>(&sql)
            .bind(&workflow.namespace)
            .bind(&workflow.name)
            .bind(from)
            .bind(to)
            .fetch_all(pool)
            .await?,
    )
}

/// Jobs of a trigger created within `[from, to]`.
pub async fn list_jobs_by_trigger(
    pool: &PgPool,
    trigger: &WorkflowTriggerId,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<Job>, DbError> {
    let sql = format!(
        "SELECT {COLUMNS} FROM jobs
         WHERE namespace = $1 AND workflow = $2 AND trigger = $3 AND created_at BETWEEN $4 AND $5
         ORDER BY created_at"
    );
    collect(
        sqlx::query_as::<_, JobRow>(&sql)
            .bind(&trigger.namespace)
            .bind(&trigger.workflow)
            .bind(&trigger.name)
            .bind(from)
            .bind(to)
            .fetch_all(pool)
            .await?,
    )
}

pub async fn list_jobs_by_status(pool: &PgPool, statuses: &[JobStatus]) -> Result<Vec<Job>, DbError> {
    let statuses: Vec<String> = statuses.iter().map(ToString::to_string).collect();
    let sql = format!("SELECT {COLUMNS} FROM jobs WHERE status = ANY($1) ORDER BY created_at");
    collect(sqlx::query_as::<_, JobRow>(&sql).bind(statuses).fetch_all(pool).await?)
}

/// Delete a job and, through the foreign key, all of its tasks.
///
/// Returns `DbError::NotFound` if no row was deleted.
pub async fn delete_job(pool: &PgPool, id: Uuid) -> Result<(), DbError> {
    let result = sqlx::query("DELETE FROM jobs WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound(id.to_string()));
    }
    Ok(())
}

fn collect(rows: Vec<JobRow>) -> Result<Vec<Job>, DbError> {
    rows.into_iter().map(Job::try_from).collect()
}
