//! Repository for the `executions` table.
//!
//! Status transitions are guarded in SQL so a stale writer can never move
//! a job backwards: `mark_processing` only fires from `pending`, and the
//! terminal writers only fire while the row is not already terminal.

use sqlx::PgPool;

use docflow_core::status::JobStatus;
use docflow_core::types::JobId;

use crate::models::execution::{Execution, NewExecution};

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, status, input_type, input_source, result, error_message, \
                       processing_time_secs, created_at, updated_at, completed_at";

/// Provides persistence operations for executions.
pub struct ExecutionRepo;

impl ExecutionRepo {
    /// Insert a new pending execution, returning the created row.
    pub async fn create(pool: &PgPool, input: &NewExecution) -> Result<Execution, sqlx::Error> {
        let query = format!(
            "INSERT INTO executions (id, status, input_type, input_source)
             VALUES ($1, $2, $3, $4)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Execution>(&query)
            .bind(input.id)
            .bind(JobStatus::Pending.as_str())
            .bind(&input.input_type)
            .bind(&input.input_source)
            .fetch_one(pool)
            .await
    }

    /// Find an execution by ID.
    pub async fn find_by_id(pool: &PgPool, id: JobId) -> Result<Option<Execution>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM executions WHERE id = $1");
        sqlx::query_as::<_, Execution>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Move a pending execution to processing. Returns `false` if the row
    /// was missing or had already left the pending state.
    pub async fn mark_processing(pool: &PgPool, id: JobId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE executions SET status = $2, updated_at = now()
             WHERE id = $1 AND status = $3",
        )
        .bind(id)
        .bind(JobStatus::Processing.as_str())
        .bind(JobStatus::Pending.as_str())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record a successful result. Returns `false` if the row was missing
    /// or already terminal.
    pub async fn complete(
        pool: &PgPool,
        id: JobId,
        result: &serde_json::Value,
        processing_time_secs: f64,
    ) -> Result<bool, sqlx::Error> {
        let outcome = sqlx::query(
            "UPDATE executions SET
                status = $2,
                result = $3,
                processing_time_secs = $4,
                completed_at = now(),
                updated_at = now()
             WHERE id = $1 AND status NOT IN ($5, $6)",
        )
        .bind(id)
        .bind(JobStatus::Completed.as_str())
        .bind(result)
        .bind(processing_time_secs)
        .bind(JobStatus::Completed.as_str())
        .bind(JobStatus::Failed.as_str())
        .execute(pool)
        .await?;
        Ok(outcome.rows_affected() > 0)
    }

    /// Record a failure. Returns `false` if the row was missing or already
    /// terminal.
    pub async fn fail(
        pool: &PgPool,
        id: JobId,
        error_message: &str,
        processing_time_secs: f64,
    ) -> Result<bool, sqlx::Error> {
        let outcome = sqlx::query(
            "UPDATE executions SET
                status = $2,
                error_message = $3,
                processing_time_secs = $4,
                completed_at = now(),
                updated_at = now()
             WHERE id = $1 AND status NOT IN ($5, $6)",
        )
        .bind(id)
        .bind(JobStatus::Failed.as_str())
        .bind(error_message)
        .bind(processing_time_secs)
        .bind(JobStatus::Completed.as_str())
        .bind(JobStatus::Failed.as_str())
        .execute(pool)
        .await?;
        Ok(outcome.rows_affected() > 0)
    }
}
