//! Execution entity: the durable record of one extraction job.

use serde::Serialize;
use sqlx::FromRow;

use docflow_core::types::{JobId, Timestamp};

/// A row from the `executions` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Execution {
    pub id: JobId,
    pub status: String,
    /// Either `url` or `path`, recording how the document was supplied.
    pub input_type: String,
    pub input_source: String,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub processing_time_secs: Option<f64>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

/// Input for creating a new execution row.
#[derive(Debug, Clone)]
pub struct NewExecution {
    pub id: JobId,
    pub input_type: String,
    pub input_source: String,
}
