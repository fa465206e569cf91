use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One model call: what went in, what came out, what it cost.
/// Append-only; rows are never updated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct AuditRun {
    pub audit_run_id: Uuid,
    pub job_id: String,
    pub run_type: String,
    pub model_id: String,
    pub prompt_id: Option<Uuid>,
    pub input: String,
    pub output: String,
    pub input_tokens: i32,
    pub output_tokens: i32,
    pub thinking_tokens: i32,
    pub total_tokens: i32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
