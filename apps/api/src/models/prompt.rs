use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Per-stage model configuration. The newest row per `run_type` wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct PromptConfiguration {
    pub prompt_id: Uuid,
    pub run_type: String,
    pub model_id: String,
    pub system_prompt: String,
    pub template: String,
    pub temperature: f64,
    /// Thinking-token budget; `None` or 0 disables reasoning.
    pub thinking_budget: Option<i32>,
    pub created_at: DateTime<Utc>,
}
