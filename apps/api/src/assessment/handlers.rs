use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::assessment::batch::BatchSummary;
use crate::assessment::trigger::AssessmentStatus;
use crate::errors::AppError;
use crate::models::job::QualificationRecord;
use crate::state::AppState;
use crate::store::{CandidateQuery, SelectionMode};

/// Optional overrides for a batch run. Missing fields fall back to the configured defaults.
#[derive(Debug, Default, Deserialize)]
pub struct BatchRequest {
    pub days_back: Option<u32>,
    pub limit: Option<u32>,
    pub concurrency: Option<usize>,
}

#[derive(Serialize)]
pub struct AcceptedResponse {
    pub job_id: String,
    pub status: &'static str,
}

async fn run_batch(
    state: AppState,
    req: BatchRequest,
    mode: SelectionMode,
) -> Result<Json<BatchSummary>, AppError> {
    let defaults = state.batch_defaults;
    let concurrency = req.concurrency.unwrap_or(defaults.concurrency);
    if concurrency == 0 {
        return Err(AppError::Validation("concurrency must be at least 1".to_string()));
    }
    let limit = req.limit.unwrap_or(defaults.limit);
    if limit == 0 {
        return Err(AppError::Validation("limit must be at least 1".to_string()));
    }

    let days_back = req.days_back.unwrap_or(defaults.days_back);
    if i32::try_from(days_back).is_err() {
        return Err(AppError::Validation(format!(
            "days_back must be at most {}",
            i32::MAX
        )));
    }

    let query = CandidateQuery {
        mode,
        days_back,
        limit,
    };
    Ok(Json(state.batch.run(query, concurrency).await?))
}

/// POST /api/v1/assessments/batch
pub async fn handle_run_batch(
    State(state): State<AppState>,
    req: Option<Json<BatchRequest>>,
) -> Result<Json<BatchSummary>, AppError> {
    let req = req.map(|Json(r)| r).unwrap_or_default();
    run_batch(state, req, SelectionMode::Unassessed).await
}

/// POST /api/v1/assessments/retry-failed
pub async fn handle_retry_failed(
    State(state): State<AppState>,
    req: Option<Json<BatchRequest>>,
) -> Result<Json<BatchSummary>, AppError> {
    let req = req.map(|Json(r)| r).unwrap_or_default();
    run_batch(state, req, SelectionMode::Quarantined).await
}

/// POST /api/v1/jobs/:job_id/assessment
pub async fn handle_assess_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<Vec<QualificationRecord>>, AppError> {
    Ok(Json(state.trigger.assess(&job_id).await?))
}

/// POST /api/v1/jobs/:job_id/assessment/background
/// Returns immediately; the outcome shows up in the job's status.
pub async fn handle_assess_job_background(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> (StatusCode, Json<AcceptedResponse>) {
    let trigger = state.trigger.clone();
    let id = job_id.clone();
    tokio::spawn(async move {
        if let Err(e) = trigger.assess(&id).await {
            error!("Background assessment of {id} failed: {e}");
        }
    });

    (
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            job_id,
            status: "accepted",
        }),
    )
}

/// GET /api/v1/jobs/:job_id/assessment
pub async fn handle_assessment_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<AssessmentStatus>, AppError> {
    Ok(Json(state.trigger.status(&job_id).await?))
}
