pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::assessment::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route(
            "/api/v1/assessments/batch",
            post(handlers::handle_run_batch),
        )
        .route(
            "/api/v1/assessments/retry-failed",
            post(handlers::handle_retry_failed),
        )
        .route(
            "/api/v1/jobs/:job_id/assessment",
            post(handlers::handle_assess_job).get(handlers::handle_assessment_status),
        )
        .route(
            "/api/v1/jobs/:job_id/assessment/background",
            post(handlers::handle_assess_job_background),
        )
        .with_state(state)
}
