use std::sync::Arc;

use crate::assessment::batch::BatchOrchestrator;
use crate::assessment::pipeline::JobPipeline;
use crate::assessment::trigger::AssessmentTrigger;
use crate::config::BatchDefaults;
use crate::llm_client::ModelGateway;
use crate::store::AssessmentStore;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub batch: BatchOrchestrator,
    pub trigger: AssessmentTrigger,
    /// Used when a batch request leaves a field out.
    pub batch_defaults: BatchDefaults,
}

impl AppState {
    pub fn new(
        store: Arc<dyn AssessmentStore>,
        gateway: ModelGateway,
        batch_defaults: BatchDefaults,
    ) -> Self {
        let pipeline = JobPipeline::new(gateway, store.clone());
        Self {
            batch: BatchOrchestrator::new(pipeline.clone(), store.clone()),
            trigger: AssessmentTrigger::new(pipeline, store),
            batch_defaults,
        }
    }
}
