// Job qualification assessment.
// Four model stages per job (tagging, atomizing, classifying, assessing), run by the
// batch orchestrator or the on-demand trigger. All model calls go through llm_client.

pub mod batch;
pub mod executor;
pub mod handlers;
pub mod pipeline;
pub mod prompts;
pub mod schema;
pub mod seed;
pub mod trigger;

#[cfg(test)]
pub mod testing;
