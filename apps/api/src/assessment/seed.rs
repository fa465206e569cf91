use std::collections::HashSet;

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::assessment::prompts::{default_prompts, DEFAULT_MODEL};
use crate::models::prompt::PromptConfiguration;
use crate::store::AssessmentStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SeedResult {
    pub inserted: usize,
    pub existing: usize,
    pub total_required: usize,
}

/// Inserts the default configuration for every stage that has no prompt row yet.
/// Run types that already have a configuration are left alone.
pub async fn seed_initial_prompts(store: &dyn AssessmentStore) -> Result<SeedResult> {
    let present: HashSet<String> = store.prompt_run_types().await?.into_iter().collect();
    let defaults = default_prompts();

    let mut result = SeedResult {
        inserted: 0,
        existing: 0,
        total_required: defaults.len(),
    };

    for default in defaults {
        let run_type = default.stage.run_type();
        if present.contains(run_type) {
            result.existing += 1;
            continue;
        }

        store
            .insert_prompt(&PromptConfiguration {
                prompt_id: Uuid::new_v4(),
                run_type: run_type.to_string(),
                model_id: DEFAULT_MODEL.to_string(),
                system_prompt: default.system_prompt,
                template: default.template.to_string(),
                temperature: default.temperature,
                thinking_budget: Some(default.thinking_budget),
                created_at: Utc::now(),
            })
            .await?;
        info!("Seeded default prompt for {run_type}");
        result.inserted += 1;
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assessment::prompts::Stage;
    use crate::assessment::testing;
    use crate::store::memory::MemoryStore;

    #[tokio::test]
    async fn test_seeds_all_stages_into_empty_store() {
        let store = MemoryStore::new();

        let result = seed_initial_prompts(&store).await.unwrap();

        assert_eq!(
            result,
            SeedResult {
                inserted: 4,
                existing: 0,
                total_required: 4
            }
        );
        let mut run_types: Vec<String> = store.prompts().into_iter().map(|p| p.run_type).collect();
        run_types.sort();
        assert_eq!(
            run_types,
            vec![
                "ja_2_1_assessment",
                "ja_2_2_assessment",
                "ja_2_3_assessment",
                "ja_3_1_assessment"
            ]
        );
    }

    #[tokio::test]
    async fn test_existing_configuration_is_untouched() {
        let store = MemoryStore::new();
        let custom = testing::prompt_config(Stage::Classifying);
        store.add_prompt(custom.clone());

        let result = seed_initial_prompts(&store).await.unwrap();

        assert_eq!(result.inserted, 3);
        assert_eq!(result.existing, 1);
        let classifying: Vec<_> = store
            .prompts()
            .into_iter()
            .filter(|p| p.run_type == "ja_2_3_assessment")
            .collect();
        assert_eq!(classifying, vec![custom]);
    }

    #[tokio::test]
    async fn test_seeding_twice_inserts_nothing_new() {
        let store = MemoryStore::new();
        seed_initial_prompts(&store).await.unwrap();

        let again = seed_initial_prompts(&store).await.unwrap();

        assert_eq!(again.inserted, 0);
        assert_eq!(again.existing, 4);
        assert_eq!(store.prompts().len(), 4);
    }
}
