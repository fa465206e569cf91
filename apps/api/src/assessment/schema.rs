//! Stage payloads: the typed shape of each model response.
//!
//! Each container type is what the gateway asks the model for (its JSON schema is
//! derived from the type) and what a response must deserialize into. Structural checks
//! that a schema cannot express (counts, blank strings) live in the `validate` methods.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::llm_client::repair::ResponseShape;
use crate::llm_client::StructuredOutput;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TagCategory {
    Required,
    Additional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    RequiredQualification,
    AdditionalQualification,
    /// Soft skills and logistical/legal conditions. Never matched against the resume.
    EvaluatedQualification,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::RequiredQualification => "required_qualification",
            Classification::AdditionalQualification => "additional_qualification",
            Classification::EvaluatedQualification => "evaluated_qualification",
        }
    }

    pub fn is_assessable(&self) -> bool {
        !matches!(self, Classification::EvaluatedQualification)
    }
}

// ── Stage 1: tagging ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RawTag {
    pub raw_string: String,
    pub category: TagCategory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TaggedList {
    pub tagged_list: Vec<RawTag>,
}

impl StructuredOutput for TaggedList {
    const SCHEMA_NAME: &'static str = "tagged_list";
    const SHAPE: ResponseShape = ResponseShape::TaggedList;
}

impl TaggedList {
    pub fn validate(&self) -> Result<(), String> {
        if self.tagged_list.is_empty() {
            return Err("no qualifications were tagged".to_string());
        }
        if let Some(i) = self.tagged_list.iter().position(|t| t.raw_string.trim().is_empty()) {
            return Err(format!("tag {i} has a blank raw_string"));
        }
        Ok(())
    }
}

// ── Stage 2: atomizing ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AtomicRequirement {
    pub requirement_string: String,
    pub category: TagCategory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AtomicObjects {
    pub atomic_objects: Vec<AtomicRequirement>,
}

impl StructuredOutput for AtomicObjects {
    const SCHEMA_NAME: &'static str = "atomic_objects";
    const SHAPE: ResponseShape = ResponseShape::AtomicObjects;
}

impl AtomicObjects {
    pub fn validate(&self) -> Result<(), String> {
        if self.atomic_objects.is_empty() {
            return Err("atomizing produced no requirements".to_string());
        }
        if let Some(i) = self
            .atomic_objects
            .iter()
            .position(|a| a.requirement_string.trim().is_empty())
        {
            return Err(format!("atomic requirement {i} is blank"));
        }
        Ok(())
    }
}

// ── Stage 3: classifying ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ClassifiedRequirement {
    pub requirement_string: String,
    #[serde(default)]
    pub classification: Option<Classification>,
}

impl ClassifiedRequirement {
    /// Goes to the assessment stage: classified, and not an evaluated qualification.
    pub fn is_assessable(&self) -> bool {
        self.classification
            .map(|c| c.is_assessable())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ClassifiedObjects {
    pub classified_objects: Vec<ClassifiedRequirement>,
}

impl StructuredOutput for ClassifiedObjects {
    const SCHEMA_NAME: &'static str = "classified_objects";
    const SHAPE: ResponseShape = ResponseShape::ClassifiedObjects;
}

impl ClassifiedObjects {
    /// One classified entry per atomic requirement.
    pub fn validate(&self, atomic_count: usize) -> Result<(), String> {
        if self.classified_objects.len() != atomic_count {
            return Err(format!(
                "expected {atomic_count} classified requirements, got {}",
                self.classified_objects.len()
            ));
        }
        Ok(())
    }
}

// ── Stage 4: assessing ─────────────────────────────────────────────────────

/// Stage-4 wire item. Fields are nullable so that a null answer is a validation
/// failure (and a semantic retry) rather than a decode failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AssessedObject {
    pub requirement_string: String,
    #[serde(default)]
    pub match_reasoning: Option<String>,
    #[serde(default, rename = "match")]
    pub is_match: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AssessedObjects {
    pub assessed_objects: Vec<AssessedObject>,
}

impl StructuredOutput for AssessedObjects {
    const SCHEMA_NAME: &'static str = "assessed_objects";
    const SHAPE: ResponseShape = ResponseShape::AssessedObjects;
}

/// A requirement matched against the resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessedRequirement {
    pub requirement_string: String,
    pub match_reasoning: String,
    #[serde(rename = "match")]
    pub is_match: bool,
}

impl AssessedObjects {
    /// Exactly one answer per requirement sent, none with a null or blank field.
    pub fn validate(self, expected: usize) -> Result<Vec<AssessedRequirement>, String> {
        if self.assessed_objects.len() != expected {
            return Err(format!(
                "expected {expected} assessed requirements, got {}",
                self.assessed_objects.len()
            ));
        }
        self.assessed_objects
            .into_iter()
            .enumerate()
            .map(|(i, item)| {
                let reasoning = item
                    .match_reasoning
                    .filter(|r| !r.trim().is_empty())
                    .ok_or_else(|| format!("assessed requirement {i} has no match_reasoning"))?;
                let is_match = item
                    .is_match
                    .ok_or_else(|| format!("assessed requirement {i} has no match"))?;
                Ok(AssessedRequirement {
                    requirement_string: item.requirement_string,
                    match_reasoning: reasoning,
                    is_match,
                })
            })
            .collect()
    }
}
