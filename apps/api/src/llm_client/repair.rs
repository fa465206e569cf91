//! Response repair: turns mildly malformed model output into JSON the stage schemas accept.
//!
//! Pure functions only. The gateway calls `repair_response` after a direct parse of the
//! fence-stripped text has already failed schema validation.
//!
//! Repairs, in order:
//! 1. strip Markdown code fences (and a leading language tag)
//! 2. parse as generic JSON
//! 3. wrap a bare top-level array / rename an aliased container key
//! 4. per item: rename key aliases, normalize category and classification synonyms,
//!    coerce stringified booleans

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum RepairError {
    #[error("response is not JSON: {0}")]
    NotJson(String),

    #[error("unexpected response shape: {0}")]
    UnexpectedShape(String),
}

/// Which stage payload the response is supposed to be.
/// Drives the container key and the per-item repairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    TaggedList,
    AtomicObjects,
    ClassifiedObjects,
    AssessedObjects,
}

impl ResponseShape {
    pub fn container_key(self) -> &'static str {
        match self {
            ResponseShape::TaggedList => "tagged_list",
            ResponseShape::AtomicObjects => "atomic_objects",
            ResponseShape::ClassifiedObjects => "classified_objects",
            ResponseShape::AssessedObjects => "assessed_objects",
        }
    }

    /// Canonical name of the requirement text field for items of this shape.
    fn text_key(self) -> &'static str {
        match self {
            ResponseShape::TaggedList => "raw_string",
            _ => "requirement_string",
        }
    }
}

const CONTAINER_ALIASES: &[&str] = &[
    "items",
    "results",
    "requirements",
    "qualifications",
    "tags",
    "tagged",
    "atomic",
    "atomic_requirements",
    "classified",
    "classifications",
    "assessed",
    "assessments",
];

const TEXT_ALIASES: &[&str] = &[
    "requirement",
    "requirement_text",
    "requirement_string",
    "raw_string",
    "raw",
    "text",
    "string",
    "qualification",
];

const REASONING_ALIASES: &[&str] = &["reasoning", "reason", "rationale", "explanation"];

const MATCH_ALIASES: &[&str] = &["matched", "is_match", "matches", "is_matched"];

const CLASSIFICATION_ALIASES: &[&str] = &["type", "qualification_type", "class", "label"];

const CATEGORY_ALIASES: &[&str] = &["tag", "requirement_category", "priority"];

/// Strips ```json ... ``` (or any ```lang ... ```) fences from LLM output.
pub fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop an optional language tag on the opening fence line.
    let rest = match rest.find('\n') {
        Some(newline) if rest[..newline].trim().chars().all(|c| c.is_ascii_alphanumeric()) => {
            &rest[newline + 1..]
        }
        _ => rest.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
    };
    let rest = rest.trim();
    rest.strip_suffix("```").map(str::trim).unwrap_or(rest)
}

/// Applies every repair heuristic for `shape` and returns the repaired JSON value.
///
/// The result is not guaranteed to validate; the caller re-validates it against the
/// stage schema and reports a schema failure if it still does not fit.
pub fn repair_response(raw: &str, shape: ResponseShape) -> Result<Value, RepairError> {
    let stripped = strip_json_fences(raw);
    let value: Value =
        serde_json::from_str(stripped).map_err(|e| RepairError::NotJson(e.to_string()))?;

    let mut root = normalize_container(value, shape)?;

    let key = shape.container_key();
    if let Some(Value::Array(items)) = root.get_mut(key) {
        for item in items.iter_mut() {
            if let Value::Object(fields) = item {
                repair_item(fields, shape);
            }
        }
    }

    Ok(Value::Object(root))
}

/// Ensures the response is an object holding the expected container key.
fn normalize_container(value: Value, shape: ResponseShape) -> Result<Map<String, Value>, RepairError> {
    let key = shape.container_key();
    match value {
        Value::Array(items) => {
            let mut root = Map::new();
            root.insert(key.to_string(), Value::Array(items));
            Ok(root)
        }
        Value::Object(mut root) => {
            if root.contains_key(key) {
                return Ok(root);
            }
            let alias = CONTAINER_ALIASES
                .iter()
                .find(|alias| matches!(root.get(**alias), Some(Value::Array(_))))
                .map(|alias| alias.to_string())
                .or_else(|| {
                    // A single array-valued field is unambiguous.
                    let arrays: Vec<&String> = root
                        .iter()
                        .filter(|(_, v)| v.is_array())
                        .map(|(k, _)| k)
                        .collect();
                    (arrays.len() == 1).then(|| arrays[0].clone())
                });
            match alias.and_then(|alias| root.remove(&alias)) {
                Some(items) => {
                    root.insert(key.to_string(), items);
                    Ok(root)
                }
                None => Err(RepairError::UnexpectedShape(format!(
                    "no '{key}' array in response"
                ))),
            }
        }
        other => Err(RepairError::UnexpectedShape(format!(
            "expected object or array, got {}",
            json_type_name(&other)
        ))),
    }
}

fn repair_item(fields: &mut Map<String, Value>, shape: ResponseShape) {
    rename_first(fields, TEXT_ALIASES, shape.text_key());

    match shape {
        ResponseShape::TaggedList | ResponseShape::AtomicObjects => {
            rename_first(fields, CATEGORY_ALIASES, "category");
            if let Some(Value::String(category)) = fields.get("category") {
                if let Some(normalized) = normalize_category(category) {
                    fields.insert("category".to_string(), Value::String(normalized.to_string()));
                }
            }
        }
        ResponseShape::ClassifiedObjects => {
            rename_first(fields, CLASSIFICATION_ALIASES, "classification");
            if let Some(Value::String(classification)) = fields.get("classification") {
                let repaired = if classification.trim().is_empty() {
                    Value::Null
                } else {
                    normalize_classification(classification)
                        .map(|c| Value::String(c.to_string()))
                        .unwrap_or_else(|| Value::String(classification.clone()))
                };
                fields.insert("classification".to_string(), repaired);
            }
        }
        ResponseShape::AssessedObjects => {
            rename_first(fields, REASONING_ALIASES, "match_reasoning");
            rename_first(fields, MATCH_ALIASES, "match");
            if let Some(value) = fields.get("match") {
                if let Some(coerced) = coerce_bool(value) {
                    fields.insert("match".to_string(), Value::Bool(coerced));
                }
            }
        }
    }
}

/// Moves the first present alias to `canonical`, unless `canonical` is already set.
fn rename_first(fields: &mut Map<String, Value>, aliases: &[&str], canonical: &str) {
    if fields.contains_key(canonical) {
        return;
    }
    for alias in aliases {
        if let Some(value) = fields.remove(*alias) {
            fields.insert(canonical.to_string(), value);
            return;
        }
    }
}

fn canonical_token(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .replace(['-', ' '], "_")
}

/// Maps category synonyms onto `required` / `additional`.
pub fn normalize_category(raw: &str) -> Option<&'static str> {
    match canonical_token(raw).as_str() {
        "required" | "must" | "must_have" | "mandatory" | "minimum" | "basic" | "requirement" => {
            Some("required")
        }
        "additional" | "preferred" | "desired" | "optional" | "nice_to_have" | "bonus" | "plus" => {
            Some("additional")
        }
        _ => None,
    }
}

/// Maps classification synonyms onto the three qualification classes.
pub fn normalize_classification(raw: &str) -> Option<&'static str> {
    let token = canonical_token(raw);
    let token = token.trim_end_matches('s');
    match token {
        "required_qualification" | "required" | "requiredqualification" | "must_have" => {
            Some("required_qualification")
        }
        "additional_qualification" | "additional" | "preferred" | "preferred_qualification"
        | "nice_to_have" => Some("additional_qualification"),
        "evaluated_qualification" | "evaluated" | "soft_skill" | "behavioral" | "logistical" => {
            Some("evaluated_qualification")
        }
        _ => None,
    }
}

fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(1) => Some(true),
            Some(0) => Some(false),
            _ => None,
        },
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "yes" | "y" | "true" | "1" | "matched" | "match" => Some(true),
            "no" | "n" | "false" | "0" | "not matched" | "no match" | "unmatched" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
