//! Concept entities from annotation engine output.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Extraction errors.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid engine output: {0}")]
    InvalidFormat(String),
}

pub type ExtractionResult<T> = Result<T, ExtractionError>;

/// Meta-annotation value the engine uses for an affirmed mention.
pub const NEGATED_NO: &str = "No";

/// Meta-annotation value the engine uses for a negated mention.
pub const NEGATED_YES: &str = "Yes";

/// A coded concept detected in a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Clinical concept code
    pub cui: String,
    /// Preferred name of the concept, when the engine reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pretty_name: Option<String>,
    /// Byte offset where the mention starts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<usize>,
    /// Byte offset where the mention ends
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<usize>,
    /// Match confidence (0.0 - 1.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acc: Option<f64>,
    /// Context classifiers attached to the mention
    #[serde(default)]
    pub meta_anns: MetaAnnotations,
}

/// Context meta-annotations. Only negation is consumed downstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaAnnotations {
    #[serde(rename = "Negated", default, skip_serializing_if = "Option::is_none")]
    pub negated: Option<MetaAnnotation>,
}

/// A single meta-annotation result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaAnnotation {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl Entity {
    /// Create an entity with a negation value and no positional information.
    pub fn new(cui: impl Into<String>, negated: impl Into<String>) -> Self {
        Self {
            cui: cui.into(),
            pretty_name: None,
            start: None,
            end: None,
            acc: None,
            meta_anns: MetaAnnotations {
                negated: Some(MetaAnnotation {
                    value: negated.into(),
                    confidence: None,
                }),
            },
        }
    }

    /// The raw `Negated` value, if the engine produced one.
    pub fn negated_value(&self) -> Option<&str> {
        self.meta_anns.negated.as_ref().map(|m| m.value.as_str())
    }
}

/// Engine versions disagree on the envelope, so accept all known shapes.
#[derive(Deserialize)]
#[serde(untagged)]
enum EngineOutput {
    Bare(Vec<Entity>),
    Wrapped { entities: EntityCollection },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EntityCollection {
    List(Vec<Entity>),
    Keyed(HashMap<String, Entity>),
}

/// Parse engine JSON output for one document into entities.
///
/// Accepts a bare array of entities, or an object whose `entities` field is
/// either an array or a map keyed by entity index. Keyed entities are
/// returned in index order.
pub fn parse_engine_output(json: &str) -> ExtractionResult<Vec<Entity>> {
    let trimmed = json.trim();
    if trimmed.is_empty() {
        return Err(ExtractionError::InvalidFormat("empty engine output".into()));
    }

    let output: EngineOutput = serde_json::from_str(trimmed)?;
    let entities = match output {
        EngineOutput::Bare(list) => list,
        EngineOutput::Wrapped {
            entities: EntityCollection::List(list),
        } => list,
        EngineOutput::Wrapped {
            entities: EntityCollection::Keyed(map),
        } => {
            let mut keyed: Vec<(String, Entity)> = map.into_iter().collect();
            keyed.sort_by(|(a, _), (b, _)| {
                match (a.parse::<u64>(), b.parse::<u64>()) {
                    (Ok(x), Ok(y)) => x.cmp(&y),
                    _ => a.cmp(b),
                }
            });
            keyed.into_iter().map(|(_, e)| e).collect()
        }
    };

    Ok(entities)
}

/// Serialize entities in the engine's bare-array shape.
pub fn to_engine_json(entities: &[Entity]) -> ExtractionResult<String> {
    Ok(serde_json::to_string(entities)?)
}
