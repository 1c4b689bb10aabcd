//! Risk scoring engine.
//!
//! Pipeline: Definition Loader → Aggregator → Augmenter → Calculator → Merger
//!
//! Each stage returns a new value; nothing accumulates on the scorer
//! between calls.

mod aggregator;
mod augmenter;
mod calculator;
mod loader;
mod merger;

pub use aggregator::*;
pub use augmenter::*;
pub use calculator::*;
pub use loader::*;
pub use merger::*;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::models::{AnnotatedDocument, MedicationList, ScoreDefinition, Table, TableError};

/// Scoring errors.
#[derive(Error, Debug)]
pub enum ScoringError {
    #[error("Table error: {0}")]
    Table(#[from] TableError),

    #[error("Merge error: {0}")]
    Merge(#[from] MergeError),
}

pub type ScoringResult<T> = Result<T, ScoringError>;

/// One score's table and its zero-support diagnostic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRun {
    pub score: String,
    pub table: Table,
    /// Components no document supported
    pub zero_support: Vec<String>,
}

/// Zero-support diagnostic for one score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZeroSupport {
    pub score: String,
    pub components: Vec<String>,
}

/// Everything a scoring pass produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringOutput {
    pub merged: MergedTable,
    pub zero_support: Vec<ZeroSupport>,
}

/// Run one score over a corpus: aggregate, augment, calculate.
pub fn score_documents(documents: &[AnnotatedDocument], definition: &ScoreDefinition) -> ScoringResult<ScoreRun> {
    info!("Started risk scoring for {}", definition.name);
    let counts = aggregate(documents, &definition.codes);
    let augmented = augment(counts, &definition.kind);
    calculate(&augmented, definition)
}

/// Coordinates the scoring passes for a set of definitions.
pub struct RiskScorer<'a> {
    scores: &'a [ScoreDefinition],
    medications: Option<&'a MedicationList>,
}

impl<'a> RiskScorer<'a> {
    /// Create a scorer. The first definition anchors the merged table.
    pub fn new(scores: &'a [ScoreDefinition]) -> Self {
        Self {
            scores,
            medications: None,
        }
    }

    pub fn with_medications(mut self, medications: &'a MedicationList) -> Self {
        self.medications = Some(medications);
        self
    }

    /// Score every definition, merge, then add medication counts.
    pub fn score(&self, documents: &[AnnotatedDocument]) -> ScoringResult<ScoringOutput> {
        let runs = self
            .scores
            .iter()
            .map(|definition| score_documents(documents, definition))
            .collect::<ScoringResult<Vec<_>>>()?;

        let mut merged = merge_scores(&runs)?;
        if let Some(medications) = self.medications {
            let counts = medication_table(documents, medications)?;
            merged = add_medications(merged, &counts)?;
        }

        info!(
            documents = documents.len(),
            rows = merged.table.len(),
            columns = merged.table.columns().len(),
            "Finished cohort scoring"
        );

        let zero_support = runs
            .into_iter()
            .filter(|run| !run.zero_support.is_empty())
            .map(|run| ZeroSupport {
                score: run.score,
                components: run.zero_support,
            })
            .collect();

        Ok(ScoringOutput {
            merged,
            zero_support,
        })
    }
}
