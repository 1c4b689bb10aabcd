//! Cohort annotation.
//!
//! Every document gets an explicit `Result`; failures are logged, collected
//! and excluded, never retried.

mod corpus;
mod engines;

pub use corpus::*;
pub use engines::*;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::models::{AnnotatedDocument, Annotation, EligibleDocument};

const PROGRESS_EVERY: usize = 100;

/// Annotation failed on one document.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("annotation failed on {document_id} (patient {patient_id}): {reason}")]
pub struct AnnotationFailure {
    pub document_id: String,
    pub patient_id: String,
    pub reason: String,
}

impl AnnotationFailure {
    pub fn new(document: &EligibleDocument, reason: impl Into<String>) -> Self {
        Self {
            document_id: document.document_id.clone(),
            patient_id: document.patient_id.clone(),
            reason: reason.into(),
        }
    }
}

/// Turns a document's text into coded annotations.
pub trait Annotator {
    fn annotate(&self, document: &EligibleDocument) -> Result<Vec<Annotation>, AnnotationFailure>;
}

/// Successes in input order, plus every failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnotationBatch {
    pub documents: Vec<AnnotatedDocument>,
    pub failures: Vec<AnnotationFailure>,
}

/// Annotate every document, collecting failures instead of aborting.
pub fn annotate_cohort<A: Annotator + ?Sized>(annotator: &A, documents: Vec<EligibleDocument>) -> AnnotationBatch {
    let total = documents.len();
    info!("Starting cohort annotation of {} documents", total);

    let mut batch = AnnotationBatch::default();
    for (index, document) in documents.into_iter().enumerate() {
        if index % PROGRESS_EVERY == 0 {
            info!("Completed up to index {}, {} left to process", index, total - index);
        }

        match annotator.annotate(&document) {
            Ok(annotations) => batch.documents.push(document.into_annotated(annotations)),
            Err(failure) => {
                warn!("Failed on {}: {}", failure.document_id, failure.reason);
                batch.failures.push(failure);
            }
        }
    }

    info!(
        annotated = batch.documents.len(),
        failed = batch.failures.len(),
        "Cohort annotation finished"
    );
    batch
}
