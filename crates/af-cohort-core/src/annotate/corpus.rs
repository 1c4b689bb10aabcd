//! Annotated corpus files.
//!
//! A corpus is a JSON array of documents shaped as
//! `{pat_metadata: {pat_id, age, female}, doc_metadata: {note_id, encounter_date}, annotations: [...]}`
//! where `annotations` follows the engine entity contract.

use af_cohort_nlp::Entity;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use thiserror::Error;

use crate::models::{parse_encounter_date, AnnotatedDocument, Annotation, NegationState};

/// Corpus file errors.
#[derive(Error, Debug)]
pub enum CorpusError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("document {document_id} has an unreadable encounter date: {value}")]
    InvalidDate { document_id: String, value: String },
}

pub type CorpusResult<T> = Result<T, CorpusError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CorpusDocument {
    pat_metadata: PatientMetadata,
    doc_metadata: DocumentMetadata,
    #[serde(default)]
    annotations: Vec<Entity>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PatientMetadata {
    pat_id: String,
    age: f64,
    female: Flag,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DocumentMetadata {
    note_id: String,
    encounter_date: String,
}

/// Sex flag written either as a boolean or as 0/1.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Int(i64),
}

impl Flag {
    fn is_set(self) -> bool {
        match self {
            Flag::Bool(b) => b,
            Flag::Int(i) => i != 0,
        }
    }
}

/// Read an annotated corpus.
pub fn read_corpus<R: Read>(reader: R) -> CorpusResult<Vec<AnnotatedDocument>> {
    let raw: Vec<CorpusDocument> = serde_json::from_reader(reader)?;
    raw.into_iter()
        .map(|doc| {
            let encounter_date = parse_encounter_date(&doc.doc_metadata.encounter_date).ok_or_else(|| {
                CorpusError::InvalidDate {
                    document_id: doc.doc_metadata.note_id.clone(),
                    value: doc.doc_metadata.encounter_date.clone(),
                }
            })?;
            Ok(AnnotatedDocument {
                patient_id: doc.pat_metadata.pat_id,
                document_id: doc.doc_metadata.note_id,
                encounter_date,
                age: doc.pat_metadata.age,
                is_female: doc.pat_metadata.female.is_set(),
                annotations: doc.annotations.iter().map(Annotation::from).collect(),
            })
        })
        .collect()
}

/// Write an annotated corpus in the same shape [`read_corpus`] accepts.
pub fn write_corpus<W: Write>(writer: W, documents: &[AnnotatedDocument]) -> CorpusResult<()> {
    let raw: Vec<CorpusDocument> = documents
        .iter()
        .map(|doc| CorpusDocument {
            pat_metadata: PatientMetadata {
                pat_id: doc.patient_id.clone(),
                age: doc.age,
                female: Flag::Int(i64::from(doc.is_female)),
            },
            doc_metadata: DocumentMetadata {
                note_id: doc.document_id.clone(),
                encounter_date: doc.encounter_date.format("%Y-%m-%d").to_string(),
            },
            annotations: doc.annotations.iter().map(to_entity).collect(),
        })
        .collect();
    serde_json::to_writer_pretty(writer, &raw)?;
    Ok(())
}

fn to_entity(annotation: &Annotation) -> Entity {
    let value = match annotation.negation {
        NegationState::Affirmed => af_cohort_nlp::NEGATED_NO,
        NegationState::Negated => af_cohort_nlp::NEGATED_YES,
        NegationState::Unknown => "Unknown",
    };
    Entity::new(annotation.code.clone(), value)
}
