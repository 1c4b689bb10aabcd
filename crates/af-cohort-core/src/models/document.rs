//! Cohort document models.

use af_cohort_nlp::{Entity, NEGATED_NO, NEGATED_YES};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::table::DocumentKey;

/// Whether a detected mention is experienced by the patient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NegationState {
    Affirmed,
    Negated,
    Unknown,
}

impl NegationState {
    /// Map the engine's `Negated` meta-annotation value.
    ///
    /// `"No"` (not negated) is the only value that affirms a mention.
    pub fn from_engine_value(value: Option<&str>) -> Self {
        match value {
            Some(NEGATED_NO) => Self::Affirmed,
            Some(NEGATED_YES) => Self::Negated,
            _ => Self::Unknown,
        }
    }
}

/// A coded clinical concept detected in a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    /// External clinical concept code
    pub code: String,
    pub negation: NegationState,
}

impl Annotation {
    pub fn new(code: impl Into<String>, negation: NegationState) -> Self {
        Self {
            code: code.into(),
            negation,
        }
    }

    pub fn affirmed(code: impl Into<String>) -> Self {
        Self::new(code, NegationState::Affirmed)
    }

    pub fn negated(code: impl Into<String>) -> Self {
        Self::new(code, NegationState::Negated)
    }

    /// Only affirmed mentions count towards a component.
    pub fn is_affirmed(&self) -> bool {
        self.negation == NegationState::Affirmed
    }
}

impl From<&Entity> for Annotation {
    fn from(entity: &Entity) -> Self {
        Self::new(
            entity.cui.clone(),
            NegationState::from_engine_value(entity.negated_value()),
        )
    }
}

/// A note record in the export layout of the document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteRecord {
    #[serde(rename = "patientprimarymrn")]
    pub patient_mrn: String,
    #[serde(rename = "clinicalnotekey")]
    pub note_key: String,
    /// Raw encounter date text; parsed with [`parse_encounter_date`]
    #[serde(rename = "encounterdate", default)]
    pub encounter_date: Option<String>,
    #[serde(rename = "notetext")]
    pub note_text: String,
}

impl From<NoteRecord> for CohortDocument {
    fn from(record: NoteRecord) -> Self {
        Self {
            encounter_date: record.encounter_date.as_deref().and_then(parse_encounter_date),
            patient_id: record.patient_mrn,
            document_id: record.note_key,
            note_text: record.note_text,
        }
    }
}

/// Parse an encounter date as exported by the document store.
///
/// Accepts RFC 3339 timestamps, ISO dates with or without a time part, and
/// day-first `dd/mm/yyyy`. Anything else is treated as missing.
pub fn parse_encounter_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.naive_utc().date());
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(dt.date());
        }
    }

    for format in ["%Y-%m-%d", "%d/%m/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(date);
        }
    }

    None
}

/// A note as stored in the document store, before eligibility filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortDocument {
    /// Patient primary record number
    pub patient_id: String,
    /// Clinical note key
    pub document_id: String,
    /// Encounter date, when it could be parsed
    pub encounter_date: Option<NaiveDate>,
    /// Free text of the note
    pub note_text: String,
}

/// A cohort document that passed demographic filtering, ready for annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EligibleDocument {
    pub patient_id: String,
    pub document_id: String,
    pub encounter_date: NaiveDate,
    /// Age in fractional years at the reference date
    pub age: f64,
    pub is_female: bool,
    pub note_text: String,
}

impl EligibleDocument {
    /// Attach annotations, dropping the note text.
    pub fn into_annotated(self, annotations: Vec<Annotation>) -> AnnotatedDocument {
        AnnotatedDocument {
            patient_id: self.patient_id,
            document_id: self.document_id,
            encounter_date: self.encounter_date,
            age: self.age,
            is_female: self.is_female,
            annotations,
        }
    }
}

/// The unit the scoring engine consumes: one document with its annotations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedDocument {
    pub patient_id: String,
    pub document_id: String,
    pub encounter_date: NaiveDate,
    pub age: f64,
    pub is_female: bool,
    pub annotations: Vec<Annotation>,
}

impl AnnotatedDocument {
    /// The identifier set used to join per-score tables.
    pub fn key(&self) -> DocumentKey {
        DocumentKey {
            document_id: self.document_id.clone(),
            patient_id: self.patient_id.clone(),
            encounter_date: self.encounter_date,
            age: self.age,
            is_female: self.is_female,
        }
    }
}
