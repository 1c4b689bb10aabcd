//! Cohort building.
//!
//! Pipeline: Note search → Site exclusions → Most recent note per patient
//! → Demographics join → Encounter window → Minimum age

mod demographics;
mod site;

pub use demographics::*;
pub use site::*;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::info;

use crate::db::{Database, DbError};
use crate::models::{CohortDocument, EligibleDocument};

/// Cohort errors.
#[derive(Error, Debug)]
pub enum CohortError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unknown site: {0}")]
    UnknownSite(String),
}

pub type CohortResult<T> = Result<T, CohortError>;

/// Selection rules for a cohort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortCriteria {
    /// Free-text search term; every word is prefix-matched
    pub search_term: String,
    pub site: SiteFilter,
    /// Inclusive start of the encounter window
    pub window_start: NaiveDate,
    /// Exclusive end of the encounter window
    pub window_end: NaiveDate,
    pub min_age: f64,
    /// Date ages are computed at
    pub reference_date: NaiveDate,
    /// Cap on search results
    pub limit: Option<usize>,
}

impl Default for CohortCriteria {
    fn default() -> Self {
        Self {
            search_term: "atrial fibrillation".to_string(),
            site: SiteFilter::None,
            window_start: NaiveDate::from_ymd_opt(2011, 1, 1).unwrap_or_default(),
            window_end: NaiveDate::from_ymd_opt(2019, 1, 1).unwrap_or_default(),
            min_age: 18.0,
            reference_date: Utc::now().date_naive(),
            limit: None,
        }
    }
}

/// Document and patient counts after one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCount {
    pub stage: String,
    pub documents: usize,
    pub patients: usize,
}

/// The eligible cohort and how it shrank along the way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cohort {
    pub documents: Vec<EligibleDocument>,
    pub stages: Vec<StageCount>,
}

impl Cohort {
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Builds the analysis cohort from the note store.
pub struct CohortBuilder<'a> {
    criteria: &'a CohortCriteria,
}

impl<'a> CohortBuilder<'a> {
    pub fn new(criteria: &'a CohortCriteria) -> Self {
        Self { criteria }
    }

    /// Search the note store and build the cohort.
    pub fn build(&self, db: &Database, demographics: &Demographics) -> CohortResult<Cohort> {
        let documents = db.search_notes(&self.criteria.search_term, self.criteria.limit)?;
        Ok(self.build_from_documents(documents, demographics))
    }

    /// Build the cohort from already retrieved notes.
    pub fn build_from_documents(&self, documents: Vec<CohortDocument>, demographics: &Demographics) -> Cohort {
        let mut stages = Vec::new();
        let mut record = |stage: &str, documents: usize, patients: usize| {
            info!(stage, documents, patients, "Cohort stage complete");
            stages.push(StageCount {
                stage: stage.to_string(),
                documents,
                patients,
            });
        };

        record("search", documents.len(), unique_patients(&documents));

        let documents = apply_site_filter(documents, self.criteria.site);
        if self.criteria.site != SiteFilter::None {
            record("site_exclusions", documents.len(), unique_patients(&documents));
        }

        let documents = select_most_recent(documents);
        record("most_recent", documents.len(), unique_patients(&documents));

        let eligible = join_demographics(documents, demographics, self.criteria.reference_date);
        record("demographics", eligible.len(), unique_eligible_patients(&eligible));

        let eligible: Vec<EligibleDocument> = eligible
            .into_iter()
            .filter(|d| {
                d.encounter_date >= self.criteria.window_start
                    && d.encounter_date < self.criteria.window_end
            })
            .collect();
        record("encounter_window", eligible.len(), unique_eligible_patients(&eligible));

        let eligible: Vec<EligibleDocument> = eligible
            .into_iter()
            .filter(|d| d.age >= self.criteria.min_age)
            .collect();
        record("min_age", eligible.len(), unique_eligible_patients(&eligible));

        Cohort {
            documents: eligible,
            stages,
        }
    }
}

/// Drop notes the site's exclusion rules reject.
pub fn apply_site_filter(documents: Vec<CohortDocument>, site: SiteFilter) -> Vec<CohortDocument> {
    if site == SiteFilter::None {
        return documents;
    }

    let mut excluded: HashMap<Exclusion, usize> = HashMap::new();
    let kept: Vec<CohortDocument> = documents
        .into_iter()
        .filter(|doc| match site.exclusion(&doc.note_text) {
            Some(reason) => {
                *excluded.entry(reason).or_insert(0) += 1;
                false
            }
            None => true,
        })
        .collect();

    for (reason, count) in &excluded {
        info!("Excluded {} notes: {:?}", count, reason);
    }
    kept
}

/// Keep each patient's latest dated note, ordered by encounter date.
///
/// Undated notes are dropped. On a date tie the later note in input order wins.
pub fn select_most_recent(documents: Vec<CohortDocument>) -> Vec<CohortDocument> {
    let mut latest: HashMap<String, (usize, CohortDocument)> = HashMap::new();

    for (position, doc) in documents.into_iter().enumerate() {
        let Some(date) = doc.encounter_date else {
            continue;
        };
        let replace = match latest.get(&doc.patient_id) {
            Some((_, current)) => current.encounter_date.map_or(true, |c| date >= c),
            None => true,
        };
        if replace {
            latest.insert(doc.patient_id.clone(), (position, doc));
        }
    }

    let mut selected: Vec<(usize, CohortDocument)> = latest.into_values().collect();
    selected.sort_by(|(pa, a), (pb, b)| a.encounter_date.cmp(&b.encounter_date).then(pa.cmp(pb)));
    selected.into_iter().map(|(_, doc)| doc).collect()
}

/// Attach age and sex; notes without a dated, gendered demographic are dropped.
pub fn join_demographics(
    documents: Vec<CohortDocument>,
    demographics: &Demographics,
    reference_date: NaiveDate,
) -> Vec<EligibleDocument> {
    documents
        .into_iter()
        .filter_map(|doc| {
            let demographic = demographics.get(&doc.patient_id)?;
            demographic.gender.as_ref()?;
            let age = demographic.age_at(reference_date)?;
            let encounter_date = doc.encounter_date?;
            Some(EligibleDocument {
                is_female: demographic.is_female(),
                patient_id: doc.patient_id,
                document_id: doc.document_id,
                encounter_date,
                age,
                note_text: doc.note_text,
            })
        })
        .collect()
}

fn unique_patients(documents: &[CohortDocument]) -> usize {
    documents
        .iter()
        .map(|d| d.patient_id.as_str())
        .collect::<HashSet<_>>()
        .len()
}

fn unique_eligible_patients(documents: &[EligibleDocument]) -> usize {
    documents
        .iter()
        .map(|d| d.patient_id.as_str())
        .collect::<HashSet<_>>()
        .len()
}
