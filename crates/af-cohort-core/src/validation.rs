//! Validation of pipeline flags against a manually annotated sample.
//!
//! Pipeline: Gold CSV + exported table → Binary vectors per column →
//! Confusion counts → Accuracy / precision / recall
//!
//! The gold sample itself is drawn with [`sample_documents`] and written as
//! a `name,text` CSV for manual annotation.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

use crate::models::{EligibleDocument, Table, Value};

/// Every document in the cohort is an AF document, so this column is 1 for
/// each pipeline row when the table does not carry it.
pub const AF_DIAGNOSIS_COLUMN: &str = "af_diagnosis";

const DOC_ID: &str = "doc_id";
const GOLD_POSITIVE: &str = "YES";

/// Validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("{source_name} has no {column} column")]
    MissingColumn { source_name: String, column: String },
}

pub type ValidationResult<T> = Result<T, ValidationError>;

/// Binary flags per document for a set of columns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagSet {
    columns: Vec<String>,
    rows: HashMap<String, Vec<u8>>,
    order: Vec<String>,
}

impl FlagSet {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Insert or replace a document's flags.
    pub fn insert(&mut self, document_id: impl Into<String>, flags: Vec<u8>) {
        let document_id = document_id.into();
        if self.rows.insert(document_id.clone(), flags).is_none() {
            self.order.push(document_id);
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Document ids in first-seen order.
    pub fn documents(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn flag(&self, document_id: &str, column: &str) -> Option<u8> {
        let index = self.columns.iter().position(|c| c == column)?;
        self.rows.get(document_id).and_then(|flags| flags.get(index).copied())
    }

    fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }
}

fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader)
}

fn open(path: &Path) -> ValidationResult<std::fs::File> {
    std::fs::File::open(path).map_err(|source| ValidationError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Read flags from a CSV with a `doc_id` column, mapping each cell through
/// `to_flag`.
fn read_flags<R, F>(reader: R, source_name: &str, to_flag: F) -> ValidationResult<FlagSet>
where
    R: Read,
    F: Fn(&str) -> u8,
{
    let mut reader = csv_reader(reader);
    let headers = reader.headers()?.clone();
    let id_index = headers
        .iter()
        .position(|h| h == DOC_ID)
        .ok_or_else(|| ValidationError::MissingColumn {
            source_name: source_name.to_string(),
            column: DOC_ID.to_string(),
        })?;

    let columns: Vec<String> = headers
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != id_index)
        .map(|(_, h)| h.to_string())
        .collect();
    let mut flags = FlagSet::new(columns);

    for record in reader.records() {
        let record = record?;
        let document_id = record.get(id_index).unwrap_or_default().to_string();
        let values = record
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != id_index)
            .map(|(_, cell)| to_flag(cell))
            .collect();
        flags.insert(document_id, values);
    }
    Ok(flags)
}

/// Gold-standard cells: `YES` is positive, anything else negative.
fn gold_flag(cell: &str) -> u8 {
    u8::from(cell == GOLD_POSITIVE)
}

/// Exported cells: numbers above zero are positive; blanks negative.
fn exported_flag(cell: &str) -> u8 {
    u8::from(cell.parse::<f64>().is_ok_and(|v| v > 0.0))
}

/// Read a gold-standard sample.
pub fn read_gold<R: Read>(reader: R) -> ValidationResult<FlagSet> {
    read_flags(reader, "gold standard", gold_flag)
}

pub fn load_gold<P: AsRef<Path>>(path: P) -> ValidationResult<FlagSet> {
    read_gold(open(path.as_ref())?)
}

/// Read an exported cohort table CSV.
pub fn read_exported<R: Read>(reader: R) -> ValidationResult<FlagSet> {
    read_flags(reader, "cohort table", exported_flag)
}

pub fn load_exported<P: AsRef<Path>>(path: P) -> ValidationResult<FlagSet> {
    read_exported(open(path.as_ref())?)
}

/// Flags from an in-memory table; identifier columns are left out.
pub fn flags_from_table(table: &Table) -> FlagSet {
    let mut flags = FlagSet::new(table.columns().to_vec());
    for row in table.rows() {
        let values = row
            .values
            .iter()
            .map(|v| u8::from(v.as_ref().is_some_and(Value::is_truthy)))
            .collect();
        flags.insert(row.key.document_id.clone(), values);
    }
    flags
}

/// Confusion counts and derived metrics for one column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnMetrics {
    pub component: String,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    /// Gold positives
    pub p: u32,
    pub tp: u32,
    pub tn: u32,
    pub fp: u32,
    #[serde(rename = "fn")]
    pub fn_: u32,
}

fn ratio(numerator: u32, denominator: u32) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        f64::from(numerator) / f64::from(denominator)
    }
}

/// Compare two aligned binary vectors.
///
/// When both are all-zero there is nothing to measure and every field is 0.
pub fn column_metrics(component: &str, gold: &[u8], predicted: &[u8]) -> ColumnMetrics {
    let mut metrics = ColumnMetrics {
        component: component.to_string(),
        ..ColumnMetrics::default()
    };
    if gold.iter().all(|&g| g == 0) && predicted.iter().all(|&p| p == 0) {
        return metrics;
    }

    for (&g, &p) in gold.iter().zip(predicted) {
        match (g > 0, p > 0) {
            (true, true) => metrics.tp += 1,
            (false, false) => metrics.tn += 1,
            (false, true) => metrics.fp += 1,
            (true, false) => metrics.fn_ += 1,
        }
    }

    let total = metrics.tp + metrics.tn + metrics.fp + metrics.fn_;
    metrics.accuracy = ratio(metrics.tp + metrics.tn, total);
    metrics.precision = ratio(metrics.tp, metrics.tp + metrics.fp);
    metrics.recall = ratio(metrics.tp, metrics.tp + metrics.fn_);
    metrics.p = metrics.tp + metrics.fn_;
    metrics
}

/// Outcome of one validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Documents compared
    pub documents: usize,
    /// Gold documents the pipeline table does not contain
    pub missing_documents: Vec<String>,
    pub metrics: Vec<ColumnMetrics>,
}

/// Compare pipeline flags with the gold sample on every gold column.
///
/// Only documents present in both are compared.
pub fn validate(gold: &FlagSet, predicted: &FlagSet) -> ValidationResult<ValidationReport> {
    let mut report = ValidationReport::default();

    let mut documents = Vec::new();
    for document_id in gold.documents() {
        if predicted.rows.contains_key(document_id) {
            documents.push(document_id.as_str());
        } else {
            report.missing_documents.push(document_id.clone());
        }
    }
    if !report.missing_documents.is_empty() {
        warn!(
            missing = report.missing_documents.len(),
            "Gold documents absent from the cohort table"
        );
    }
    report.documents = documents.len();

    for column in gold.columns() {
        let gold_index = gold.column_index(column).unwrap_or_default();
        let gold_vector: Vec<u8> = documents
            .iter()
            .map(|d| gold.rows[*d][gold_index])
            .collect();

        let predicted_vector: Vec<u8> = match predicted.column_index(column) {
            Some(index) => documents.iter().map(|d| predicted.rows[*d][index]).collect(),
            None if column == AF_DIAGNOSIS_COLUMN => vec![1; documents.len()],
            None => {
                return Err(ValidationError::MissingColumn {
                    source_name: "cohort table".to_string(),
                    column: column.clone(),
                })
            }
        };

        let metrics = column_metrics(column, &gold_vector, &predicted_vector);
        info!(
            "{}: accuracy {:.3}, precision {:.3}, recall {:.3}, p {}",
            metrics.component, metrics.accuracy, metrics.precision, metrics.recall, metrics.p
        );
        report.metrics.push(metrics);
    }

    Ok(report)
}

/// Write the comparison table as CSV.
pub fn write_metrics<W: Write>(metrics: &[ColumnMetrics], writer: W) -> ValidationResult<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for row in metrics {
        csv_writer.serialize(row)?;
    }
    csv_writer.flush().map_err(csv::Error::from)?;
    Ok(())
}

pub fn write_metrics_file<P: AsRef<Path>>(metrics: &[ColumnMetrics], path: P) -> ValidationResult<()> {
    let path = path.as_ref();
    let file = std::fs::File::create(path).map_err(|source| ValidationError::Io {
        path: path.display().to_string(),
        source,
    })?;
    write_metrics(metrics, file)
}

/// Sample size and seed used for the annotated validation sample.
pub const DEFAULT_SAMPLE_SIZE: usize = 50;
pub const DEFAULT_SAMPLE_SEED: u64 = 2;

/// Draw `n` distinct documents at random; the same seed over the same
/// cohort gives the same sample. Returns every document, shuffled, when
/// the cohort is smaller than `n`.
pub fn sample_documents(documents: &[EligibleDocument], n: usize, seed: u64) -> Vec<&EligibleDocument> {
    let amount = n.min(documents.len());
    if amount < n {
        warn!(requested = n, available = documents.len(), "Cohort smaller than sample size");
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut indices: Vec<usize> = (0..documents.len()).collect();
    let (chosen, _) = indices.partial_shuffle(&mut rng, amount);
    chosen.iter().map(|&i| &documents[i]).collect()
}

#[derive(Serialize)]
struct SampleRow<'a> {
    name: &'a str,
    text: &'a str,
}

/// Write sampled documents as `name,text` rows keyed by document id.
pub fn write_sample<W: Write>(documents: &[&EligibleDocument], writer: W) -> ValidationResult<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for doc in documents {
        csv_writer.serialize(SampleRow {
            name: &doc.document_id,
            text: &doc.note_text,
        })?;
    }
    csv_writer.flush().map_err(csv::Error::from)?;
    Ok(())
}

pub fn write_sample_file<P: AsRef<Path>>(documents: &[&EligibleDocument], path: P) -> ValidationResult<()> {
    let path = path.as_ref();
    let io_error = |source: std::io::Error| ValidationError::Io {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_error)?;
    }
    let file = std::fs::File::create(path).map_err(io_error)?;
    write_sample(documents, file)?;
    info!(documents = documents.len(), path = %path.display(), "Validation sample written");
    Ok(())
}
