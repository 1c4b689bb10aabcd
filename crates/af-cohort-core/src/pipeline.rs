//! End-to-end pipeline orchestration.
//!
//! Pipeline: Cohort → Annotation → Scoring → Analysis preparation → Export
//!
//! State is threaded through return values; the only thing that outlives a
//! run is what it writes.

use std::path::Path;
use thiserror::Error;
use tracing::info;

use crate::analysis::{
    apply_categories, binarize_columns, default_categories, presence_columns, summarize_categories,
    AnalysisError, CategorySummary, MEDICATIONS,
};
use crate::annotate::{annotate_cohort, AnnotationFailure, Annotator, CorpusError};
use crate::cohort::{CohortBuilder, CohortError, Demographics};
use crate::config::{ConfigError, DefinitionPaths, PipelineConfig};
use crate::db::{Database, DbError};
use crate::export::{write_csv_file, write_json_file, ExportError, RunManifest};
use crate::models::{AnnotatedDocument, MedicationList, ScoreDefinition, Table};
use crate::scoring::{DefinitionError, DefinitionLoader, RiskScorer, ScoringError};
use crate::validation::{sample_documents, write_sample_file, ValidationError};

/// Crate-level error for a pipeline run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Definition error: {0}")]
    Definition(#[from] DefinitionError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Cohort error: {0}")]
    Cohort(#[from] CohortError),

    #[error("Corpus error: {0}")]
    Corpus(#[from] CorpusError),

    #[error("Scoring error: {0}")]
    Scoring(#[from] ScoringError),

    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("no score definitions configured")]
    NoDefinitions,
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Every definition a run scores with.
#[derive(Debug, Clone, PartialEq)]
pub struct Definitions {
    pub scores: Vec<ScoreDefinition>,
    pub medications: Option<MedicationList>,
}

impl Definitions {
    /// Load score and medication definitions; the first score anchors.
    pub fn load(paths: &DefinitionPaths, strict: bool) -> PipelineResult<Self> {
        if paths.scores.is_empty() {
            return Err(PipelineError::NoDefinitions);
        }
        let loader = DefinitionLoader::new().strict(strict);
        let scores = paths
            .scores
            .iter()
            .map(|path| loader.load_score(path))
            .collect::<Result<Vec<_>, _>>()?;
        let medications = paths
            .medications
            .as_ref()
            .map(|path| loader.load_medications(path))
            .transpose()?;
        Ok(Self { scores, medications })
    }
}

/// What a run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutput {
    pub table: Table,
    pub manifest: RunManifest,
}

/// Binary conversion and, when every medication column is present,
/// antithrombotic categories.
pub fn prepare_table(table: &mut Table, definitions: &Definitions) -> PipelineResult<Option<CategorySummary>> {
    let columns = presence_columns(&definitions.scores, definitions.medications.as_ref());
    let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
    binarize_columns(table, &columns)?;

    if MEDICATIONS.iter().any(|m| table.column_index(m).is_none()) {
        info!("Medication columns incomplete, skipping antithrombotic categories");
        return Ok(None);
    }
    let categories = default_categories();
    apply_categories(table, &categories)?;
    Ok(Some(summarize_categories(table, &categories)?))
}

/// Runs the pipeline against one configuration.
pub struct Pipeline<'a> {
    config: &'a PipelineConfig,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    pub fn load_definitions(&self) -> PipelineResult<Definitions> {
        Definitions::load(&self.config.definitions, self.config.strict_definitions)
    }

    /// Build the cohort from the note store, annotate it, score and export.
    pub fn run<A: Annotator + ?Sized>(&self, definitions: &Definitions, annotator: &A) -> PipelineResult<RunOutput> {
        let mut manifest = RunManifest::start();
        manifest.criteria = Some(self.config.criteria.clone());
        info!(run_id = %manifest.run_id, "Starting pipeline run");

        let db = Database::open(&self.config.note_store)?;
        let demographics = Demographics::load(&self.config.demographics)?;
        let cohort = CohortBuilder::new(&self.config.criteria).build(&db, &demographics)?;
        manifest.stages = cohort.stages;

        manifest.counts.complete_cohort = cohort.documents.len();
        let batch = annotate_cohort(annotator, cohort.documents);

        self.finish(manifest, &batch.documents, batch.failures, definitions)
    }

    /// Build the cohort and write a seeded random sample of it as a
    /// `name,text` CSV for manual annotation; returns the sample size.
    pub fn sample<P: AsRef<Path>>(&self, n: usize, seed: u64, path: P) -> PipelineResult<usize> {
        let db = Database::open(&self.config.note_store)?;
        let demographics = Demographics::load(&self.config.demographics)?;
        let cohort = CohortBuilder::new(&self.config.criteria).build(&db, &demographics)?;

        let sample = sample_documents(&cohort.documents, n, seed);
        info!(cohort = cohort.len(), sample = sample.len(), seed, "Sampled cohort for validation");
        write_sample_file(&sample, path)?;
        Ok(sample.len())
    }

    /// Score an already annotated corpus and export.
    pub fn score(&self, definitions: &Definitions, documents: &[AnnotatedDocument]) -> PipelineResult<RunOutput> {
        let mut manifest = RunManifest::start();
        manifest.counts.complete_cohort = documents.len();
        self.finish(manifest, documents, Vec::new(), definitions)
    }

    fn finish(
        &self,
        mut manifest: RunManifest,
        documents: &[AnnotatedDocument],
        failures: Vec<AnnotationFailure>,
        definitions: &Definitions,
    ) -> PipelineResult<RunOutput> {
        manifest.counts.annotated = documents.len();
        manifest.counts.failed = failures.len();
        manifest.failures = failures;
        manifest.record_definitions(&definitions.scores, definitions.medications.as_ref());

        let mut scorer = RiskScorer::new(&definitions.scores);
        if let Some(medications) = &definitions.medications {
            scorer = scorer.with_medications(medications);
        }
        let output = scorer.score(documents)?;
        manifest.record_scoring(&output);

        let mut table = output.merged.table;
        manifest.categories = prepare_table(&mut table, definitions)?;

        info!(
            "Complete cohort {} vs final scored cohort {}",
            manifest.counts.complete_cohort,
            table.len()
        );

        self.export(&table, &mut manifest)?;
        Ok(RunOutput { table, manifest })
    }

    fn export(&self, table: &Table, manifest: &mut RunManifest) -> PipelineResult<()> {
        let output = &self.config.output;
        write_csv_file(table, &output.table)?;
        if let Some(json) = &output.json {
            write_json_file(table, json)?;
        }
        manifest.finish();
        manifest.write_file(&output.manifest)?;
        Ok(())
    }
}

/// Import a notes CSV into the note store; returns the rows imported.
pub fn import_notes<P: AsRef<Path>, Q: AsRef<Path>>(store: P, csv_path: Q) -> PipelineResult<usize> {
    let csv_path = csv_path.as_ref();
    let file = std::fs::File::open(csv_path).map_err(|source| CohortError::Io {
        path: csv_path.display().to_string(),
        source,
    })?;
    let mut db = Database::open(store)?;
    Ok(db.import_notes_csv(file)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OutputPaths, TelemetryConfig};
    use crate::cohort::CohortCriteria;
    use crate::models::Annotation;
    use chrono::NaiveDate;
    use std::path::PathBuf;

    fn config(dir: &Path) -> PipelineConfig {
        PipelineConfig {
            definitions: DefinitionPaths {
                scores: vec![dir.join("chadsvasc.csv")],
                medications: Some(dir.join("meds.csv")),
            },
            note_store: dir.join("notes.db"),
            demographics: dir.join("demographics.csv"),
            output: OutputPaths {
                table: dir.join("out/cohort.csv"),
                json: None,
                manifest: dir.join("out/manifest.json"),
            },
            criteria: CohortCriteria::default(),
            strict_definitions: false,
            telemetry: TelemetryConfig {
                log_level: "info".into(),
            },
        }
    }

    fn write_definitions(dir: &Path) {
        std::fs::write(
            dir.join("chadsvasc.csv"),
            "score,component,cui,points\nchadsvasc,stroke,S1,2\nchadsvasc,female,,1\n",
        )
        .unwrap();
        std::fs::write(dir.join("meds.csv"), "component,cui\nwarfarin,W1\naspirin,A1\n").unwrap();
    }

    fn doc(id: &str, annotations: Vec<Annotation>) -> AnnotatedDocument {
        AnnotatedDocument {
            patient_id: format!("P-{}", id),
            document_id: id.into(),
            encounter_date: NaiveDate::from_ymd_opt(2015, 3, 3).unwrap(),
            age: 70.0,
            is_female: true,
            annotations,
        }
    }

    #[test]
    fn test_no_definitions() {
        let paths = DefinitionPaths {
            scores: Vec::new(),
            medications: None,
        };
        assert!(matches!(Definitions::load(&paths, false), Err(PipelineError::NoDefinitions)));
    }

    #[test]
    fn test_score_corpus_exports() {
        let dir = tempfile::tempdir().unwrap();
        write_definitions(dir.path());
        let config = config(dir.path());
        let pipeline = Pipeline::new(&config);
        let definitions = pipeline.load_definitions().unwrap();

        let docs = vec![
            doc("D1", vec![Annotation::affirmed("S1"), Annotation::affirmed("W1"), Annotation::affirmed("W1")]),
            doc("D2", vec![Annotation::negated("S1")]),
        ];
        let output = pipeline.score(&definitions, &docs).unwrap();

        assert_eq!(output.table.len(), 2);
        // partial medication list: no categories
        assert!(output.manifest.categories.is_none());
        assert_eq!(output.manifest.definitions.len(), 2);
        assert!(output.manifest.finished_at.is_some());

        let csv = std::fs::read_to_string(&config.output.table).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next().unwrap(),
            "doc_id,pat_id,encounter_date,age,female,stroke_chadsvasc,female_chadsvasc,total_chadsvasc,warfarin,aspirin"
        );
        assert_eq!(lines.next().unwrap(), "D1,P-D1,2015-03-03,70,1,1,1,3,1,0");
        assert_eq!(lines.next().unwrap(), "D2,P-D2,2015-03-03,70,1,0,1,1,0,0");

        assert!(PathBuf::from(&config.output.manifest).exists());
    }

    #[test]
    fn test_prepare_table_keeps_other_medication_counts() {
        let dir = tempfile::tempdir().unwrap();
        write_definitions(dir.path());
        std::fs::write(dir.path().join("meds.csv"), "component,cui\nwarfarin,W1\nheparin,H1\n").unwrap();
        let config = config(dir.path());
        let pipeline = Pipeline::new(&config);
        let definitions = pipeline.load_definitions().unwrap();

        let docs = vec![doc(
            "D1",
            vec![
                Annotation::affirmed("W1"),
                Annotation::affirmed("W1"),
                Annotation::affirmed("H1"),
                Annotation::affirmed("H1"),
            ],
        )];
        let output = pipeline.score(&definitions, &docs).unwrap();

        let csv = std::fs::read_to_string(&config.output.table).unwrap();
        let mut lines = csv.lines();
        assert!(lines.next().unwrap().ends_with(",warfarin,heparin"));
        assert!(lines.next().unwrap().ends_with(",1,2"));
        assert_eq!(output.table.len(), 1);
    }
}
