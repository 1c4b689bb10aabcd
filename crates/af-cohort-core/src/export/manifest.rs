//! Run manifest: what a pipeline run read, dropped and produced.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use tracing::info;
use uuid::Uuid;

use super::{create_file, ExportResult};
use crate::analysis::CategorySummary;
use crate::annotate::AnnotationFailure;
use crate::cohort::{CohortCriteria, StageCount};
use crate::models::{MedicationList, ScoreDefinition};
use crate::scoring::{JoinReport, ScoringOutput, ZeroSupport};

/// A definition file and the SHA-256 of its bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefinitionFingerprint {
    /// Score name, or `medications`
    pub name: String,
    pub sha256: String,
}

impl DefinitionFingerprint {
    pub fn of_score(definition: &ScoreDefinition) -> Self {
        Self {
            name: definition.name.clone(),
            sha256: definition.fingerprint.clone(),
        }
    }

    pub fn of_medications(medications: &MedicationList) -> Self {
        Self {
            name: "medications".to_string(),
            sha256: medications.fingerprint.clone(),
        }
    }
}

/// Cohort sizes through the run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    /// Documents handed to annotation
    pub complete_cohort: usize,
    pub annotated: usize,
    pub failed: usize,
    /// Rows in the exported table
    pub final_rows: usize,
    /// Right-table rows lost to left joins
    pub dropped_rows: usize,
}

/// Manifest written next to the exported table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: String,
    /// RFC 3339
    pub started_at: String,
    pub finished_at: Option<String>,
    pub criteria: Option<CohortCriteria>,
    pub stages: Vec<StageCount>,
    pub counts: RunCounts,
    pub failures: Vec<AnnotationFailure>,
    pub zero_support: Vec<ZeroSupport>,
    pub joins: Vec<JoinReport>,
    pub definitions: Vec<DefinitionFingerprint>,
    pub categories: Option<CategorySummary>,
}

impl RunManifest {
    /// Start a manifest with a fresh run id and the current time.
    pub fn start() -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            started_at: Utc::now().to_rfc3339(),
            finished_at: None,
            criteria: None,
            stages: Vec::new(),
            counts: RunCounts::default(),
            failures: Vec::new(),
            zero_support: Vec::new(),
            joins: Vec::new(),
            definitions: Vec::new(),
            categories: None,
        }
    }

    /// Record fingerprints for every definition used.
    pub fn record_definitions(&mut self, scores: &[ScoreDefinition], medications: Option<&MedicationList>) {
        self.definitions = scores.iter().map(DefinitionFingerprint::of_score).collect();
        if let Some(meds) = medications {
            self.definitions.push(DefinitionFingerprint::of_medications(meds));
        }
    }

    /// Record what the scoring pass kept and dropped.
    pub fn record_scoring(&mut self, output: &ScoringOutput) {
        self.counts.final_rows = output.merged.table.len();
        self.counts.dropped_rows = output.merged.dropped_rows();
        self.joins = output.merged.joins.clone();
        self.zero_support = output.zero_support.clone();
    }

    /// Stamp the finish time.
    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now().to_rfc3339());
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn write<W: Write>(&self, writer: W) -> ExportResult<()> {
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn write_file<P: AsRef<Path>>(&self, path: P) -> ExportResult<()> {
        let path = path.as_ref();
        self.write(create_file(path)?)?;
        info!(run_id = %self.run_id, path = %path.display(), "Wrote run manifest");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::{fingerprint, DefinitionLoader};

    const CHADSVASC: &str = "score,component,cui,points\nchadsvasc,stroke,S1,2\nchadsvasc,female,,1\n";

    #[test]
    fn test_manifest_timestamps_and_id() {
        let mut manifest = RunManifest::start();
        assert!(Uuid::parse_str(&manifest.run_id).is_ok());
        assert!(chrono::DateTime::parse_from_rfc3339(&manifest.started_at).is_ok());
        assert!(manifest.finished_at.is_none());

        manifest.finish();
        let finished = manifest.finished_at.as_deref().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(finished).is_ok());

        assert_ne!(RunManifest::start().run_id, manifest.run_id);
    }

    #[test]
    fn test_fingerprints_are_stable() {
        let loader = DefinitionLoader::new();
        let first = loader
            .load_score_from_reader("chadsvasc.csv", CHADSVASC.as_bytes())
            .unwrap();
        let second = loader
            .load_score_from_reader("chadsvasc.csv", CHADSVASC.as_bytes())
            .unwrap();

        let mut a = RunManifest::start();
        a.record_definitions(std::slice::from_ref(&first), None);
        let mut b = RunManifest::start();
        b.record_definitions(std::slice::from_ref(&second), None);

        assert_eq!(a.definitions, b.definitions);
        assert_eq!(a.definitions[0].sha256, fingerprint(CHADSVASC.as_bytes()));
        assert_eq!(a.definitions[0].name, "chadsvasc");
    }

    #[test]
    fn test_manifest_json_shape() {
        let mut manifest = RunManifest::start();
        manifest.counts.complete_cohort = 10;
        manifest.counts.final_rows = 9;
        manifest.failures.push(AnnotationFailure {
            document_id: "D3".into(),
            patient_id: "P3".into(),
            reason: "no engine output".into(),
        });

        let json: serde_json::Value = serde_json::from_str(&manifest.to_json().unwrap()).unwrap();
        assert_eq!(json["counts"]["complete_cohort"], 10);
        assert_eq!(json["counts"]["final_rows"], 9);
        assert_eq!(json["failures"][0]["document_id"], "D3");
        assert!(json["finished_at"].is_null());
    }
}
