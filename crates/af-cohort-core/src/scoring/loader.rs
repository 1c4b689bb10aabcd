//! Score and medication definition loading.
//!
//! Definition files are CSV. Score files carry `score, component, cui,
//! points`; medication files carry `component, cui` and usually `term`.
//! An optional `term` or `name` column feeds the dictionary tagger lexicon.

use serde::{Deserialize, Deserializer};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

use crate::models::{CodeList, DefinitionWarning, MedicationList, ScoreDefinition, ScoreKind};

const SCORE_COLUMNS: [&str; 4] = ["score", "component", "cui", "points"];
const MEDICATION_COLUMNS: [&str; 2] = ["component", "cui"];

/// Definition loading errors. Every variant names the offending definition.
#[derive(Error, Debug)]
pub enum DefinitionError {
    #[error("failed to read definition {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed definition {name}: {reason}")]
    Format { name: String, reason: String },

    #[error("definition {name} encodes more than one score: {}", .scores.join(", "))]
    MultiScore { name: String, scores: Vec<String> },

    #[error("definition {name}: {warning}")]
    Strict {
        name: String,
        warning: DefinitionWarning,
    },
}

impl DefinitionError {
    fn format(name: &str, reason: impl Into<String>) -> Self {
        Self::Format {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

pub type DefinitionResult<T> = Result<T, DefinitionError>;

/// Loads definition tables.
///
/// In strict mode conflicting points and reassigned codes are errors;
/// otherwise the last row wins and a warning is recorded.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefinitionLoader {
    strict: bool,
}

impl DefinitionLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Load a score definition from a CSV file.
    pub fn load_score<P: AsRef<Path>>(&self, path: P) -> DefinitionResult<ScoreDefinition> {
        let path = path.as_ref();
        let bytes = read_file(path)?;
        self.parse_score(&path.display().to_string(), &bytes)
    }

    /// Load a score definition from any reader; `name` is used in messages.
    pub fn load_score_from_reader<R: Read>(
        &self,
        name: &str,
        mut reader: R,
    ) -> DefinitionResult<ScoreDefinition> {
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .map_err(|source| DefinitionError::Io {
                name: name.to_string(),
                source,
            })?;
        self.parse_score(name, &bytes)
    }

    /// Load a medication code list from a CSV file.
    pub fn load_medications<P: AsRef<Path>>(&self, path: P) -> DefinitionResult<MedicationList> {
        let path = path.as_ref();
        let bytes = read_file(path)?;
        self.parse_medications(&path.display().to_string(), &bytes)
    }

    pub fn load_medications_from_reader<R: Read>(
        &self,
        name: &str,
        mut reader: R,
    ) -> DefinitionResult<MedicationList> {
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .map_err(|source| DefinitionError::Io {
                name: name.to_string(),
                source,
            })?;
        self.parse_medications(name, &bytes)
    }

    fn parse_score(&self, name: &str, bytes: &[u8]) -> DefinitionResult<ScoreDefinition> {
        let mut reader = csv_reader(bytes);
        check_headers(name, &mut reader, &SCORE_COLUMNS)?;

        let mut scores: Vec<String> = Vec::new();
        let mut codes = CodeList::new();
        let mut warnings = Vec::new();
        let mut rows = 0usize;

        for (i, record) in reader.deserialize::<ScoreRow>().enumerate() {
            let line = i + 2;
            let row = record.map_err(|e| DefinitionError::format(name, e.to_string()))?;
            rows += 1;

            if row.score.is_empty() {
                return Err(DefinitionError::format(name, format!("empty score at line {}", line)));
            }
            if !scores.contains(&row.score) {
                scores.push(row.score.clone());
            }

            let points: f64 = row.points.parse().map_err(|_| {
                DefinitionError::format(
                    name,
                    format!("points '{}' at line {} is not a number", row.points, line),
                )
            })?;

            let entry = DefinitionRow {
                component: row.component,
                cui: row.cui,
                term: row.term.or(row.name),
            };
            self.apply_row(name, line, &entry, points, &mut codes, &mut warnings)?;
        }

        if rows == 0 {
            return Err(DefinitionError::format(name, "definition has no rows"));
        }
        if scores.len() > 1 {
            return Err(DefinitionError::MultiScore {
                name: name.to_string(),
                scores,
            });
        }

        let score = scores.remove(0);
        let definition = ScoreDefinition {
            kind: ScoreKind::from_name(&score),
            name: score,
            codes,
            warnings,
            fingerprint: fingerprint(bytes),
        };

        info!(
            score = %definition.name,
            components = definition.codes.len(),
            codes = definition.codes.member_codes().len(),
            warnings = definition.warnings.len(),
            "Loaded score definition from {}",
            name
        );
        Ok(definition)
    }

    fn parse_medications(&self, name: &str, bytes: &[u8]) -> DefinitionResult<MedicationList> {
        let mut reader = csv_reader(bytes);
        check_headers(name, &mut reader, &MEDICATION_COLUMNS)?;

        let mut codes = CodeList::new();
        let mut warnings = Vec::new();
        let mut rows = 0usize;

        for (i, record) in reader.deserialize::<MedicationRow>().enumerate() {
            let line = i + 2;
            let row = record.map_err(|e| DefinitionError::format(name, e.to_string()))?;
            rows += 1;

            let entry = DefinitionRow {
                component: row.component,
                cui: row.cui,
                term: row.term.or(row.name),
            };
            self.apply_row(name, line, &entry, 0.0, &mut codes, &mut warnings)?;
        }

        if rows == 0 {
            return Err(DefinitionError::format(name, "definition has no rows"));
        }

        info!(
            medications = codes.len(),
            codes = codes.member_codes().len(),
            "Loaded medication list from {}",
            name
        );
        Ok(MedicationList {
            codes,
            warnings,
            fingerprint: fingerprint(bytes),
        })
    }

    fn apply_row(
        &self,
        name: &str,
        line: usize,
        row: &DefinitionRow,
        points: f64,
        codes: &mut CodeList,
        warnings: &mut Vec<DefinitionWarning>,
    ) -> DefinitionResult<()> {
        if row.component.is_empty() {
            return Err(DefinitionError::format(
                name,
                format!("empty component at line {}", line),
            ));
        }

        if let Some(previous) = codes.upsert_component(&row.component, points) {
            if previous != points {
                self.record(
                    name,
                    DefinitionWarning::ConflictingPoints {
                        component: row.component.clone(),
                        previous,
                        kept: points,
                    },
                    warnings,
                )?;
            }
        }

        if let Some(cui) = &row.cui {
            if let Some(from) = codes.assign_code(cui, &row.component) {
                self.record(
                    name,
                    DefinitionWarning::CodeReassigned {
                        code: cui.clone(),
                        from,
                        to: row.component.clone(),
                    },
                    warnings,
                )?;
            }
            if let Some(term) = &row.term {
                codes.add_term(cui, term);
            }
        }

        Ok(())
    }

    fn record(
        &self,
        name: &str,
        warning: DefinitionWarning,
        warnings: &mut Vec<DefinitionWarning>,
    ) -> DefinitionResult<()> {
        if self.strict {
            return Err(DefinitionError::Strict {
                name: name.to_string(),
                warning,
            });
        }
        warn!("Definition {}: {}", name, warning);
        warnings.push(warning);
        Ok(())
    }
}

/// Hex SHA-256 of a definition's source bytes.
pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn read_file(path: &Path) -> DefinitionResult<Vec<u8>> {
    std::fs::read(path).map_err(|source| DefinitionError::Io {
        name: path.display().to_string(),
        source,
    })
}

fn csv_reader(bytes: &[u8]) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(bytes)
}

fn check_headers(name: &str, reader: &mut csv::Reader<&[u8]>, required: &[&str]) -> DefinitionResult<()> {
    let headers = reader
        .headers()
        .map_err(|e| DefinitionError::format(name, e.to_string()))?;

    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|column| !headers.iter().any(|h| h == *column))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(DefinitionError::format(
            name,
            format!("missing required columns: {}", missing.join(", ")),
        ))
    }
}

/// Row shared by score and medication files once points are resolved.
struct DefinitionRow {
    component: String,
    cui: Option<String>,
    term: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScoreRow {
    score: String,
    component: String,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    cui: Option<String>,
    points: String,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    term: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MedicationRow {
    component: String,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    cui: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    term: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    name: Option<String>,
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.filter(|value| !value.trim().is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHADSVASC: &str = "\
score,component,cui,name,points
chadsvasc,congestive_heart_failure,C1,heart failure,1
chadsvasc,hypertension,H1,hypertension,1
chadsvasc,stroke,S1,stroke,2
chadsvasc,stroke,S2,transient ischaemic attack,2
chadsvasc,age_65_74,,,1
chadsvasc,age_gte75,,,2
chadsvasc,female,,,1
";

    fn load(csv: &str) -> DefinitionResult<ScoreDefinition> {
        DefinitionLoader::new().load_score_from_reader("test.csv", csv.as_bytes())
    }

    #[test]
    fn test_load_score_definition() {
        let definition = load(CHADSVASC).unwrap();

        assert_eq!(definition.name, "chadsvasc");
        assert_eq!(definition.kind, ScoreKind::ChaDsVasc);
        assert_eq!(definition.codes.len(), 6);

        let stroke = definition.codes.component("stroke").unwrap();
        assert_eq!(stroke.points, 2.0);
        assert_eq!(stroke.codes.len(), 2);
        assert_eq!(definition.codes.component_for_code("S2"), Some("stroke"));

        // Metadata components exist with no codes
        assert!(definition.codes.component("female").unwrap().codes.is_empty());
        assert!(definition.warnings.is_empty());
        assert_eq!(definition.codes.lexicon().len(), 4);
    }

    #[test]
    fn test_missing_column_is_format_error() {
        let err = load("score,component,cui\nchadsvasc,stroke,S1\n").unwrap_err();
        match err {
            DefinitionError::Format { name, reason } => {
                assert_eq!(name, "test.csv");
                assert!(reason.contains("points"));
            }
            other => panic!("expected format error, got {:?}", other),
        }
    }

    #[test]
    fn test_header_whitespace_is_trimmed() {
        let definition = load(" score , component , cui , points \nhasbled,stroke,S1,1\n").unwrap();
        assert_eq!(definition.kind, ScoreKind::HasBled);
    }

    #[test]
    fn test_empty_table_is_format_error() {
        let err = load("score,component,cui,points\n").unwrap_err();
        assert!(matches!(err, DefinitionError::Format { .. }));
    }

    #[test]
    fn test_bad_points_is_format_error() {
        let err = load("score,component,cui,points\nchadsvasc,stroke,S1,two\n").unwrap_err();
        assert!(err.to_string().contains("two"));
    }

    #[test]
    fn test_multiple_scores_rejected() {
        let err = load("score,component,cui,points\nchadsvasc,stroke,S1,2\nhasbled,stroke,S1,1\n")
            .unwrap_err();
        match err {
            DefinitionError::MultiScore { scores, .. } => {
                assert_eq!(scores, vec!["chadsvasc", "hasbled"]);
            }
            other => panic!("expected multi-score error, got {:?}", other),
        }
    }

    #[test]
    fn test_conflicting_points_last_wins() {
        let csv = "score,component,cui,points\nchadsvasc,stroke,S1,2\nchadsvasc,stroke,S2,3\n";
        let definition = load(csv).unwrap();

        assert_eq!(definition.codes.component("stroke").unwrap().points, 3.0);
        assert_eq!(
            definition.warnings,
            vec![DefinitionWarning::ConflictingPoints {
                component: "stroke".into(),
                previous: 2.0,
                kept: 3.0,
            }]
        );
    }

    #[test]
    fn test_strict_mode_rejects_conflicts() {
        let csv = "score,component,cui,points\nchadsvasc,stroke,S1,2\nchadsvasc,stroke,S2,3\n";
        let err = DefinitionLoader::new()
            .strict(true)
            .load_score_from_reader("strict.csv", csv.as_bytes())
            .unwrap_err();
        assert!(matches!(err, DefinitionError::Strict { .. }));

        let csv = "score,component,cui,points\nchadsvasc,stroke,S1,2\nchadsvasc,vascular,S1,1\n";
        let err = DefinitionLoader::new()
            .strict(true)
            .load_score_from_reader("strict.csv", csv.as_bytes())
            .unwrap_err();
        assert!(err.to_string().contains("S1"));
    }

    #[test]
    fn test_load_medications() {
        let csv = "component,cui,term\nwarfarin,W1,warfarin\nwarfarin,W2,coumadin\napixaban,A1,apixaban\n";
        let meds = DefinitionLoader::new()
            .load_medications_from_reader("meds.csv", csv.as_bytes())
            .unwrap();

        assert_eq!(meds.codes.len(), 2);
        assert_eq!(meds.codes.component("warfarin").unwrap().codes.len(), 2);
        assert_eq!(meds.codes.component("warfarin").unwrap().points, 0.0);
        assert_eq!(meds.codes.lexicon().len(), 3);
    }

    #[test]
    fn test_fingerprint_tracks_bytes() {
        let a = load(CHADSVASC).unwrap();
        let b = load(CHADSVASC).unwrap();
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_eq!(a.fingerprint.len(), 64);

        let changed = CHADSVASC.replace("stroke,S1,stroke,2", "stroke,S1,stroke,3");
        let c = load(&changed).unwrap();
        assert_ne!(a.fingerprint, c.fingerprint);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = DefinitionLoader::new()
            .load_score("/nonexistent/chadsvasc.csv")
            .unwrap_err();
        assert!(matches!(err, DefinitionError::Io { .. }));
        assert!(err.to_string().contains("chadsvasc.csv"));
    }
}
