//! Pipeline configuration from the environment.
//!
//! `.env` is read first when present; unset variables fall back to defaults.

use chrono::NaiveDate;
use std::env;
use std::path::PathBuf;
use thiserror::Error;

use crate::cohort::{CohortCriteria, SiteFilter};
use crate::models::parse_encounter_date;

/// Configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be a date (YYYY-MM-DD), got '{value}'")]
    InvalidDate { var: String, value: String },

    #[error("{var} must be a number, got '{value}'")]
    InvalidNumber { var: String, value: String },

    #[error("{var} must be true or false, got '{value}'")]
    InvalidBool { var: String, value: String },

    #[error("AF_SITE must be 'none' or 'uclh', got '{0}'")]
    UnknownSite(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Definition files used by a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionPaths {
    /// Score definitions; the first anchors the merged table
    pub scores: Vec<PathBuf>,
    pub medications: Option<PathBuf>,
}

/// Where outputs are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub table: PathBuf,
    /// Optional JSON copy of the table
    pub json: Option<PathBuf>,
    pub manifest: PathBuf,
}

/// Tracing controls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Top-level configuration for a pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub definitions: DefinitionPaths,
    pub note_store: PathBuf,
    pub demographics: PathBuf,
    pub output: OutputPaths,
    pub criteria: CohortCriteria,
    pub strict_definitions: bool,
    pub telemetry: TelemetryConfig,
}

impl PipelineConfig {
    /// Load `.env` if present, then read the environment.
    pub fn load() -> ConfigResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from any variable source; `lookup` returns `None` for unset.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());
        // Set-but-empty disables an optional file.
        let optional_path = |name: &str, default: &str| {
            let value = var(name, default);
            (!value.trim().is_empty()).then(|| PathBuf::from(value.trim()))
        };

        let scores = [
            optional_path("AF_CHADSVASC_DEFINITION", "data/chadsvasc_definition.csv"),
            optional_path("AF_HASBLED_DEFINITION", "data/hasbled_definition.csv"),
        ]
        .into_iter()
        .flatten()
        .collect();

        let defaults = CohortCriteria::default();
        let site = var("AF_SITE", "none")
            .parse::<SiteFilter>()
            .map_err(|_| ConfigError::UnknownSite(var("AF_SITE", "none")))?;

        let criteria = CohortCriteria {
            search_term: var("AF_SEARCH_TERM", &defaults.search_term),
            site,
            window_start: date(&lookup, "AF_COHORT_START", defaults.window_start)?,
            window_end: date(&lookup, "AF_COHORT_END", defaults.window_end)?,
            min_age: number(&lookup, "AF_MIN_AGE", defaults.min_age)?,
            reference_date: date(&lookup, "AF_REFERENCE_DATE", defaults.reference_date)?,
            limit: match lookup("AF_SEARCH_LIMIT").filter(|v| !v.trim().is_empty()) {
                Some(value) => Some(value.trim().parse::<usize>().map_err(|_| ConfigError::InvalidNumber {
                    var: "AF_SEARCH_LIMIT".to_string(),
                    value,
                })?),
                None => None,
            },
        };

        Ok(Self {
            definitions: DefinitionPaths {
                scores,
                medications: optional_path("AF_MEDICATION_DEFINITION", "data/medications_definition.csv"),
            },
            note_store: PathBuf::from(var("AF_NOTE_STORE", "data/notes.db")),
            demographics: PathBuf::from(var("AF_DEMOGRAPHICS", "data/demographics.csv")),
            output: OutputPaths {
                table: PathBuf::from(var("AF_OUTPUT_TABLE", "output/af_cohort.csv")),
                json: optional_path("AF_OUTPUT_JSON", ""),
                manifest: PathBuf::from(var("AF_OUTPUT_MANIFEST", "output/af_cohort_manifest.json")),
            },
            criteria,
            strict_definitions: flag(&lookup, "AF_STRICT_DEFINITIONS", false)?,
            telemetry: TelemetryConfig {
                log_level: var("AF_LOG_LEVEL", "info"),
            },
        })
    }
}

fn date<F>(lookup: &F, name: &str, default: NaiveDate) -> ConfigResult<NaiveDate>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) => parse_encounter_date(&value).ok_or(ConfigError::InvalidDate {
            var: name.to_string(),
            value,
        }),
        None => Ok(default),
    }
}

fn number<F>(lookup: &F, name: &str, default: f64) -> ConfigResult<f64>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) => value.trim().parse::<f64>().map_err(|_| ConfigError::InvalidNumber {
            var: name.to_string(),
            value,
        }),
        None => Ok(default),
    }
}

fn flag<F>(lookup: &F, name: &str, default: bool) -> ConfigResult<bool>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" | "" => Ok(false),
            _ => Err(ConfigError::InvalidBool {
                var: name.to_string(),
                value,
            }),
        },
        None => Ok(default),
    }
}
