//! Analysis preparation: binary flags and antithrombotic categories.
//!
//! Categories are a list of tagged rules evaluated in order, so a rule may
//! read medication columns or any category defined before it.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::models::{MedicationList, ScoreDefinition, ScoreKind, Table, TableError, Value};
use crate::scoring::DerivedComponent;

/// Antithrombotic medications the default categories are built from.
pub const MEDICATIONS: [&str; 10] = [
    "warfarin",
    "aspirin",
    "apixaban",
    "prasugrel",
    "clopidogrel",
    "dipyridamole",
    "rivaroxaban",
    "ticagrelor",
    "dabigatran",
    "edoxaban",
];

pub const DOACS: [&str; 4] = ["apixaban", "rivaroxaban", "dabigatran", "edoxaban"];

pub const ANTIPLATELETS: [&str; 5] = ["aspirin", "prasugrel", "clopidogrel", "dipyridamole", "ticagrelor"];

/// Analysis errors.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Table error: {0}")]
    Table(#[from] TableError),

    #[error("column not found: {0}")]
    MissingColumn(String),
}

pub type AnalysisResult<T> = Result<T, AnalysisError>;

/// How a category flag is derived from other columns. Nulls count as absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CategoryRule {
    /// Any listed column present
    AnyOf(Vec<String>),
    /// Every listed column present
    AllOf(Vec<String>),
    Not(String),
    /// `present` set and `absent` not set
    OnlyFirst { present: String, absent: String },
}

impl CategoryRule {
    fn columns(&self) -> Vec<&str> {
        match self {
            Self::AnyOf(cols) | Self::AllOf(cols) => cols.iter().map(String::as_str).collect(),
            Self::Not(col) => vec![col.as_str()],
            Self::OnlyFirst { present, absent } => vec![present.as_str(), absent.as_str()],
        }
    }
}

/// A named category flag column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    pub rule: CategoryRule,
}

impl Category {
    pub fn new(name: &str, rule: CategoryRule) -> Self {
        Self {
            name: name.to_string(),
            rule,
        }
    }
}

fn names(columns: &[&str]) -> Vec<String> {
    columns.iter().map(|c| c.to_string()).collect()
}

/// Antithrombotic categories: any/none, DOAC, anticoagulant, antiplatelet
/// and their combinations.
pub fn default_categories() -> Vec<Category> {
    vec![
        Category::new("any_at", CategoryRule::AnyOf(names(&MEDICATIONS))),
        Category::new("no_at", CategoryRule::Not("any_at".into())),
        Category::new("doac", CategoryRule::AnyOf(names(&DOACS))),
        Category::new("ac", CategoryRule::AnyOf(names(&["warfarin", "doac"]))),
        Category::new("ap", CategoryRule::AnyOf(names(&ANTIPLATELETS))),
        Category::new("ac_and_ap", CategoryRule::AllOf(names(&["ap", "ac"]))),
        Category::new(
            "ap_only",
            CategoryRule::OnlyFirst {
                present: "ap".into(),
                absent: "ac".into(),
            },
        ),
        Category::new(
            "ac_only",
            CategoryRule::OnlyFirst {
                present: "ac".into(),
                absent: "ap".into(),
            },
        ),
    ]
}

/// Columns analysed as present/absent rather than by weight: CHA2DS2-VASc
/// age bands and components worth more than one point, plus the
/// antithrombotics in [`MEDICATIONS`]. Other medication columns keep
/// their counts.
pub fn presence_columns(scores: &[ScoreDefinition], medications: Option<&MedicationList>) -> Vec<String> {
    let age_bands = [DerivedComponent::Age65To74.name(), DerivedComponent::AgeGte75.name()];
    let mut columns: Vec<String> = scores
        .iter()
        .filter(|score| score.kind == ScoreKind::ChaDsVasc)
        .flat_map(|score| {
            score
                .codes
                .components()
                .iter()
                .filter(|c| c.points > 1.0 || age_bands.contains(&c.name.as_str()))
                .map(|c| score.points_column(&c.name))
                .collect::<Vec<_>>()
        })
        .collect();
    if let Some(meds) = medications {
        columns.extend(
            meds.codes
                .component_names()
                .filter(|name| MEDICATIONS.contains(name))
                .map(str::to_string),
        );
    }
    columns
}

/// Replace counts with presence flags: > 0 becomes 1, anything else 0.
/// Nulls stay null.
pub fn binarize_columns(table: &mut Table, columns: &[&str]) -> AnalysisResult<()> {
    for column in columns {
        if table.column_index(column).is_none() {
            return Err(AnalysisError::MissingColumn(column.to_string()));
        }
        table.map_column(column, |value| {
            value.map(|v| Value::Int(i64::from(v.as_f64().is_some_and(|n| n > 0.0))))
        })?;
    }
    Ok(())
}

/// Append one flag column per category, in order.
pub fn apply_categories(table: &mut Table, categories: &[Category]) -> AnalysisResult<()> {
    for category in categories {
        let mut indices = Vec::new();
        for column in category.rule.columns() {
            let index = table
                .column_index(column)
                .ok_or_else(|| AnalysisError::MissingColumn(column.to_string()))?;
            indices.push(index);
        }

        let flags: Vec<Option<Value>> = table
            .rows()
            .iter()
            .map(|row| {
                let present = |i: usize| row.values[i].as_ref().is_some_and(Value::is_truthy);
                let flag = match &category.rule {
                    CategoryRule::AnyOf(_) => indices.iter().any(|&i| present(i)),
                    CategoryRule::AllOf(_) => indices.iter().all(|&i| present(i)),
                    CategoryRule::Not(_) => !present(indices[0]),
                    CategoryRule::OnlyFirst { .. } => present(indices[0]) && !present(indices[1]),
                };
                Some(Value::Int(i64::from(flag)))
            })
            .collect();

        table.add_column(&category.name, flags)?;
    }
    Ok(())
}

/// Count and share of rows flagged for one category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryCount {
    pub category: String,
    pub count: usize,
    pub percent: f64,
}

/// Category prevalence plus the partition consistency checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySummary {
    pub rows: usize,
    pub counts: Vec<CategoryCount>,
    /// `any_at + no_at` covers every row; `None` when either is absent
    pub any_plus_none_is_total: Option<bool>,
    /// `ac_only + ap_only + ac_and_ap == any_at`; `None` when any is absent
    pub exclusive_groups_sum_to_any: Option<bool>,
}

impl CategorySummary {
    pub fn count(&self, category: &str) -> Option<usize> {
        self.counts
            .iter()
            .find(|c| c.category == category)
            .map(|c| c.count)
    }
}

/// Summarise category flags and log each share.
pub fn summarize_categories(table: &Table, categories: &[Category]) -> AnalysisResult<CategorySummary> {
    let rows = table.len();
    let mut counts = Vec::with_capacity(categories.len());

    for category in categories {
        let values = table
            .column(&category.name)
            .map_err(|_| AnalysisError::MissingColumn(category.name.clone()))?;
        let count = values
            .iter()
            .filter(|v| v.is_some_and(Value::is_truthy))
            .count();
        let percent = if rows == 0 {
            0.0
        } else {
            count as f64 / rows as f64 * 100.0
        };
        info!("{} %: {:.2}", category.name, percent);
        counts.push(CategoryCount {
            category: category.name.clone(),
            count,
            percent,
        });
    }

    let mut summary = CategorySummary {
        rows,
        counts,
        any_plus_none_is_total: None,
        exclusive_groups_sum_to_any: None,
    };

    if let (Some(any), Some(none)) = (summary.count("any_at"), summary.count("no_at")) {
        let ok = any + none == rows;
        if !ok {
            warn!("any_at ({}) + no_at ({}) != cohort size ({})", any, none, rows);
        }
        summary.any_plus_none_is_total = Some(ok);
    }

    if let (Some(any), Some(ac), Some(ap), Some(both)) = (
        summary.count("any_at"),
        summary.count("ac_only"),
        summary.count("ap_only"),
        summary.count("ac_and_ap"),
    ) {
        let ok = ac + ap + both == any;
        if !ok {
            warn!(
                "ac_only ({}) + ap_only ({}) + ac_and_ap ({}) != any_at ({})",
                ac, ap, both, any
            );
        }
        summary.exclusive_groups_sum_to_any = Some(ok);
    }

    Ok(summary)
}
