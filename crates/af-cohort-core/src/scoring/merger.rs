//! Joining per-score tables and medication counts into the wide table.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;
use tracing::debug;

use super::{aggregate, ScoreRun};
use crate::models::{AnnotatedDocument, MedicationList, Table, TableError, Value};

/// Merge errors.
#[derive(Error, Debug)]
pub enum MergeError {
    #[error("no score tables to merge")]
    NoScores,

    #[error("column {0} present on both sides of the join")]
    ColumnCollision(String),

    #[error("table error: {0}")]
    Table(#[from] TableError),
}

pub type MergeResult<T> = Result<T, MergeError>;

/// What happened to the rows of one left join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinReport {
    /// Name of the joined-in table
    pub right: String,
    pub left_rows: usize,
    pub right_rows: usize,
    pub output_rows: usize,
    /// Left rows with no matching right row (null-filled)
    pub unmatched_left: usize,
    /// Right rows whose key is absent from the left table
    pub dropped_right: usize,
}

/// The wide table with a report for every join that built it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedTable {
    pub table: Table,
    pub joins: Vec<JoinReport>,
}

impl MergedTable {
    /// Right rows dropped across all joins.
    pub fn dropped_rows(&self) -> usize {
        self.joins.iter().map(|j| j.dropped_right).sum()
    }
}

/// Left-join `right` onto `left` by identifier key.
///
/// Output follows left row order. A left row matching several right rows
/// is repeated once per match, in right order; an unmatched left row gets
/// nulls. Right rows absent from the left are dropped and counted.
pub fn left_join(left: &Table, right: &Table, right_name: &str) -> MergeResult<(Table, JoinReport)> {
    for column in right.columns() {
        if left.column_index(column).is_some() {
            return Err(MergeError::ColumnCollision(column.clone()));
        }
    }

    let mut columns = left.columns().to_vec();
    columns.extend(right.columns().iter().cloned());
    let mut joined = Table::new(columns)?;

    let right_index = right.index_by_key();
    let nulls = vec![None; right.columns().len()];
    let mut unmatched_left = 0;

    for row in left.rows() {
        match right_index.get(&row.key) {
            Some(matches) => {
                for &i in matches {
                    let mut values = row.values.clone();
                    values.extend(right.rows()[i].values.iter().cloned());
                    joined.push_row(row.key.clone(), values)?;
                }
            }
            None => {
                unmatched_left += 1;
                let mut values = row.values.clone();
                values.extend(nulls.iter().cloned());
                joined.push_row(row.key.clone(), values)?;
            }
        }
    }

    let left_keys: HashSet<_> = left.rows().iter().map(|r| &r.key).collect();
    let dropped_right = right
        .rows()
        .iter()
        .filter(|r| !left_keys.contains(&r.key))
        .count();

    if dropped_right > 0 {
        debug!(
            "Dropped {} {} rows with no match in the anchor table",
            dropped_right, right_name
        );
    }

    let report = JoinReport {
        right: right_name.to_string(),
        left_rows: left.len(),
        right_rows: right.len(),
        output_rows: joined.len(),
        unmatched_left,
        dropped_right,
    };
    Ok((joined, report))
}

/// Left-join every score table onto the first.
pub fn merge_scores(runs: &[ScoreRun]) -> MergeResult<MergedTable> {
    let (anchor, rest) = runs.split_first().ok_or(MergeError::NoScores)?;

    let mut table = anchor.table.clone();
    let mut joins = Vec::with_capacity(rest.len());
    for run in rest {
        let (joined, report) = left_join(&table, &run.table, &run.score)?;
        table = joined;
        joins.push(report);
    }

    Ok(MergedTable { table, joins })
}

/// Raw medication mention counts, one column per medication.
pub fn medication_table(documents: &[AnnotatedDocument], medications: &MedicationList) -> MergeResult<Table> {
    let columns: Vec<String> = medications
        .codes
        .component_names()
        .map(str::to_string)
        .collect();
    let mut table = Table::new(columns.clone())?;

    for row in aggregate(documents, &medications.codes) {
        let values = columns
            .iter()
            .map(|c| Some(Value::Int(i64::from(row.count(c)))))
            .collect();
        table.push_row(row.key, values)?;
    }
    Ok(table)
}

/// Left-join medication counts onto the merged score table.
pub fn add_medications(merged: MergedTable, medications: &Table) -> MergeResult<MergedTable> {
    let (table, report) = left_join(&merged.table, medications, "medications")?;
    let mut joins = merged.joins;
    joins.push(report);
    Ok(MergedTable { table, joins })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentKey;
    use chrono::NaiveDate;

    fn key(doc: &str) -> DocumentKey {
        DocumentKey {
            document_id: doc.into(),
            patient_id: format!("P-{}", doc),
            encounter_date: NaiveDate::from_ymd_opt(2012, 9, 14).unwrap(),
            age: 68.0,
            is_female: true,
        }
    }

    fn table(column: &str, rows: &[(&str, i64)]) -> Table {
        let mut t = Table::new(vec![column.to_string()]).unwrap();
        for (doc, v) in rows {
            t.push_row(key(doc), vec![Some(Value::Int(*v))]).unwrap();
        }
        t
    }

    #[test]
    fn test_left_join_keeps_anchor_rows() {
        let left = table("total_chadsvasc", &[("D1", 3), ("D2", 1), ("D3", 0)]);
        let right = table("total_hasbled", &[("D3", 2), ("D1", 1), ("D9", 4)]);

        let (joined, report) = left_join(&left, &right, "hasbled").unwrap();
        assert_eq!(joined.len(), 3);
        assert_eq!(joined.rows()[0].key.document_id, "D1");
        assert_eq!(joined.get(0, "total_hasbled"), Some(&Value::Int(1)));
        assert_eq!(joined.get(1, "total_hasbled"), None);
        assert_eq!(joined.get(2, "total_hasbled"), Some(&Value::Int(2)));

        assert_eq!(report.unmatched_left, 1);
        assert_eq!(report.dropped_right, 1);
        assert_eq!(report.output_rows, 3);
    }

    #[test]
    fn test_duplicate_right_keys_expand_in_place() {
        let left = table("a", &[("D1", 1), ("D2", 2)]);
        let right = table("b", &[("D1", 10), ("D1", 11)]);

        let (joined, _) = left_join(&left, &right, "b").unwrap();
        let docs: Vec<&str> = joined.rows().iter().map(|r| r.key.document_id.as_str()).collect();
        assert_eq!(docs, vec!["D1", "D1", "D2"]);
        assert_eq!(joined.get(0, "b"), Some(&Value::Int(10)));
        assert_eq!(joined.get(1, "b"), Some(&Value::Int(11)));
    }

    #[test]
    fn test_column_collision() {
        let left = table("warfarin", &[("D1", 1)]);
        let right = table("warfarin", &[("D1", 2)]);
        let err = left_join(&left, &right, "medications").unwrap_err();
        assert!(matches!(err, MergeError::ColumnCollision(c) if c == "warfarin"));
    }

    #[test]
    fn test_merge_requires_a_score() {
        assert!(matches!(merge_scores(&[]), Err(MergeError::NoScores)));
    }

    #[test]
    fn test_merge_scores_anchors_on_first() {
        let runs = vec![
            ScoreRun {
                score: "chadsvasc".into(),
                table: table("total_chadsvasc", &[("D1", 2), ("D2", 3)]),
                zero_support: vec![],
            },
            ScoreRun {
                score: "hasbled".into(),
                table: table("total_hasbled", &[("D2", 1), ("D4", 1)]),
                zero_support: vec![],
            },
        ];

        let merged = merge_scores(&runs).unwrap();
        assert_eq!(merged.table.len(), 2);
        assert_eq!(merged.dropped_rows(), 1);
        assert_eq!(merged.table.get(0, "total_hasbled"), None);
        assert_eq!(merged.table.get(1, "total_hasbled"), Some(&Value::Int(1)));
    }
}
