//! Presence-weighted score calculation.

use tracing::info;

use super::{ScoreRun, ScoringResult};
use crate::models::{ComponentCounts, ScoreDefinition, Table, Value};

/// Score each row against a definition.
///
/// A component contributes its points when its count is nonzero, whatever
/// the count. Columns are `<component>_<score>` in definition order followed
/// by `total_<score>`. Components with no support across all rows are
/// reported on the run.
pub fn calculate(rows: &[ComponentCounts], definition: &ScoreDefinition) -> ScoringResult<ScoreRun> {
    let components = definition.codes.components();

    let mut columns: Vec<String> = components
        .iter()
        .map(|c| definition.points_column(&c.name))
        .collect();
    columns.push(definition.total_column());

    let mut table = Table::new(columns)?;
    for row in rows {
        let mut values = Vec::with_capacity(components.len() + 1);
        let mut total = 0.0;
        for component in components {
            let points = if row.count(&component.name) > 0 {
                component.points
            } else {
                0.0
            };
            total += points;
            values.push(Some(Value::Float(points)));
        }
        values.push(Some(Value::Float(total)));
        table.push_row(row.key.clone(), values)?;
    }

    let zero_support: Vec<String> = components
        .iter()
        .filter(|c| rows.iter().all(|r| r.count(&c.name) == 0))
        .map(|c| c.name.clone())
        .collect();

    if !zero_support.is_empty() {
        info!(
            score = %definition.name,
            "Components not found in any document: {}",
            zero_support.join(", ")
        );
    }

    Ok(ScoreRun {
        score: definition.name.clone(),
        table,
        zero_support,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CodeList, DocumentKey, ScoreKind};
    use chrono::NaiveDate;

    fn definition() -> ScoreDefinition {
        let mut codes = CodeList::new();
        codes.upsert_component("stroke", 2.0);
        codes.upsert_component("diabetes", 1.0);
        codes.upsert_component("hypertension", 1.0);
        codes.assign_code("S1", "stroke");
        codes.assign_code("D1", "diabetes");
        codes.assign_code("H1", "hypertension");
        ScoreDefinition {
            name: "chadsvasc".into(),
            kind: ScoreKind::ChaDsVasc,
            codes,
            warnings: vec![],
            fingerprint: String::new(),
        }
    }

    fn row(doc: &str, counts: &[(&str, u32)]) -> ComponentCounts {
        ComponentCounts {
            key: DocumentKey {
                document_id: doc.into(),
                patient_id: format!("P-{}", doc),
                encounter_date: NaiveDate::from_ymd_opt(2017, 1, 1).unwrap(),
                age: 70.0,
                is_female: false,
            },
            counts: counts.iter().map(|(c, n)| (c.to_string(), *n)).collect(),
        }
    }

    #[test]
    fn test_presence_not_mentions() {
        let run = calculate(&[row("D1", &[("stroke", 2), ("diabetes", 0)])], &definition()).unwrap();

        assert_eq!(run.table.get(0, "stroke_chadsvasc"), Some(&Value::Float(2.0)));
        assert_eq!(run.table.get(0, "diabetes_chadsvasc"), Some(&Value::Float(0.0)));
        assert_eq!(run.table.get(0, "total_chadsvasc"), Some(&Value::Float(2.0)));
    }

    #[test]
    fn test_missing_components_count_as_zero() {
        let run = calculate(&[row("D1", &[("diabetes", 1)])], &definition()).unwrap();
        assert_eq!(run.table.get(0, "stroke_chadsvasc"), Some(&Value::Float(0.0)));
        assert_eq!(run.table.get(0, "total_chadsvasc"), Some(&Value::Float(1.0)));
    }

    #[test]
    fn test_column_layout_and_identifiers() {
        let rows = vec![row("D1", &[]), row("D2", &[])];
        let run = calculate(&rows, &definition()).unwrap();

        assert_eq!(
            run.table.columns(),
            &[
                "stroke_chadsvasc".to_string(),
                "diabetes_chadsvasc".to_string(),
                "hypertension_chadsvasc".to_string(),
                "total_chadsvasc".to_string(),
            ]
        );
        assert_eq!(run.table.rows()[1].key, rows[1].key);
    }

    #[test]
    fn test_zero_support_reported() {
        let rows = vec![
            row("D1", &[("stroke", 1), ("diabetes", 0), ("hypertension", 0)]),
            row("D2", &[("stroke", 0), ("diabetes", 3), ("hypertension", 0)]),
        ];
        let run = calculate(&rows, &definition()).unwrap();
        assert_eq!(run.zero_support, vec!["hypertension".to_string()]);
    }

    #[test]
    fn test_empty_batch_reports_every_component() {
        let run = calculate(&[], &definition()).unwrap();
        assert!(run.table.is_empty());
        assert_eq!(run.zero_support.len(), 3);
    }
}
