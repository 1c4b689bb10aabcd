//! Tabular models for per-document counts, scores and the wide table.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};

/// Names of the identifier columns, in output order.
pub const IDENTIFIER_COLUMNS: [&str; 5] = ["doc_id", "pat_id", "encounter_date", "age", "female"];

/// The identifier set every intermediate table carries and joins on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentKey {
    pub document_id: String,
    pub patient_id: String,
    pub encounter_date: NaiveDate,
    pub age: f64,
    pub is_female: bool,
}

// Age is compared bitwise so keys stay usable as hash map keys.
impl PartialEq for DocumentKey {
    fn eq(&self, other: &Self) -> bool {
        self.document_id == other.document_id
            && self.patient_id == other.patient_id
            && self.encounter_date == other.encounter_date
            && self.age.to_bits() == other.age.to_bits()
            && self.is_female == other.is_female
    }
}

impl Eq for DocumentKey {}

impl Hash for DocumentKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.document_id.hash(state);
        self.patient_id.hash(state);
        self.encounter_date.hash(state);
        self.age.to_bits().hash(state);
        self.is_female.hash(state);
    }
}

impl DocumentKey {
    /// Identifier values in [`IDENTIFIER_COLUMNS`] order.
    pub fn values(&self) -> [Value; 5] {
        [
            Value::Text(self.document_id.clone()),
            Value::Text(self.patient_id.clone()),
            Value::Date(self.encounter_date),
            Value::Float(self.age),
            Value::Bool(self.is_female),
        ]
    }
}

/// Per-document mention counts for every component of one code list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentCounts {
    pub key: DocumentKey,
    pub counts: BTreeMap<String, u32>,
}

impl ComponentCounts {
    /// Count for a component; absent components count as 0.
    pub fn count(&self, component: &str) -> u32 {
        self.counts.get(component).copied().unwrap_or(0)
    }
}

/// A single cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Date(NaiveDate),
    Text(String),
}

impl Value {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Date(_) | Value::Text(_) => None,
        }
    }

    /// Truthiness used for flags: nonzero numbers and `true`.
    pub fn is_truthy(&self) -> bool {
        self.as_f64().map(|v| v != 0.0).unwrap_or(false)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", if *b { 1 } else { 0 }),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Table shape errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TableError {
    #[error("row has {found} values, table has {expected} columns")]
    RowWidth { expected: usize, found: usize },

    #[error("column not found: {0}")]
    MissingColumn(String),

    #[error("column already exists: {0}")]
    DuplicateColumn(String),
}

/// One row of a [`Table`]: its key and one optional value per column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    pub key: DocumentKey,
    pub values: Vec<Option<Value>>,
}

/// A keyed table. Identifier columns live in each row's key; `columns`
/// names the remaining value columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<TableRow>,
}

impl Table {
    /// Create an empty table. Column names must be unique and must not
    /// shadow an identifier column.
    pub fn new(columns: Vec<String>) -> Result<Self, TableError> {
        let mut seen = std::collections::HashSet::new();
        for column in &columns {
            if IDENTIFIER_COLUMNS.contains(&column.as_str()) || !seen.insert(column.as_str()) {
                return Err(TableError::DuplicateColumn(column.clone()));
            }
        }
        Ok(Self {
            columns,
            rows: Vec::new(),
        })
    }

    pub fn push_row(&mut self, key: DocumentKey, values: Vec<Option<Value>>) -> Result<(), TableError> {
        if values.len() != self.columns.len() {
            return Err(TableError::RowWidth {
                expected: self.columns.len(),
                found: values.len(),
            });
        }
        self.rows.push(TableRow { key, values });
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[TableRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Value at (row, column); `None` for nulls and unknown columns.
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let c = self.column_index(column)?;
        self.rows.get(row)?.values[c].as_ref()
    }

    /// All values of one column, in row order.
    pub fn column(&self, name: &str) -> Result<Vec<Option<&Value>>, TableError> {
        let c = self
            .column_index(name)
            .ok_or_else(|| TableError::MissingColumn(name.to_string()))?;
        Ok(self.rows.iter().map(|r| r.values[c].as_ref()).collect())
    }

    /// Find the first row with a given document id.
    pub fn row_by_document(&self, document_id: &str) -> Option<&TableRow> {
        self.rows.iter().find(|r| r.key.document_id == document_id)
    }

    /// Append a computed column.
    pub fn add_column(&mut self, name: &str, values: Vec<Option<Value>>) -> Result<(), TableError> {
        if IDENTIFIER_COLUMNS.contains(&name) || self.column_index(name).is_some() {
            return Err(TableError::DuplicateColumn(name.to_string()));
        }
        if values.len() != self.rows.len() {
            return Err(TableError::RowWidth {
                expected: self.rows.len(),
                found: values.len(),
            });
        }
        self.columns.push(name.to_string());
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.values.push(value);
        }
        Ok(())
    }

    /// Rewrite every value of an existing column in place.
    pub fn map_column<F>(&mut self, name: &str, mut f: F) -> Result<(), TableError>
    where
        F: FnMut(Option<Value>) -> Option<Value>,
    {
        let c = self
            .column_index(name)
            .ok_or_else(|| TableError::MissingColumn(name.to_string()))?;
        for row in &mut self.rows {
            let value = row.values[c].take();
            row.values[c] = f(value);
        }
        Ok(())
    }

    /// Rows grouped by key, preserving row order within each key.
    pub(crate) fn index_by_key(&self) -> HashMap<&DocumentKey, Vec<usize>> {
        let mut index: HashMap<&DocumentKey, Vec<usize>> = HashMap::new();
        for (i, row) in self.rows.iter().enumerate() {
            index.entry(&row.key).or_default().push(i);
        }
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(doc: &str, age: f64) -> DocumentKey {
        DocumentKey {
            document_id: doc.into(),
            patient_id: format!("P-{}", doc),
            encounter_date: NaiveDate::from_ymd_opt(2016, 5, 4).unwrap(),
            age,
            is_female: false,
        }
    }

    #[test]
    fn test_key_equality_uses_all_fields() {
        assert_eq!(key("D1", 70.25), key("D1", 70.25));
        assert_ne!(key("D1", 70.25), key("D1", 70.5));
        assert_ne!(key("D1", 70.25), key("D2", 70.25));

        let mut map = HashMap::new();
        map.insert(key("D1", 70.25), 1);
        assert_eq!(map.get(&key("D1", 70.25)), Some(&1));
    }

    #[test]
    fn test_table_rejects_bad_shapes() {
        assert_eq!(
            Table::new(vec!["a".into(), "a".into()]),
            Err(TableError::DuplicateColumn("a".into()))
        );
        assert!(Table::new(vec!["age".into()]).is_err());

        let mut table = Table::new(vec!["a".into()]).unwrap();
        assert_eq!(
            table.push_row(key("D1", 70.0), vec![]),
            Err(TableError::RowWidth { expected: 1, found: 0 })
        );
    }

    #[test]
    fn test_add_and_map_column() {
        let mut table = Table::new(vec!["warfarin".into()]).unwrap();
        table.push_row(key("D1", 70.0), vec![Some(Value::Int(3))]).unwrap();
        table.push_row(key("D2", 60.0), vec![None]).unwrap();

        table
            .map_column("warfarin", |v| v.map(|v| Value::Int(v.is_truthy() as i64)))
            .unwrap();
        assert_eq!(table.get(0, "warfarin"), Some(&Value::Int(1)));
        assert_eq!(table.get(1, "warfarin"), None);

        table
            .add_column("ac", vec![Some(Value::Int(1)), Some(Value::Int(0))])
            .unwrap();
        assert_eq!(table.columns(), &["warfarin".to_string(), "ac".to_string()]);
        assert!(table.add_column("ac", vec![None, None]).is_err());
        assert!(table.map_column("missing", |v| v).is_err());
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Float(2.0).to_string(), "2");
        assert_eq!(Value::Float(0.5).to_string(), "0.5");
        assert_eq!(Value::Bool(true).to_string(), "1");
        assert_eq!(
            Value::Date(NaiveDate::from_ymd_opt(2012, 1, 9).unwrap()).to_string(),
            "2012-01-09"
        );
    }
}
