//! Wide table writers.
//!
//! CSV cells: nulls empty, integers without decimals, floats in shortest
//! round-trip form, booleans as `1`/`0`, dates as `YYYY-MM-DD`.

use serde_json::{Map, Value as Json};
use std::io::Write;
use std::path::Path;
use tracing::info;

use super::{create_file, ExportResult};
use crate::models::{Table, Value, IDENTIFIER_COLUMNS};

/// Header row: identifiers first, then value columns.
pub fn header(table: &Table) -> Vec<String> {
    IDENTIFIER_COLUMNS
        .iter()
        .map(|c| c.to_string())
        .chain(table.columns().iter().cloned())
        .collect()
}

fn cell(value: Option<&Value>) -> String {
    value.map(Value::to_string).unwrap_or_default()
}

/// Write the table as CSV.
pub fn write_csv<W: Write>(table: &Table, writer: W) -> ExportResult<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(header(table))?;

    for row in table.rows() {
        let record: Vec<String> = row
            .key
            .values()
            .iter()
            .map(|v| cell(Some(v)))
            .chain(row.values.iter().map(|v| cell(v.as_ref())))
            .collect();
        csv_writer.write_record(&record)?;
    }

    csv_writer.flush().map_err(csv::Error::from)?;
    Ok(())
}

/// Write the table as CSV to `path`, creating parent directories.
pub fn write_csv_file<P: AsRef<Path>>(table: &Table, path: P) -> ExportResult<()> {
    let path = path.as_ref();
    write_csv(table, create_file(path)?)?;
    info!(rows = table.len(), path = %path.display(), "Wrote cohort table");
    Ok(())
}

fn json_cell(value: &Value) -> Json {
    match value {
        Value::Bool(b) => Json::from(i64::from(*b)),
        Value::Int(i) => Json::from(*i),
        // NaN and infinities have no JSON form
        Value::Float(f) => serde_json::Number::from_f64(*f).map(Json::Number).unwrap_or(Json::Null),
        Value::Date(d) => Json::String(d.format("%Y-%m-%d").to_string()),
        Value::Text(s) => Json::String(s.clone()),
    }
}

/// The table as an array of row objects keyed by column name.
pub fn to_json_rows(table: &Table) -> Json {
    let names = header(table);
    let rows = table
        .rows()
        .iter()
        .map(|row| {
            let key_values = row.key.values();
            let cells = key_values
                .iter()
                .map(json_cell)
                .chain(row.values.iter().map(|v| v.as_ref().map(json_cell).unwrap_or(Json::Null)));
            let object: Map<String, Json> = names.iter().cloned().zip(cells).collect();
            Json::Object(object)
        })
        .collect();
    Json::Array(rows)
}

/// Write the table as a JSON array of row objects.
pub fn write_json<W: Write>(table: &Table, writer: W) -> ExportResult<()> {
    serde_json::to_writer_pretty(writer, &to_json_rows(table))?;
    Ok(())
}

pub fn write_json_file<P: AsRef<Path>>(table: &Table, path: P) -> ExportResult<()> {
    let path = path.as_ref();
    write_json(table, create_file(path)?)?;
    info!(rows = table.len(), path = %path.display(), "Wrote cohort table JSON");
    Ok(())
}
