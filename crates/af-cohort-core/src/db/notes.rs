//! Note store operations.

use rusqlite::{params, OptionalExtension};
use std::io::Read;
use tracing::info;

use super::{Database, DbResult};
use crate::models::{CohortDocument, NoteRecord};

impl Database {
    /// Insert or replace a note.
    pub fn upsert_note(&self, note: &NoteRecord) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO notes (note_key, patient_mrn, encounter_date, note_text)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(note_key) DO UPDATE SET
                patient_mrn = excluded.patient_mrn,
                encounter_date = excluded.encounter_date,
                note_text = excluded.note_text,
                imported_at = datetime('now')
            "#,
            params![
                note.note_key,
                note.patient_mrn,
                note.encounter_date,
                note.note_text,
            ],
        )?;
        Ok(())
    }

    /// Import notes from CSV with header
    /// `patientprimarymrn, clinicalnotekey, encounterdate, notetext`.
    ///
    /// All rows are written in one transaction; a bad row aborts the import.
    pub fn import_notes_csv<R: Read>(&mut self, reader: R) -> DbResult<usize> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::Headers)
            .from_reader(reader);

        let tx = self.conn.transaction()?;
        let mut imported = 0;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO notes (note_key, patient_mrn, encounter_date, note_text)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(note_key) DO UPDATE SET
                    patient_mrn = excluded.patient_mrn,
                    encounter_date = excluded.encounter_date,
                    note_text = excluded.note_text,
                    imported_at = datetime('now')
                "#,
            )?;
            for record in csv_reader.deserialize::<NoteRecord>() {
                let note = record?;
                let encounter_date = note
                    .encounter_date
                    .as_deref()
                    .map(str::trim)
                    .filter(|d| !d.is_empty());
                stmt.execute(params![
                    note.note_key.trim(),
                    note.patient_mrn.trim(),
                    encounter_date,
                    note.note_text,
                ])?;
                imported += 1;
            }
        }
        tx.commit()?;

        info!("Imported {} notes", imported);
        Ok(imported)
    }

    /// Get a note by key.
    pub fn get_note(&self, note_key: &str) -> DbResult<Option<NoteRecord>> {
        let note = self
            .conn
            .query_row(
                r#"
                SELECT patient_mrn, note_key, encounter_date, note_text
                FROM notes
                WHERE note_key = ?
                "#,
                [note_key],
                |row| {
                    Ok(NoteRecord {
                        patient_mrn: row.get(0)?,
                        note_key: row.get(1)?,
                        encounter_date: row.get(2)?,
                        note_text: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(note)
    }

    /// Full-text search over note text (BM25 ranking), prefix-matching every
    /// word of `term`. `limit` of `None` returns every match.
    pub fn search_notes(&self, term: &str, limit: Option<usize>) -> DbResult<Vec<CohortDocument>> {
        let query = escape_fts_query(term);
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let limit = limit.map(|l| l as i64).unwrap_or(-1);

        let mut stmt = self.conn.prepare(
            r#"
            SELECT n.patient_mrn, n.note_key, n.encounter_date, n.note_text,
                   bm25(notes_fts) as rank
            FROM notes n
            JOIN notes_fts fts ON n.rowid = fts.rowid
            WHERE notes_fts MATCH ?
            ORDER BY rank
            LIMIT ?
            "#,
        )?;

        let rows = stmt.query_map(params![query, limit], |row| {
            Ok(NoteRecord {
                patient_mrn: row.get(0)?,
                note_key: row.get(1)?,
                encounter_date: row.get(2)?,
                note_text: row.get(3)?,
            })
        })?;

        let mut documents = Vec::new();
        for row in rows {
            documents.push(CohortDocument::from(row?));
        }
        Ok(documents)
    }

    /// Number of stored notes.
    pub fn count_notes(&self) -> DbResult<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM notes", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

/// Turn every word into a quoted prefix match so FTS5 keywords such as
/// `OR` and `NOT` are searched as plain words.
fn escape_fts_query(query: &str) -> String {
    let cleaned: String = query
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();

    cleaned
        .split_whitespace()
        .map(|word| format!("\"{}\"*", word))
        .collect::<Vec<_>>()
        .join(" ")
}
