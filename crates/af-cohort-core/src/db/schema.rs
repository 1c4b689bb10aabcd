//! SQLite schema definition.

/// Note store schema.
pub const SCHEMA: &str = r#"
-- ============================================================================
-- Clinical Notes
-- ============================================================================

CREATE TABLE IF NOT EXISTS notes (
    note_key TEXT PRIMARY KEY,                   -- clinicalnotekey
    patient_mrn TEXT NOT NULL,                   -- patientprimarymrn
    encounter_date TEXT,                         -- as exported; parsed by the cohort builder
    note_text TEXT NOT NULL,
    imported_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_notes_patient ON notes(patient_mrn);

-- FTS5 virtual table over note text
CREATE VIRTUAL TABLE IF NOT EXISTS notes_fts USING fts5(
    note_text,
    content='notes',
    content_rowid='rowid'
);

-- Triggers to keep FTS5 in sync with main table
CREATE TRIGGER IF NOT EXISTS notes_ai AFTER INSERT ON notes BEGIN
    INSERT INTO notes_fts(rowid, note_text) VALUES (new.rowid, new.note_text);
END;

CREATE TRIGGER IF NOT EXISTS notes_ad AFTER DELETE ON notes BEGIN
    INSERT INTO notes_fts(notes_fts, rowid, note_text)
    VALUES ('delete', old.rowid, old.note_text);
END;

CREATE TRIGGER IF NOT EXISTS notes_au AFTER UPDATE ON notes BEGIN
    INSERT INTO notes_fts(notes_fts, rowid, note_text)
    VALUES ('delete', old.rowid, old.note_text);
    INSERT INTO notes_fts(rowid, note_text) VALUES (new.rowid, new.note_text);
END;
"#;
