//! Annotator database schema.
//!
//! Versioned via the `schema_version` table. The FTS index over
//! `(term, definition)` is a contentless-delete FTS5 content table kept
//! coherent with `glossary_entry` by triggers, so no caller ever writes
//! it directly.

use chrono::Utc;
use rusqlite::Connection;

use crate::db::Result;

pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS glossary_entry (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            term TEXT NOT NULL,
            term_normalized TEXT NOT NULL UNIQUE,
            definition TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'tentative'
                CHECK (status IN ('tentative', 'confirmed')),
            first_seen_post_id INTEGER NOT NULL,
            first_seen_thread_id INTEGER NOT NULL,
            last_updated_post_id INTEGER NOT NULL,
            last_updated_thread_id INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS glossary_tag (
            entry_id INTEGER NOT NULL
                REFERENCES glossary_entry(id) ON DELETE CASCADE,
            tag TEXT NOT NULL,
            PRIMARY KEY (entry_id, tag)
        );

        CREATE VIRTUAL TABLE IF NOT EXISTS glossary_fts USING fts5(
            term,
            definition,
            content='glossary_entry',
            content_rowid='id'
        );

        CREATE TRIGGER IF NOT EXISTS glossary_fts_ai
        AFTER INSERT ON glossary_entry BEGIN
            INSERT INTO glossary_fts (rowid, term, definition)
            VALUES (new.id, new.term, new.definition);
        END;

        CREATE TRIGGER IF NOT EXISTS glossary_fts_ad
        AFTER DELETE ON glossary_entry BEGIN
            INSERT INTO glossary_fts (glossary_fts, rowid, term, definition)
            VALUES ('delete', old.id, old.term, old.definition);
        END;

        CREATE TRIGGER IF NOT EXISTS glossary_fts_au
        AFTER UPDATE ON glossary_entry BEGIN
            INSERT INTO glossary_fts (glossary_fts, rowid, term, definition)
            VALUES ('delete', old.id, old.term, old.definition);
            INSERT INTO glossary_fts (rowid, term, definition)
            VALUES (new.id, new.term, new.definition);
        END;

        CREATE TABLE IF NOT EXISTS snapshot (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL
                CHECK (kind IN ('checkpoint', 'curator_fork', 'manual')),
            last_post_id INTEGER NOT NULL,
            last_thread_id INTEGER NOT NULL,
            thread_position INTEGER NOT NULL,
            entry_count INTEGER NOT NULL,
            token_count INTEGER NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS snapshot_context (
            snapshot_id INTEGER PRIMARY KEY
                REFERENCES snapshot(id) ON DELETE CASCADE,
            context_json TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS snapshot_entry (
            snapshot_id INTEGER NOT NULL
                REFERENCES snapshot(id) ON DELETE CASCADE,
            entry_id INTEGER NOT NULL
                REFERENCES glossary_entry(id) ON DELETE CASCADE,
            definition TEXT NOT NULL,
            definition_digest TEXT NOT NULL,
            status TEXT NOT NULL,
            PRIMARY KEY (snapshot_id, entry_id)
        );

        CREATE TABLE IF NOT EXISTS revision (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entry_id INTEGER
                REFERENCES glossary_entry(id) ON DELETE SET NULL,
            snapshot_id INTEGER
                REFERENCES snapshot(id) ON DELETE SET NULL,
            field TEXT NOT NULL
                CHECK (field IN ('term', 'definition', 'status', 'tags',
                                 'curator_decision')),
            old_value TEXT,
            new_value TEXT NOT NULL,
            post_id INTEGER NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS run_state (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            last_post_id INTEGER NOT NULL,
            last_thread_id INTEGER NOT NULL,
            current_snapshot_id INTEGER,
            started_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            posts_processed INTEGER NOT NULL DEFAULT 0,
            scenes_processed INTEGER NOT NULL DEFAULT 0,
            entries_created INTEGER NOT NULL DEFAULT 0,
            entries_updated INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS thread_state (
            thread_id INTEGER PRIMARY KEY,
            scenes_emitted INTEGER NOT NULL DEFAULT 0,
            completed INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_revision_entry ON revision(entry_id);
        CREATE INDEX IF NOT EXISTS idx_revision_snapshot ON revision(snapshot_id);
        CREATE INDEX IF NOT EXISTS idx_snapshot_kind ON snapshot(kind, id);
        CREATE INDEX IF NOT EXISTS idx_snapshot_thread ON snapshot(last_thread_id);
        CREATE INDEX IF NOT EXISTS idx_entry_thread
            ON glossary_entry(first_seen_thread_id, status);
        "#,
    )?;

    let existing: Option<i32> = conn
        .query_row(
            "SELECT MAX(version) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(None);
    if existing != Some(SCHEMA_VERSION) {
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?1, ?2)",
            rusqlite::params![SCHEMA_VERSION, Utc::now().to_rfc3339()],
        )?;
    }

    Ok(())
}
