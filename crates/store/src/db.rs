//! Connection wrapper for the annotator database.

use std::path::Path;

use rusqlite::Connection;

use crate::schema;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("store: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store json: {0}")]
    Json(#[from] serde_json::Error),

    /// The normalized form of the term already names another entry.
    #[error("duplicate term: {normalized}")]
    DuplicateTerm { normalized: String },

    #[error("entry {0} not found")]
    NotFound(i64),

    #[error("snapshot {0} not found")]
    SnapshotNotFound(i64),

    #[error("store corrupt: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// The single writing handle on `annotator.db`.
///
/// Foreign keys are enforced and the FTS triggers are active on every
/// connection; WAL keeps additional read-only connections cheap.
pub struct AnnotatorDb {
    pub(crate) conn: Connection,
}

impl AnnotatorDb {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::init_schema(&conn)?;
        tracing::debug!(path = %path.display(), "annotator store opened");
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::init_schema(&conn)?;
        Ok(Self { conn })
    }
}
