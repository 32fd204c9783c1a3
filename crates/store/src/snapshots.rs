//! Snapshot persistence: point-in-time captures of the annotation
//! context plus per-entry definition state for blame tracking.
//!
//! The `checkpoint` operation writes the snapshot AND the run-state
//! advance in one transaction; a crash between scenes therefore never
//! leaves the cursor ahead of its snapshot.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Transaction};
use sha2::{Digest, Sha256};

use qc_domain::glossary::EntryStatus;
use qc_domain::snapshot::{RunState, SnapshotEntryState, SnapshotKind, SnapshotMeta};

use crate::db::{AnnotatorDb, Result, StoreError};
use crate::glossary::parse_timestamp;
use crate::run_state;

/// Everything a checkpoint records besides the snapshot itself.
#[derive(Debug, Clone)]
pub struct CheckpointArgs {
    pub kind: SnapshotKind,
    pub last_post_id: i64,
    pub last_thread_id: i64,
    pub thread_position: u32,
    pub token_count: u32,
    /// Serialized `AnnotationContext` (JSON document).
    pub context_json: String,
}

impl AnnotatorDb {
    /// Write a snapshot on its own (curator forks, manual snapshots).
    pub fn save_snapshot(
        &mut self,
        args: &CheckpointArgs,
        entry_states: &[SnapshotEntryState],
    ) -> Result<i64> {
        let tx = self.conn.transaction()?;
        let id = write_snapshot(&tx, args, entry_states)?;
        tx.commit()?;
        Ok(id)
    }

    /// Write a snapshot and advance the run-state cursor atomically.
    /// Returns the new snapshot id.
    pub fn checkpoint(
        &mut self,
        args: &CheckpointArgs,
        entry_states: &[SnapshotEntryState],
        state: &RunState,
    ) -> Result<i64> {
        let tx = self.conn.transaction()?;
        let id = write_snapshot(&tx, args, entry_states)?;
        let mut state = state.clone();
        state.current_snapshot_id = Some(id);
        run_state::write_run_state(&tx, &state)?;
        tx.commit()?;
        tracing::info!(
            snapshot_id = id,
            kind = args.kind.as_str(),
            last_post_id = args.last_post_id,
            "checkpoint written"
        );
        Ok(id)
    }

    pub fn load_snapshot(&self, id: i64) -> Result<(SnapshotMeta, String)> {
        let meta = self
            .conn
            .prepare_cached(&format!("{SNAPSHOT_SELECT} WHERE id = ?1"))?
            .query_row(params![id], row_to_meta)
            .optional()?
            .ok_or(StoreError::SnapshotNotFound(id))?;
        let context_json: String = self
            .conn
            .query_row(
                "SELECT context_json FROM snapshot_context WHERE snapshot_id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::Corrupt(format!("snapshot {id} has no context")))?;
        Ok((meta, context_json))
    }

    /// Metadata-only listing, newest first.
    pub fn list_snapshots(
        &self,
        thread_id: Option<i64>,
        kind: Option<SnapshotKind>,
        limit: usize,
    ) -> Result<Vec<SnapshotMeta>> {
        let mut sql = SNAPSHOT_SELECT.to_string();
        let mut clauses: Vec<String> = Vec::new();
        if thread_id.is_some() {
            clauses.push("last_thread_id = :thread".into());
        }
        if kind.is_some() {
            clauses.push("kind = :kind".into());
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY id DESC LIMIT :limit");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut params_vec: Vec<(&str, &dyn rusqlite::ToSql)> = Vec::new();
        let thread_val;
        let kind_val;
        if let Some(t) = thread_id {
            thread_val = t;
            params_vec.push((":thread", &thread_val));
        }
        if let Some(k) = kind {
            kind_val = k.as_str();
            params_vec.push((":kind", &kind_val));
        }
        let limit_val = limit as i64;
        params_vec.push((":limit", &limit_val));

        let metas = stmt
            .query_map(params_vec.as_slice(), row_to_meta)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(metas)
    }

    /// Entry states captured by a snapshot (blame inspection).
    pub fn snapshot_entry_states(&self, snapshot_id: i64) -> Result<Vec<SnapshotEntryState>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT entry_id, definition, status FROM snapshot_entry
             WHERE snapshot_id = ?1 ORDER BY entry_id ASC",
        )?;
        let states = stmt
            .query_map(params![snapshot_id], |row| {
                let status_raw: String = row.get(2)?;
                Ok(SnapshotEntryState {
                    entry_id: row.get(0)?,
                    definition: row.get(1)?,
                    status: EntryStatus::parse(&status_raw).unwrap_or(EntryStatus::Tentative),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(states)
    }

    /// Blame: the earliest snapshot whose captured definition of any
    /// entry contains the fragment.
    pub fn blame_definition(&self, fragment: &str) -> Result<Option<(i64, i64)>> {
        let pattern = format!("%{}%", fragment.replace('%', "\\%").replace('_', "\\_"));
        Ok(self
            .conn
            .query_row(
                "SELECT snapshot_id, entry_id FROM snapshot_entry
                 WHERE definition LIKE ?1 ESCAPE '\\'
                 ORDER BY snapshot_id ASC LIMIT 1",
                params![pattern],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?)
    }

    /// Current per-entry (definition, status) pairs, ready to attach to
    /// a snapshot.
    pub fn current_entry_states(&self) -> Result<Vec<SnapshotEntryState>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, definition, status FROM glossary_entry ORDER BY id ASC",
        )?;
        let states = stmt
            .query_map([], |row| {
                let status_raw: String = row.get(2)?;
                Ok(SnapshotEntryState {
                    entry_id: row.get(0)?,
                    definition: row.get(1)?,
                    status: EntryStatus::parse(&status_raw).unwrap_or(EntryStatus::Tentative),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(states)
    }
}

fn write_snapshot(
    tx: &Transaction<'_>,
    args: &CheckpointArgs,
    entry_states: &[SnapshotEntryState],
) -> Result<i64> {
    tx.execute(
        "INSERT INTO snapshot
           (kind, last_post_id, last_thread_id, thread_position,
            entry_count, token_count, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            args.kind.as_str(),
            args.last_post_id,
            args.last_thread_id,
            args.thread_position,
            entry_states.len() as i64,
            args.token_count,
            Utc::now().to_rfc3339()
        ],
    )?;
    let id = tx.last_insert_rowid();

    tx.execute(
        "INSERT INTO snapshot_context (snapshot_id, context_json) VALUES (?1, ?2)",
        params![id, args.context_json],
    )?;

    for state in entry_states {
        let digest = format!("{:x}", Sha256::digest(state.definition.as_bytes()));
        tx.execute(
            "INSERT INTO snapshot_entry
               (snapshot_id, entry_id, definition, definition_digest, status)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, state.entry_id, state.definition, digest, state.status.as_str()],
        )?;
    }

    Ok(id)
}

const SNAPSHOT_SELECT: &str = "SELECT id, kind, last_post_id, last_thread_id, thread_position,
        entry_count, token_count, created_at
 FROM snapshot";

fn row_to_meta(row: &rusqlite::Row<'_>) -> rusqlite::Result<SnapshotMeta> {
    let kind_raw: String = row.get(1)?;
    let created_raw: String = row.get(7)?;
    Ok(SnapshotMeta {
        id: row.get(0)?,
        kind: SnapshotKind::parse(&kind_raw).unwrap_or(SnapshotKind::Manual),
        last_post_id: row.get(2)?,
        last_thread_id: row.get(3)?,
        thread_position: row.get::<_, i64>(4)? as u32,
        entry_count: row.get::<_, i64>(5)? as u32,
        token_count: row.get::<_, i64>(6)? as u32,
        created_at: parse_timestamp(&created_raw)?,
    })
}
