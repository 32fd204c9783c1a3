//! Run-state singleton and per-thread progress rows.

use rusqlite::{params, Connection, OptionalExtension};

use qc_domain::snapshot::{RunState, ThreadState};

use crate::db::{AnnotatorDb, Result};
use crate::glossary::parse_timestamp;

impl AnnotatorDb {
    pub fn read_run_state(&self) -> Result<Option<RunState>> {
        Ok(self
            .conn
            .query_row(
                "SELECT last_post_id, last_thread_id, current_snapshot_id,
                        started_at, updated_at, posts_processed, scenes_processed,
                        entries_created, entries_updated
                 FROM run_state WHERE id = 1",
                [],
                row_to_run_state,
            )
            .optional()?)
    }

    /// Upsert the singleton row (non-checkpoint advances between scenes).
    pub fn write_run_state(&mut self, state: &RunState) -> Result<()> {
        let tx = self.conn.transaction()?;
        write_run_state(&tx, state)?;
        tx.commit()?;
        Ok(())
    }

    /// Drop the cursor entirely (`run --no-resume`).
    pub fn clear_run_state(&mut self) -> Result<()> {
        self.conn.execute("DELETE FROM run_state WHERE id = 1", [])?;
        Ok(())
    }

    pub fn read_thread_state(&self, thread_id: i64) -> Result<Option<ThreadState>> {
        Ok(self
            .conn
            .query_row(
                "SELECT thread_id, scenes_emitted, completed
                 FROM thread_state WHERE thread_id = ?1",
                params![thread_id],
                |row| {
                    Ok(ThreadState {
                        thread_id: row.get(0)?,
                        scenes_emitted: row.get::<_, i64>(1)? as u32,
                        completed: row.get::<_, i64>(2)? != 0,
                    })
                },
            )
            .optional()?)
    }

    pub fn write_thread_state(&mut self, state: &ThreadState) -> Result<()> {
        self.conn.execute(
            "INSERT INTO thread_state (thread_id, scenes_emitted, completed)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(thread_id) DO UPDATE SET
                 scenes_emitted = ?2,
                 completed = ?3",
            params![
                state.thread_id,
                state.scenes_emitted as i64,
                state.completed as i64
            ],
        )?;
        Ok(())
    }
}

/// Shared by the standalone upsert and the checkpoint transaction.
pub(crate) fn write_run_state(conn: &Connection, state: &RunState) -> Result<()> {
    conn.execute(
        "INSERT INTO run_state
           (id, last_post_id, last_thread_id, current_snapshot_id,
            started_at, updated_at, posts_processed, scenes_processed,
            entries_created, entries_updated)
         VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(id) DO UPDATE SET
             last_post_id = ?1,
             last_thread_id = ?2,
             current_snapshot_id = ?3,
             updated_at = ?5,
             posts_processed = ?6,
             scenes_processed = ?7,
             entries_created = ?8,
             entries_updated = ?9",
        params![
            state.last_post_id,
            state.last_thread_id,
            state.current_snapshot_id,
            state.started_at.to_rfc3339(),
            state.updated_at.to_rfc3339(),
            state.posts_processed as i64,
            state.scenes_processed as i64,
            state.entries_created as i64,
            state.entries_updated as i64
        ],
    )?;
    Ok(())
}

fn row_to_run_state(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunState> {
    let started_raw: String = row.get(3)?;
    let updated_raw: String = row.get(4)?;
    Ok(RunState {
        last_post_id: row.get(0)?,
        last_thread_id: row.get(1)?,
        current_snapshot_id: row.get(2)?,
        started_at: parse_timestamp(&started_raw)?,
        updated_at: parse_timestamp(&updated_raw)?,
        posts_processed: row.get::<_, i64>(5)? as u64,
        scenes_processed: row.get::<_, i64>(6)? as u64,
        entries_created: row.get::<_, i64>(7)? as u64,
        entries_updated: row.get::<_, i64>(8)? as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn run_state_upsert_roundtrip() {
        let mut db = AnnotatorDb::open_in_memory().unwrap();
        assert!(db.read_run_state().unwrap().is_none());

        let mut state = RunState::new(Utc::now());
        state.last_post_id = 42;
        state.last_thread_id = 7;
        state.posts_processed = 3;
        db.write_run_state(&state).unwrap();

        state.last_post_id = 50;
        state.scenes_processed = 2;
        db.write_run_state(&state).unwrap();

        let loaded = db.read_run_state().unwrap().unwrap();
        assert_eq!(loaded.last_post_id, 50);
        assert_eq!(loaded.last_thread_id, 7);
        assert_eq!(loaded.posts_processed, 3);
        assert_eq!(loaded.scenes_processed, 2);
    }

    #[test]
    fn thread_state_tracks_progress() {
        let mut db = AnnotatorDb::open_in_memory().unwrap();
        db.write_thread_state(&ThreadState {
            thread_id: 7,
            scenes_emitted: 4,
            completed: false,
        })
        .unwrap();
        db.write_thread_state(&ThreadState {
            thread_id: 7,
            scenes_emitted: 5,
            completed: true,
        })
        .unwrap();

        let loaded = db.read_thread_state(7).unwrap().unwrap();
        assert_eq!(loaded.scenes_emitted, 5);
        assert!(loaded.completed);
        assert!(db.read_thread_state(8).unwrap().is_none());
    }

    #[test]
    fn clear_run_state_removes_cursor() {
        let mut db = AnnotatorDb::open_in_memory().unwrap();
        db.write_run_state(&RunState::new(Utc::now())).unwrap();
        db.clear_run_state().unwrap();
        assert!(db.read_run_state().unwrap().is_none());
    }
}
