//! Glossary CRUD, full-text search, and the revision log.
//!
//! Every mutation runs in one transaction with its revision rows, so a
//! reader can never observe an entry whose history is missing.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Transaction};

use qc_domain::glossary::{
    normalize_term, EntryPatch, EntryStatus, GlossaryEntry, Revision, RevisionField,
};

use crate::db::{AnnotatorDb, Result, StoreError};

/// Status constraint for a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusFilter {
    #[default]
    All,
    Tentative,
    Confirmed,
}

impl StatusFilter {
    fn admits(&self, status: EntryStatus) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Tentative => status == EntryStatus::Tentative,
            StatusFilter::Confirmed => status == EntryStatus::Confirmed,
        }
    }
}

/// Search constraints: conjunctive tag filter + status + result cap.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub tags: Vec<String>,
    pub status: StatusFilter,
    pub limit: usize,
}

impl AnnotatorDb {
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Reads
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub fn get_entry(&self, id: i64) -> Result<GlossaryEntry> {
        let entry = self
            .conn
            .prepare_cached(&format!("{ENTRY_SELECT} WHERE id = ?1"))?
            .query_row(params![id], row_to_entry)
            .optional()?
            .ok_or(StoreError::NotFound(id))?;
        Ok(self.with_tags(entry)?)
    }

    pub fn get_entry_by_normalized(&self, normalized: &str) -> Result<Option<GlossaryEntry>> {
        let entry = self
            .conn
            .prepare_cached(&format!("{ENTRY_SELECT} WHERE term_normalized = ?1"))?
            .query_row(params![normalized], row_to_entry)
            .optional()?;
        match entry {
            Some(e) => Ok(Some(self.with_tags(e)?)),
            None => Ok(None),
        }
    }

    /// Ranked search over `(term, definition)`.
    ///
    /// An exact normalized-term match always ranks first (rank 0,
    /// tie-break id ascending); the remainder is bm25 order. The tag
    /// filter is conjunctive; `limit` caps the result.
    pub fn search_entries(&self, query: &str, filter: &SearchFilter) -> Result<Vec<GlossaryEntry>> {
        let limit = if filter.limit == 0 { 10 } else { filter.limit };
        let mut ids: Vec<i64> = Vec::new();

        let normalized = normalize_term(query);
        if !normalized.is_empty() {
            let mut stmt = self.conn.prepare_cached(
                "SELECT id FROM glossary_entry WHERE term_normalized = ?1 ORDER BY id ASC",
            )?;
            let exact = stmt
                .query_map(params![normalized], |row| row.get::<_, i64>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            ids.extend(exact);
        }

        if let Some(match_expr) = fts_match_expr(query) {
            let mut stmt = self.conn.prepare_cached(
                "SELECT e.id
                 FROM glossary_fts
                 JOIN glossary_entry e ON e.id = glossary_fts.rowid
                 WHERE glossary_fts MATCH ?1
                 ORDER BY bm25(glossary_fts), e.id ASC
                 LIMIT ?2",
            )?;
            // Over-fetch: post-filters (tags, status) may discard rows.
            let fts = stmt
                .query_map(params![match_expr, (limit * 5) as i64], |row| {
                    row.get::<_, i64>(0)
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            for id in fts {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }

        let mut out = Vec::new();
        for id in ids {
            let entry = self.get_entry(id)?;
            if !filter.status.admits(entry.status) {
                continue;
            }
            if !filter.tags.iter().all(|t| entry.tags.contains(t)) {
                continue;
            }
            out.push(entry);
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }

    /// Every entry, ordered by id (exporters, inspection).
    pub fn all_entries(&self) -> Result<Vec<GlossaryEntry>> {
        let mut stmt = self
            .conn
            .prepare_cached(&format!("{ENTRY_SELECT} ORDER BY id ASC"))?;
        let entries = stmt
            .query_map([], row_to_entry)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        entries.into_iter().map(|e| self.with_tags(e)).collect()
    }

    pub fn count_entries(&self) -> Result<u32> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM glossary_entry", [], |row| {
                row.get::<_, i64>(0)
            })? as u32)
    }

    /// Tentative entries first seen in the given thread, for the curator.
    pub fn tentative_in_thread(&self, thread_id: i64) -> Result<Vec<GlossaryEntry>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "{ENTRY_SELECT} WHERE first_seen_thread_id = ?1 AND status = 'tentative'
             ORDER BY id ASC"
        ))?;
        let entries = stmt
            .query_map(params![thread_id], row_to_entry)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        entries.into_iter().map(|e| self.with_tags(e)).collect()
    }

    pub fn revisions_for_entry(&self, entry_id: i64) -> Result<Vec<Revision>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, entry_id, snapshot_id, field, old_value, new_value, post_id, created_at
             FROM revision WHERE entry_id = ?1 ORDER BY id ASC",
        )?;
        let revisions = stmt
            .query_map(params![entry_id], row_to_revision)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        revisions.into_iter().collect()
    }

    /// Revisions whose entry has been deleted (entry reference nulled).
    pub fn orphaned_revisions(&self) -> Result<Vec<Revision>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, entry_id, snapshot_id, field, old_value, new_value, post_id, created_at
             FROM revision WHERE entry_id IS NULL ORDER BY id ASC",
        )?;
        let revisions = stmt
            .query_map([], row_to_revision)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        revisions.into_iter().collect()
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Writes
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Insert a new entry. `first_seen` and `last_updated` both point at
    /// the supplied provenance; a revision row is written per field.
    pub fn create_entry(
        &mut self,
        term: &str,
        definition: &str,
        tags: &[String],
        post_id: i64,
        thread_id: i64,
        status: EntryStatus,
    ) -> Result<i64> {
        let normalized = normalize_term(term);
        if normalized.is_empty() {
            return Err(StoreError::Corrupt("empty term".into()));
        }
        let now = Utc::now().to_rfc3339();

        let tx = self.conn.transaction()?;
        let exists: Option<i64> = tx
            .query_row(
                "SELECT id FROM glossary_entry WHERE term_normalized = ?1",
                params![normalized],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(StoreError::DuplicateTerm { normalized });
        }

        tx.execute(
            "INSERT INTO glossary_entry
               (term, term_normalized, definition, status,
                first_seen_post_id, first_seen_thread_id,
                last_updated_post_id, last_updated_thread_id,
                created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?5, ?6, ?7, ?7)",
            params![
                term,
                normalized,
                definition,
                status.as_str(),
                post_id,
                thread_id,
                now
            ],
        )?;
        let id = tx.last_insert_rowid();

        let mut sorted_tags = tags.to_vec();
        sorted_tags.sort();
        sorted_tags.dedup();
        for tag in &sorted_tags {
            tx.execute(
                "INSERT INTO glossary_tag (entry_id, tag) VALUES (?1, ?2)",
                params![id, tag],
            )?;
        }

        insert_revision(&tx, Some(id), None, RevisionField::Term, None, term, post_id)?;
        insert_revision(
            &tx,
            Some(id),
            None,
            RevisionField::Definition,
            None,
            definition,
            post_id,
        )?;
        insert_revision(
            &tx,
            Some(id),
            None,
            RevisionField::Status,
            None,
            status.as_str(),
            post_id,
        )?;
        insert_revision(
            &tx,
            Some(id),
            None,
            RevisionField::Tags,
            None,
            &tags_json(&sorted_tags),
            post_id,
        )?;

        tx.commit()?;
        tracing::debug!(entry_id = id, term, "glossary entry created");
        Ok(id)
    }

    /// Apply a partial update. Returns `false` (without writing) when the
    /// entry does not exist. A revision row is emitted per changed field;
    /// renames re-check normalized-term uniqueness.
    pub fn update_entry(
        &mut self,
        id: i64,
        patch: &EntryPatch,
        post_id: i64,
        thread_id: i64,
    ) -> Result<bool> {
        let existing = match self.get_entry(id) {
            Ok(e) => e,
            Err(StoreError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        let now = Utc::now().to_rfc3339();

        let tx = self.conn.transaction()?;
        let mut changed = false;

        if let Some(term) = &patch.term {
            if *term != existing.term {
                let normalized = normalize_term(term);
                let conflict: Option<i64> = tx
                    .query_row(
                        "SELECT id FROM glossary_entry
                         WHERE term_normalized = ?1 AND id != ?2",
                        params![normalized, id],
                        |row| row.get(0),
                    )
                    .optional()?;
                if conflict.is_some() {
                    return Err(StoreError::DuplicateTerm { normalized });
                }
                tx.execute(
                    "UPDATE glossary_entry SET term = ?1, term_normalized = ?2 WHERE id = ?3",
                    params![term, normalized, id],
                )?;
                insert_revision(
                    &tx,
                    Some(id),
                    None,
                    RevisionField::Term,
                    Some(&existing.term),
                    term,
                    post_id,
                )?;
                changed = true;
            }
        }

        if let Some(definition) = &patch.definition {
            if *definition != existing.definition {
                tx.execute(
                    "UPDATE glossary_entry SET definition = ?1 WHERE id = ?2",
                    params![definition, id],
                )?;
                insert_revision(
                    &tx,
                    Some(id),
                    None,
                    RevisionField::Definition,
                    Some(&existing.definition),
                    definition,
                    post_id,
                )?;
                changed = true;
            }
        }

        if let Some(status) = patch.status {
            if status != existing.status {
                tx.execute(
                    "UPDATE glossary_entry SET status = ?1 WHERE id = ?2",
                    params![status.as_str(), id],
                )?;
                insert_revision(
                    &tx,
                    Some(id),
                    None,
                    RevisionField::Status,
                    Some(existing.status.as_str()),
                    status.as_str(),
                    post_id,
                )?;
                changed = true;
            }
        }

        if let Some(tags) = &patch.tags {
            let mut new_tags = tags.clone();
            new_tags.sort();
            new_tags.dedup();
            if new_tags != existing.tags {
                tx.execute("DELETE FROM glossary_tag WHERE entry_id = ?1", params![id])?;
                for tag in &new_tags {
                    tx.execute(
                        "INSERT INTO glossary_tag (entry_id, tag) VALUES (?1, ?2)",
                        params![id, tag],
                    )?;
                }
                insert_revision(
                    &tx,
                    Some(id),
                    None,
                    RevisionField::Tags,
                    Some(&tags_json(&existing.tags)),
                    &tags_json(&new_tags),
                    post_id,
                )?;
                changed = true;
            }
        }

        if changed {
            tx.execute(
                "UPDATE glossary_entry
                 SET last_updated_post_id = ?1, last_updated_thread_id = ?2, updated_at = ?3
                 WHERE id = ?4",
                params![post_id, thread_id, now, id],
            )?;
        }
        tx.commit()?;
        Ok(true)
    }

    /// Remove an entry, logging a `curator_decision` revision first so
    /// the deletion survives in the audit trail (its entry reference is
    /// nulled by the cascade). Idempotent.
    pub fn delete_entry(&mut self, id: i64, reason: &str, post_id: i64) -> Result<bool> {
        let existing = match self.get_entry(id) {
            Ok(e) => e,
            Err(StoreError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };

        let tx = self.conn.transaction()?;
        insert_revision(
            &tx,
            Some(id),
            None,
            RevisionField::CuratorDecision,
            Some(&existing.term),
            reason,
            post_id,
        )?;
        tx.execute("DELETE FROM glossary_entry WHERE id = ?1", params![id])?;
        tx.commit()?;
        tracing::debug!(entry_id = id, term = %existing.term, "glossary entry deleted");
        Ok(true)
    }

    /// Log a standalone `curator_decision` revision (CONFIRM/REVISE notes,
    /// skipped merges, summon dismissal summaries).
    pub fn log_decision(
        &mut self,
        entry_id: Option<i64>,
        snapshot_id: Option<i64>,
        note: &str,
        post_id: i64,
    ) -> Result<i64> {
        let tx = self.conn.transaction()?;
        insert_revision(
            &tx,
            entry_id,
            snapshot_id,
            RevisionField::CuratorDecision,
            None,
            note,
            post_id,
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(id)
    }

    // ── internal ──────────────────────────────────────────────────

    fn with_tags(&self, mut entry: GlossaryEntry) -> Result<GlossaryEntry> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT tag FROM glossary_tag WHERE entry_id = ?1 ORDER BY tag")?;
        entry.tags = stmt
            .query_map(params![entry.id], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entry)
    }
}

const ENTRY_SELECT: &str = "SELECT id, term, term_normalized, definition, status,
        first_seen_post_id, first_seen_thread_id,
        last_updated_post_id, last_updated_thread_id,
        created_at, updated_at
 FROM glossary_entry";

pub(crate) fn insert_revision(
    tx: &Transaction<'_>,
    entry_id: Option<i64>,
    snapshot_id: Option<i64>,
    field: RevisionField,
    old_value: Option<&str>,
    new_value: &str,
    post_id: i64,
) -> Result<()> {
    tx.execute(
        "INSERT INTO revision
           (entry_id, snapshot_id, field, old_value, new_value, post_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            entry_id,
            snapshot_id,
            field.as_str(),
            old_value,
            new_value,
            post_id,
            Utc::now().to_rfc3339()
        ],
    )?;
    Ok(())
}

fn tags_json(tags: &[String]) -> String {
    serde_json::to_string(tags).unwrap_or_else(|_| "[]".into())
}

/// Build an FTS5 MATCH expression from free text: each token quoted
/// (so punctuation cannot become FTS syntax) and OR-joined for recall.
fn fts_match_expr(query: &str) -> Option<String> {
    let tokens: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t.replace('"', "")))
        .collect();
    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" OR "))
    }
}

pub(crate) fn parse_timestamp(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<GlossaryEntry> {
    let status_raw: String = row.get(4)?;
    let created_raw: String = row.get(9)?;
    let updated_raw: String = row.get(10)?;
    Ok(GlossaryEntry {
        id: row.get(0)?,
        term: row.get(1)?,
        term_normalized: row.get(2)?,
        definition: row.get(3)?,
        status: EntryStatus::parse(&status_raw).unwrap_or(EntryStatus::Tentative),
        tags: Vec::new(),
        first_seen_post_id: row.get(5)?,
        first_seen_thread_id: row.get(6)?,
        last_updated_post_id: row.get(7)?,
        last_updated_thread_id: row.get(8)?,
        created_at: parse_timestamp(&created_raw)?,
        updated_at: parse_timestamp(&updated_raw)?,
    })
}

fn row_to_revision(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<Revision>> {
    let field_raw: String = row.get(3)?;
    let created_raw: String = row.get(7)?;
    let field = match RevisionField::parse(&field_raw) {
        Some(f) => f,
        None => {
            return Ok(Err(StoreError::Corrupt(format!(
                "unknown revision field '{field_raw}'"
            ))))
        }
    };
    Ok(Ok(Revision {
        id: row.get(0)?,
        entry_id: row.get(1)?,
        snapshot_id: row.get(2)?,
        field,
        old_value: row.get(4)?,
        new_value: row.get(5)?,
        post_id: row.get(6)?,
        created_at: parse_timestamp(&created_raw)?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> AnnotatorDb {
        AnnotatorDb::open_in_memory().unwrap()
    }

    fn create_soma(db: &mut AnnotatorDb) -> i64 {
        db.create_entry(
            "Soma",
            "Questmaster NPC",
            &["character".into()],
            100,
            1,
            EntryStatus::Tentative,
        )
        .unwrap()
    }

    #[test]
    fn create_stamps_provenance_and_revisions() {
        let mut db = db();
        let id = create_soma(&mut db);
        let entry = db.get_entry(id).unwrap();
        assert_eq!(entry.term_normalized, "soma");
        assert_eq!(entry.first_seen_post_id, 100);
        assert_eq!(entry.first_seen_thread_id, 1);
        assert_eq!(entry.last_updated_post_id, 100);
        assert_eq!(entry.status, EntryStatus::Tentative);
        assert_eq!(entry.tags, vec!["character".to_string()]);

        // One revision per field.
        let revisions = db.revisions_for_entry(id).unwrap();
        assert_eq!(revisions.len(), 4);
        assert!(revisions.iter().all(|r| r.old_value.is_none()));
        assert!(revisions.iter().all(|r| r.post_id == 100));
    }

    #[test]
    fn duplicate_normalized_term_is_rejected() {
        let mut db = db();
        create_soma(&mut db);
        let err = db
            .create_entry("soma (deity)", "other", &[], 200, 2, EntryStatus::Tentative)
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateTerm { .. }));
        assert_eq!(db.count_entries().unwrap(), 1);
    }

    #[test]
    fn update_emits_revisions_only_for_changed_fields() {
        let mut db = db();
        let id = create_soma(&mut db);
        let patch = EntryPatch {
            definition: Some("Questmaster NPC, guide of the party".into()),
            status: Some(EntryStatus::Tentative), // unchanged
            ..Default::default()
        };
        assert!(db.update_entry(id, &patch, 105, 1).unwrap());

        let entry = db.get_entry(id).unwrap();
        assert_eq!(entry.last_updated_post_id, 105);
        assert!(entry.last_updated_post_id >= entry.first_seen_post_id);
        assert!(entry.updated_at >= entry.created_at);

        let revisions = db.revisions_for_entry(id).unwrap();
        // 4 from create + 1 definition change; no status revision.
        assert_eq!(revisions.len(), 5);
        let last = revisions.last().unwrap();
        assert_eq!(last.field, RevisionField::Definition);
        assert_eq!(last.old_value.as_deref(), Some("Questmaster NPC"));
    }

    #[test]
    fn rename_rechecks_uniqueness() {
        let mut db = db();
        create_soma(&mut db);
        let other = db
            .create_entry("Vatis", "a place", &[], 110, 1, EntryStatus::Tentative)
            .unwrap();
        let patch = EntryPatch {
            term: Some("Soma (city)".into()),
            ..Default::default()
        };
        let err = db.update_entry(other, &patch, 120, 1).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateTerm { .. }));
    }

    #[test]
    fn update_missing_entry_reports_absent() {
        let mut db = db();
        let patch = EntryPatch {
            definition: Some("x".into()),
            ..Default::default()
        };
        assert!(!db.update_entry(99, &patch, 1, 1).unwrap());
    }

    #[test]
    fn delete_preserves_revisions_with_null_entry() {
        let mut db = db();
        let id = create_soma(&mut db);
        assert!(db.delete_entry(id, "hallucinated term", 130).unwrap());
        assert!(matches!(db.get_entry(id), Err(StoreError::NotFound(_))));

        // Entry's revisions survive, entry reference nulled.
        let orphaned = db.orphaned_revisions().unwrap();
        assert_eq!(orphaned.len(), 5);
        let decision = orphaned
            .iter()
            .find(|r| r.field == RevisionField::CuratorDecision)
            .unwrap();
        assert_eq!(decision.new_value, "hallucinated term");
        assert_eq!(decision.old_value.as_deref(), Some("Soma"));

        // Tags cascaded away.
        let tag_count: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM glossary_tag", [], |row| row.get(0))
            .unwrap();
        assert_eq!(tag_count, 0);

        // Idempotent.
        assert!(!db.delete_entry(id, "again", 131).unwrap());
    }

    #[test]
    fn search_promotes_exact_normalized_match() {
        let mut db = db();
        db.create_entry(
            "Soma shrine",
            "A shrine dedicated to Soma",
            &[],
            90,
            1,
            EntryStatus::Tentative,
        )
        .unwrap();
        let soma = create_soma(&mut db);

        let hits = db
            .search_entries("Soma", &SearchFilter::default())
            .unwrap();
        assert!(hits.len() >= 2);
        // Exact match outranks the bm25 hit despite the larger id.
        assert_eq!(hits[0].id, soma);
    }

    #[test]
    fn search_matches_definition_text() {
        let mut db = db();
        create_soma(&mut db);
        let hits = db
            .search_entries("questmaster", &SearchFilter::default())
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn search_filters_are_conjunctive() {
        let mut db = db();
        let id = create_soma(&mut db);
        db.update_entry(
            id,
            &EntryPatch {
                tags: Some(vec!["character".into(), "npc".into()]),
                ..Default::default()
            },
            101,
            1,
        )
        .unwrap();
        db.create_entry(
            "Vatis",
            "Soma's rival",
            &["character".into()],
            102,
            1,
            EntryStatus::Confirmed,
        )
        .unwrap();

        let filter = SearchFilter {
            tags: vec!["character".into(), "npc".into()],
            status: StatusFilter::All,
            limit: 10,
        };
        let hits = db.search_entries("soma", &filter).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, id);

        let filter = SearchFilter {
            tags: vec![],
            status: StatusFilter::Confirmed,
            limit: 10,
        };
        let hits = db.search_entries("soma", &filter).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].term, "Vatis");
    }

    #[test]
    fn fts_query_is_sanitized() {
        let db = db();
        // Must not panic or error on FTS syntax characters.
        let hits = db
            .search_entries("soma\" OR *", &SearchFilter::default())
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn fts_index_follows_updates() {
        let mut db = db();
        let id = create_soma(&mut db);
        db.update_entry(
            id,
            &EntryPatch {
                definition: Some("The grand arbiter of the terrarium".into()),
                ..Default::default()
            },
            140,
            1,
        )
        .unwrap();
        assert!(db
            .search_entries("questmaster", &SearchFilter::default())
            .unwrap()
            .is_empty());
        assert_eq!(
            db.search_entries("arbiter", &SearchFilter::default())
                .unwrap()
                .len(),
            1
        );
    }
}
