//! The glossary ("codex") data model: entries, revisions, patches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Belief state of an entry. New entries start tentative and are
/// promoted (or removed) by the curator pass at thread close, or by a
/// human override in either direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Tentative,
    Confirmed,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Tentative => "tentative",
            EntryStatus::Confirmed => "confirmed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "tentative" => Some(EntryStatus::Tentative),
            "confirmed" => Some(EntryStatus::Confirmed),
            _ => None,
        }
    }
}

/// A single glossary entry.
///
/// `first_seen_*` never changes after creation; `last_updated_*` moves
/// forward with every write. `term_normalized` is the uniqueness key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlossaryEntry {
    pub id: i64,
    /// Display term; may carry a parenthesized disambiguation suffix,
    /// e.g. `"Soma (deity)"`.
    pub term: String,
    pub term_normalized: String,
    /// Markdown definition. `[[Term]]` cross-references are allowed and
    /// not validated at write time.
    pub definition: String,
    pub status: EntryStatus,
    pub tags: Vec<String>,
    pub first_seen_post_id: i64,
    pub first_seen_thread_id: i64,
    pub last_updated_post_id: i64,
    pub last_updated_thread_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update for an entry. Only fields present are touched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntryPatch {
    pub term: Option<String>,
    pub definition: Option<String>,
    pub status: Option<EntryStatus>,
    pub tags: Option<Vec<String>>,
}

impl EntryPatch {
    pub fn is_empty(&self) -> bool {
        self.term.is_none()
            && self.definition.is_none()
            && self.status.is_none()
            && self.tags.is_none()
    }
}

/// Which field a revision row records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevisionField {
    Term,
    Definition,
    Status,
    Tags,
    CuratorDecision,
}

impl RevisionField {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevisionField::Term => "term",
            RevisionField::Definition => "definition",
            RevisionField::Status => "status",
            RevisionField::Tags => "tags",
            RevisionField::CuratorDecision => "curator_decision",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "term" => Some(RevisionField::Term),
            "definition" => Some(RevisionField::Definition),
            "status" => Some(RevisionField::Status),
            "tags" => Some(RevisionField::Tags),
            "curator_decision" => Some(RevisionField::CuratorDecision),
            _ => None,
        }
    }
}

/// Append-only per-field change record. Survives deletion of its entry
/// (the entry reference is nulled, not cascaded) so the audit trail of a
/// removal is never lost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Revision {
    pub id: i64,
    pub entry_id: Option<i64>,
    pub snapshot_id: Option<i64>,
    pub field: RevisionField,
    pub old_value: Option<String>,
    pub new_value: String,
    pub post_id: i64,
    pub created_at: DateTime<Utc>,
}

// ── Term normalization ─────────────────────────────────────────────

/// Strip a trailing parenthesized disambiguation suffix:
/// `"Soma (deity)"` → `"Soma"`. Parentheses anywhere else are kept.
pub fn strip_disambiguation(term: &str) -> &str {
    let trimmed = term.trim_end();
    if trimmed.ends_with(')') {
        if let Some(open) = trimmed.rfind(" (") {
            return trimmed[..open].trim_end();
        }
    }
    trimmed
}

/// The uniqueness key for a term: lowercase, disambiguation stripped,
/// whitespace collapsed.
pub fn normalize_term(term: &str) -> String {
    strip_disambiguation(term.trim())
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
