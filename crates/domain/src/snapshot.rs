//! Snapshot metadata and run-state bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::glossary::EntryStatus;

/// Why a snapshot was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotKind {
    Checkpoint,
    CuratorFork,
    Manual,
}

impl SnapshotKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotKind::Checkpoint => "checkpoint",
            SnapshotKind::CuratorFork => "curator_fork",
            SnapshotKind::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "checkpoint" => Some(SnapshotKind::Checkpoint),
            "curator_fork" => Some(SnapshotKind::CuratorFork),
            "manual" => Some(SnapshotKind::Manual),
            _ => None,
        }
    }
}

/// Snapshot header: enough to pick one from a listing without loading
/// its serialized context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub id: i64,
    pub kind: SnapshotKind,
    pub last_post_id: i64,
    pub last_thread_id: i64,
    /// Scene index within the thread at snapshot time.
    pub thread_position: u32,
    pub entry_count: u32,
    pub token_count: u32,
    pub created_at: DateTime<Utc>,
}

/// Per-entry state captured at snapshot time, for blame: given a
/// definition fragment, find the snapshot that introduced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEntryState {
    pub entry_id: i64,
    pub definition: String,
    pub status: EntryStatus,
}

/// The singleton run-state row (id = 1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub last_post_id: i64,
    pub last_thread_id: i64,
    pub current_snapshot_id: Option<i64>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub posts_processed: u64,
    pub scenes_processed: u64,
    pub entries_created: u64,
    pub entries_updated: u64,
}

impl RunState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            last_post_id: 0,
            last_thread_id: 0,
            current_snapshot_id: None,
            started_at: now,
            updated_at: now,
            posts_processed: 0,
            scenes_processed: 0,
            entries_created: 0,
            entries_updated: 0,
        }
    }
}

/// Per-thread progress, used to resume `scene_index` mid-thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadState {
    pub thread_id: i64,
    pub scenes_emitted: u32,
    pub completed: bool,
}
