//! The annotator store: glossary entries with full-text search, the
//! append-only revision log, snapshots, and run-state bookkeeping.
//!
//! One writing connection, owned by the runner; every mutation runs in
//! a single transaction together with its revision rows.

pub mod db;
pub mod glossary;
pub mod run_state;
pub mod schema;
pub mod snapshots;

pub use db::{AnnotatorDb, StoreError};
pub use glossary::{SearchFilter, StatusFilter};
pub use snapshots::CheckpointArgs;
