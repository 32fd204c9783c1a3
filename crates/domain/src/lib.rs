//! Shared domain types for QuestCodex.
//!
//! Everything here is plain data: the chat wire types, the glossary
//! model, corpus scenes, snapshot metadata, configuration, and the
//! shared error type. No I/O lives in this crate.

pub mod chat;
pub mod config;
pub mod error;
pub mod glossary;
pub mod scene;
pub mod snapshot;

pub use error::{Error, Result};
