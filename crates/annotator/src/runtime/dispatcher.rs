//! Tool dispatch.
//!
//! A dispatch table maps tool name → typed argument struct → handler.
//! Handlers return tag-delimited text for the model; tool-level domain
//! failures (duplicate term, missing entry, summon violations) are
//! values routed back as `<tool_error>` results. Only storage-layer
//! failures propagate as errors.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use qc_corpus::reader::CorpusError;
use qc_corpus::CorpusReader;
use qc_domain::chat::{ToolCall, ToolDefinition};
use qc_domain::error::{Error, Result};
use qc_domain::glossary::{EntryPatch, EntryStatus, GlossaryEntry};
use qc_providers::LlmClient;
use qc_store::{AnnotatorDb, SearchFilter, StatusFilter, StoreError};

use super::summon::SummonSession;

/// Default adjacency window for `read_post include_adjacent`.
const ADJACENT_WINDOW: u32 = 2;

/// A glossary mutation the dispatcher performed during the current
/// scene, reported upward for run counters and chunk provenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryEvent {
    Created(i64),
    Updated(i64),
    Deleted(i64),
}

impl EntryEvent {
    pub fn entry_id(&self) -> i64 {
        match self {
            EntryEvent::Created(id) | EntryEvent::Updated(id) | EntryEvent::Deleted(id) => *id,
        }
    }
}

pub struct ToolDispatcher {
    store: Arc<Mutex<AnnotatorDb>>,
    corpus: Arc<Mutex<CorpusReader>>,
    client: Arc<dyn LlmClient>,
    /// Retry budget for summon chat turns (same policy as the runner's
    /// own agent calls).
    max_retries: u32,
    summon: Option<SummonSession>,
    /// Provenance stamp for writes: (post_id, thread_id) of the scene
    /// being processed.
    current_post_id: i64,
    current_thread_id: i64,
    entry_events: Vec<EntryEvent>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Argument shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default)]
    tags: Vec<String>,
    status: Option<String>,
    #[serde(default)]
    include_references: bool,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct CreateArgs {
    term: String,
    definition: String,
    #[serde(default)]
    tags: Vec<String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateArgs {
    entry_id: i64,
    term: Option<String>,
    definition: Option<String>,
    status: Option<String>,
    tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct DeleteArgs {
    entry_id: i64,
    reason: String,
}

#[derive(Debug, Deserialize)]
struct ReadPostArgs {
    post_id: i64,
    #[serde(default)]
    include_adjacent: bool,
}

#[derive(Debug, Deserialize)]
struct ThreadRangeArgs {
    thread_id: i64,
    start: Option<i64>,
    end: Option<i64>,
    tag_filter: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SummonArgs {
    snapshot_id: i64,
    query: String,
}

#[derive(Debug, Deserialize)]
struct SummonContinueArgs {
    message: String,
}

#[derive(Debug, Deserialize)]
struct SummonDismissArgs {
    summary: String,
}

impl ToolDispatcher {
    pub fn new(
        store: Arc<Mutex<AnnotatorDb>>,
        corpus: Arc<Mutex<CorpusReader>>,
        client: Arc<dyn LlmClient>,
        max_retries: u32,
    ) -> Self {
        Self {
            store,
            corpus,
            client,
            max_retries,
            summon: None,
            current_post_id: 0,
            current_thread_id: 0,
            entry_events: Vec::new(),
        }
    }

    /// Stamp the provenance for subsequent writes.
    pub fn set_position(&mut self, post_id: i64, thread_id: i64) {
        self.current_post_id = post_id;
        self.current_thread_id = thread_id;
    }

    /// Drain the mutations recorded since the last call.
    pub fn take_entry_events(&mut self) -> Vec<EntryEvent> {
        std::mem::take(&mut self.entry_events)
    }

    pub fn summon_active(&self) -> bool {
        self.summon.is_some()
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Dispatch
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Route one tool call. Returns `(result_text, is_error)`; only
    /// storage-layer failures become `Err`.
    pub async fn dispatch(&mut self, call: &ToolCall) -> Result<(String, bool)> {
        let name = call.tool_name.as_str();
        tracing::debug!(tool = name, "dispatching tool call");

        // Write tools are blocked for the whole life of a summon.
        if self.summon.is_some()
            && matches!(name, "glossary_create" | "glossary_update" | "glossary_delete")
        {
            return Ok(tool_error(name, "WriteBlockedDuringSummon"));
        }

        match name {
            "glossary_search" => self.glossary_search(&call.arguments),
            "glossary_create" => self.glossary_create(&call.arguments),
            "glossary_update" => self.glossary_update(&call.arguments),
            "glossary_delete" => self.glossary_delete(&call.arguments),
            "read_post" => self.read_post(&call.arguments),
            "read_thread_range" => self.read_thread_range(&call.arguments),
            "summon_snapshot" => self.summon_snapshot(&call.arguments).await,
            "summon_continue" => self.summon_continue(&call.arguments).await,
            "summon_dismiss" => self.summon_dismiss(&call.arguments),
            _ => Ok(tool_error(name, "UnknownTool")),
        }
    }

    // ── Glossary tools ────────────────────────────────────────────

    fn glossary_search(&mut self, args: &Value) -> Result<(String, bool)> {
        let args: SearchArgs = match typed("glossary_search", args) {
            Ok(a) => a,
            Err(e) => return Ok(e),
        };
        let status = match parse_status_filter(args.status.as_deref()) {
            Ok(s) => s,
            Err(reason) => return Ok(tool_error("glossary_search", &reason)),
        };
        let filter = SearchFilter {
            tags: args.tags,
            status,
            limit: args.limit.unwrap_or(10),
        };

        let store = self.store.lock();
        let entries = store
            .search_entries(&args.query, &filter)
            .map_err(storage)?;

        let mut out = format!("<glossary_results count=\"{}\">", entries.len());
        for entry in &entries {
            out.push('\n');
            out.push_str(&render_entry(entry));
            if args.include_references {
                for referenced in resolve_references(&store, entry)? {
                    out.push_str("\n  ");
                    out.push_str(&render_entry(&referenced));
                }
            }
        }
        out.push_str("\n</glossary_results>");
        Ok((out, false))
    }

    fn glossary_create(&mut self, args: &Value) -> Result<(String, bool)> {
        let args: CreateArgs = match typed("glossary_create", args) {
            Ok(a) => a,
            Err(e) => return Ok(e),
        };
        let status = match args.status.as_deref() {
            None => EntryStatus::Tentative,
            Some(raw) => match EntryStatus::parse(raw) {
                Some(s) => s,
                None => {
                    return Ok(tool_error(
                        "glossary_create",
                        &format!("InvalidArguments: unknown status '{raw}'"),
                    ))
                }
            },
        };

        let result = self.store.lock().create_entry(
            &args.term,
            &args.definition,
            &args.tags,
            self.current_post_id,
            self.current_thread_id,
            status,
        );
        match result {
            Ok(id) => {
                self.entry_events.push(EntryEvent::Created(id));
                Ok((
                    format!(
                        "<glossary_created id=\"{}\" term=\"{}\" status=\"{}\"/>",
                        id,
                        args.term,
                        status.as_str()
                    ),
                    false,
                ))
            }
            Err(StoreError::DuplicateTerm { .. }) => {
                Ok(tool_error("glossary_create", "DuplicateTerm"))
            }
            Err(e) => Err(storage(e)),
        }
    }

    fn glossary_update(&mut self, args: &Value) -> Result<(String, bool)> {
        let args: UpdateArgs = match typed("glossary_update", args) {
            Ok(a) => a,
            Err(e) => return Ok(e),
        };
        let status = match args.status.as_deref() {
            None => None,
            Some(raw) => match EntryStatus::parse(raw) {
                Some(s) => Some(s),
                None => {
                    return Ok(tool_error(
                        "glossary_update",
                        &format!("InvalidArguments: unknown status '{raw}'"),
                    ))
                }
            },
        };
        let patch = EntryPatch {
            term: args.term,
            definition: args.definition,
            status,
            tags: args.tags,
        };
        if patch.is_empty() {
            return Ok(tool_error("glossary_update", "InvalidArguments: empty patch"));
        }

        let result = self.store.lock().update_entry(
            args.entry_id,
            &patch,
            self.current_post_id,
            self.current_thread_id,
        );
        match result {
            Ok(true) => {
                self.entry_events.push(EntryEvent::Updated(args.entry_id));
                Ok((format!("<glossary_updated id=\"{}\"/>", args.entry_id), false))
            }
            Ok(false) => Ok(tool_error("glossary_update", "EntryNotFound")),
            Err(StoreError::DuplicateTerm { .. }) => {
                Ok(tool_error("glossary_update", "DuplicateTerm"))
            }
            Err(e) => Err(storage(e)),
        }
    }

    fn glossary_delete(&mut self, args: &Value) -> Result<(String, bool)> {
        let args: DeleteArgs = match typed("glossary_delete", args) {
            Ok(a) => a,
            Err(e) => return Ok(e),
        };
        if args.reason.trim().is_empty() {
            return Ok(tool_error("glossary_delete", "InvalidArguments: reason required"));
        }
        let deleted = self
            .store
            .lock()
            .delete_entry(args.entry_id, &args.reason, self.current_post_id)
            .map_err(storage)?;
        if deleted {
            self.entry_events.push(EntryEvent::Deleted(args.entry_id));
            Ok((format!("<glossary_deleted id=\"{}\"/>", args.entry_id), false))
        } else {
            Ok(tool_error("glossary_delete", "EntryNotFound"))
        }
    }

    // ── Corpus tools ──────────────────────────────────────────────

    fn read_post(&mut self, args: &Value) -> Result<(String, bool)> {
        let args: ReadPostArgs = match typed("read_post", args) {
            Ok(a) => a,
            Err(e) => return Ok(e),
        };
        let corpus = self.corpus.lock();
        if args.include_adjacent {
            match corpus.adjacent_posts(args.post_id, ADJACENT_WINDOW) {
                Ok(posts) => {
                    let mut out = format!(
                        "<corpus_posts center=\"{}\" count=\"{}\">",
                        args.post_id,
                        posts.len()
                    );
                    for post in &posts {
                        out.push('\n');
                        out.push_str(&render_post(post));
                    }
                    out.push_str("\n</corpus_posts>");
                    Ok((out, false))
                }
                Err(e) => corpus_result("read_post", e),
            }
        } else {
            match corpus.get_post(args.post_id) {
                Ok(post) => Ok((render_post(&post), false)),
                Err(e) => corpus_result("read_post", e),
            }
        }
    }

    fn read_thread_range(&mut self, args: &Value) -> Result<(String, bool)> {
        let args: ThreadRangeArgs = match typed("read_thread_range", args) {
            Ok(a) => a,
            Err(e) => return Ok(e),
        };
        let corpus = self.corpus.lock();
        match corpus.thread_range(args.thread_id, args.start, args.end, args.tag_filter.as_deref())
        {
            Ok(posts) => {
                let mut out = format!(
                    "<corpus_thread id=\"{}\" count=\"{}\">",
                    args.thread_id,
                    posts.len()
                );
                for post in &posts {
                    out.push('\n');
                    out.push_str(&render_post(post));
                }
                out.push_str("\n</corpus_thread>");
                Ok((out, false))
            }
            Err(e) => corpus_result("read_thread_range", e),
        }
    }

    // ── Summon sub-state ──────────────────────────────────────────

    async fn summon_snapshot(&mut self, args: &Value) -> Result<(String, bool)> {
        let args: SummonArgs = match typed("summon_snapshot", args) {
            Ok(a) => a,
            Err(e) => return Ok(e),
        };
        if self.summon.is_some() {
            return Ok(tool_error("summon_snapshot", "SummonActive"));
        }

        let context_json = {
            let store = self.store.lock();
            match store.load_snapshot(args.snapshot_id) {
                Ok((_, json)) => json,
                Err(StoreError::SnapshotNotFound(_)) => {
                    return Ok(tool_error("summon_snapshot", "SnapshotNotFound"))
                }
                Err(e) => return Err(storage(e)),
            }
        };

        let mut session = match SummonSession::open(args.snapshot_id, &context_json) {
            Ok(s) => s,
            Err(e) => return Err(e),
        };
        match session.ask(&self.client, &args.query, self.max_retries).await {
            Ok(reply) => {
                let out = format!(
                    "<summon_response snapshot=\"{}\" dialogue=\"{}\">\n{}\n</summon_response>",
                    args.snapshot_id,
                    session.dialogue_id(),
                    reply
                );
                self.summon = Some(session);
                Ok((out, false))
            }
            Err(e) => Ok(tool_error(
                "summon_snapshot",
                &format!("SummonChatFailed: {e}"),
            )),
        }
    }

    async fn summon_continue(&mut self, args: &Value) -> Result<(String, bool)> {
        let args: SummonContinueArgs = match typed("summon_continue", args) {
            Ok(a) => a,
            Err(e) => return Ok(e),
        };
        let session = match self.summon.as_mut() {
            Some(s) => s,
            None => return Ok(tool_error("summon_continue", "NoActiveSummon")),
        };
        match session.ask(&self.client, &args.message, self.max_retries).await {
            Ok(reply) => Ok((
                format!(
                    "<summon_response snapshot=\"{}\" dialogue=\"{}\">\n{}\n</summon_response>",
                    session.snapshot_id(),
                    session.dialogue_id(),
                    reply
                ),
                false,
            )),
            Err(e) => Ok(tool_error(
                "summon_continue",
                &format!("SummonChatFailed: {e}"),
            )),
        }
    }

    fn summon_dismiss(&mut self, args: &Value) -> Result<(String, bool)> {
        let args: SummonDismissArgs = match typed("summon_dismiss", args) {
            Ok(a) => a,
            Err(e) => return Ok(e),
        };
        let session = match self.summon.take() {
            Some(s) => s,
            None => return Ok(tool_error("summon_dismiss", "NoActiveSummon")),
        };
        // The dialogue summary survives as a revision note pinned to the
        // snapshot; the transient context is discarded with the session.
        self.store
            .lock()
            .log_decision(
                None,
                Some(session.snapshot_id()),
                &format!("summon dismissed: {}", args.summary),
                self.current_post_id,
            )
            .map_err(storage)?;
        tracing::debug!(
            snapshot_id = session.snapshot_id(),
            turns = session.turn_count(),
            "summon dismissed"
        );
        Ok((
            format!("<summon_dismissed snapshot=\"{}\"/>", session.snapshot_id()),
            false,
        ))
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Tool definitions
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// The set of tool definitions exposed to the model.
    pub fn definitions() -> Vec<ToolDefinition> {
        vec![
            ToolDefinition {
                name: "glossary_search".into(),
                description: "Search the codex by term or definition text. \
                              Returns ranked matches."
                    .into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "query": { "type": "string", "description": "Search text" },
                        "tags": {
                            "type": "array", "items": { "type": "string" },
                            "description": "Require every listed tag"
                        },
                        "status": {
                            "type": "string", "enum": ["tentative", "confirmed", "all"],
                            "description": "Status filter (default all)"
                        },
                        "include_references": {
                            "type": "boolean",
                            "description": "Expand [[Term]] cross-references in results"
                        },
                        "limit": { "type": "integer", "description": "Max results (default 10)" }
                    },
                    "required": ["query"]
                }),
            },
            ToolDefinition {
                name: "glossary_create".into(),
                description: "Create a new codex entry. New entries start tentative \
                              unless a status is given."
                    .into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "term": { "type": "string", "description": "Display term" },
                        "definition": { "type": "string", "description": "Markdown definition; may use [[Term]] references" },
                        "tags": { "type": "array", "items": { "type": "string" } },
                        "status": { "type": "string", "enum": ["tentative", "confirmed"] }
                    },
                    "required": ["term", "definition"]
                }),
            },
            ToolDefinition {
                name: "glossary_update".into(),
                description: "Update fields of an existing entry. Only the fields \
                              provided are touched."
                    .into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "entry_id": { "type": "integer" },
                        "term": { "type": "string" },
                        "definition": { "type": "string" },
                        "status": { "type": "string", "enum": ["tentative", "confirmed"] },
                        "tags": { "type": "array", "items": { "type": "string" } }
                    },
                    "required": ["entry_id"]
                }),
            },
            ToolDefinition {
                name: "glossary_delete".into(),
                description: "Delete an entry. The reason is kept in the audit trail.".into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "entry_id": { "type": "integer" },
                        "reason": { "type": "string", "description": "Why the entry is wrong" }
                    },
                    "required": ["entry_id", "reason"]
                }),
            },
            ToolDefinition {
                name: "read_post".into(),
                description: "Read one corpus post by id, optionally with its \
                              neighbours."
                    .into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "post_id": { "type": "integer" },
                        "include_adjacent": {
                            "type": "boolean",
                            "description": "Also return 2 posts either side"
                        }
                    },
                    "required": ["post_id"]
                }),
            },
            ToolDefinition {
                name: "read_thread_range".into(),
                description: "Read a range of posts from one thread, optionally \
                              filtered by tag."
                    .into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "thread_id": { "type": "integer" },
                        "start": { "type": "integer", "description": "First post id (inclusive)" },
                        "end": { "type": "integer", "description": "Last post id (inclusive)" },
                        "tag_filter": { "type": "string", "description": "e.g. qm_post" }
                    },
                    "required": ["thread_id"]
                }),
            },
            ToolDefinition {
                name: "summon_snapshot".into(),
                description: "Open a read-only dialogue with a historical snapshot \
                              of this annotation run. Only one summon may be active."
                    .into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "snapshot_id": { "type": "integer" },
                        "query": { "type": "string", "description": "First question to the historical context" }
                    },
                    "required": ["snapshot_id", "query"]
                }),
            },
            ToolDefinition {
                name: "summon_continue".into(),
                description: "Ask a follow-up question in the active summon dialogue.".into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "message": { "type": "string" }
                    },
                    "required": ["message"]
                }),
            },
            ToolDefinition {
                name: "summon_dismiss".into(),
                description: "End the active summon dialogue, recording a summary of \
                              what it established."
                    .into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "summary": { "type": "string", "description": "What the dialogue established" }
                    },
                    "required": ["summary"]
                }),
            },
        ]
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) fn tool_error(name: &str, reason: &str) -> (String, bool) {
    (format!("<tool_error name=\"{name}\">{reason}</tool_error>"), true)
}

fn typed<T: DeserializeOwned>(name: &str, args: &Value) -> std::result::Result<T, (String, bool)> {
    serde_json::from_value(args.clone())
        .map_err(|e| tool_error(name, &format!("InvalidArguments: {e}")))
}

fn storage(e: StoreError) -> Error {
    Error::Storage(e.to_string())
}

/// Corpus lookups: not-found is a domain error for the model; anything
/// else is a storage failure.
fn corpus_result(name: &str, e: CorpusError) -> Result<(String, bool)> {
    match e {
        CorpusError::PostNotFound(_) => Ok(tool_error(name, "PostNotFound")),
        CorpusError::ThreadNotFound(_) => Ok(tool_error(name, "ThreadNotFound")),
        CorpusError::Sqlite(e) => Err(Error::Storage(e.to_string())),
    }
}

fn parse_status_filter(raw: Option<&str>) -> std::result::Result<StatusFilter, String> {
    match raw {
        None | Some("all") => Ok(StatusFilter::All),
        Some("tentative") => Ok(StatusFilter::Tentative),
        Some("confirmed") => Ok(StatusFilter::Confirmed),
        Some(other) => Err(format!("InvalidArguments: unknown status '{other}'")),
    }
}

fn render_entry(entry: &GlossaryEntry) -> String {
    format!(
        "  <entry id=\"{}\" term=\"{}\" status=\"{}\" tags=\"{}\" first_seen_post=\"{}\">{}</entry>",
        entry.id,
        entry.term,
        entry.status.as_str(),
        entry.tags.join(","),
        entry.first_seen_post_id,
        entry.definition
    )
}

fn render_post(post: &qc_domain::scene::StoryPost) -> String {
    format!(
        "  <post id=\"{}\" thread=\"{}\" author=\"{}\" tags=\"{}\">{}</post>",
        post.id,
        post.thread_id,
        post.author.as_deref().unwrap_or(""),
        post.tags.join(","),
        post.body
    )
}

/// Resolve `[[Term]]` cross-references one level deep.
fn resolve_references(
    store: &AnnotatorDb,
    entry: &GlossaryEntry,
) -> Result<Vec<GlossaryEntry>> {
    let re = regex::Regex::new(r"\[\[([^\]]+)\]\]").expect("static regex");
    let mut out = Vec::new();
    for cap in re.captures_iter(&entry.definition) {
        let normalized = qc_domain::glossary::normalize_term(&cap[1]);
        if let Some(referenced) = store
            .get_entry_by_normalized(&normalized)
            .map_err(storage)?
        {
            if referenced.id != entry.id && !out.iter().any(|e: &GlossaryEntry| e.id == referenced.id) {
                out.push(referenced);
            }
        }
    }
    Ok(out)
}
