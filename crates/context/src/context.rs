//! The durable conversation object.
//!
//! An `AnnotationContext` survives across scenes and restarts: it is
//! serialized whole into snapshots and rebuilt from them. Message
//! assembly is deterministic: identical context and scene input always
//! yield byte-identical messages, which is what makes snapshot
//! round-trips testable.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use qc_domain::chat::{Message, Role, ToolCall};

/// Marker appended to truncated assistant turns. A turn carrying it is
/// never truncated a second time.
pub const TRUNCATION_MARKER: &str = "… [truncated]";

/// One recorded conversation turn, tagged with enough provenance for
/// the compactor to find and remove it later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub seq: u64,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Tool calls carried by an assistant turn; needed to rebuild the
    /// history losslessly (tool results would dangle without them).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene_index: Option<u32>,
}

/// Summary of one chunk of consecutive scenes within a thread.
/// Negative chunk indices mark partial-chunk emergency summaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkSummary {
    pub thread_id: i64,
    pub chunk_index: i32,
    pub first_scene: u32,
    pub last_scene: u32,
    pub text: String,
    pub entry_ids: Vec<i64>,
}

/// Summary of a whole completed thread. Held only transiently: the
/// compactor merges it into the cumulative summary at thread close.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub thread_id: i64,
    pub position: u32,
    pub text: String,
    pub entry_ids: Vec<i64>,
}

/// Scene material for the trailing user message of a prompt.
#[derive(Debug, Clone)]
pub struct SceneInput<'a> {
    pub thread_id: i64,
    pub scene_index: u32,
    pub text: &'a str,
    /// Pre-rendered candidate glossary entries (may be empty).
    pub candidate_entries: &'a str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotationContext {
    pub system_prompt: String,
    pub cumulative_summary: Option<String>,
    pub chunk_summaries: Vec<ChunkSummary>,
    /// Pending thread summaries; length 0 or 1 in steady state.
    pub thread_summaries: Vec<ThreadSummary>,
    turns: VecDeque<Turn>,
    next_seq: u64,
}

impl AnnotationContext {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            cumulative_summary: None,
            chunk_summaries: Vec::new(),
            thread_summaries: Vec::new(),
            turns: VecDeque::new(),
            next_seq: 0,
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Turn recording / removal
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub fn record_turn(
        &mut self,
        role: Role,
        content: impl Into<String>,
        tool_call_id: Option<String>,
        tool_calls: Vec<ToolCall>,
        thread_id: Option<i64>,
        scene_index: Option<u32>,
    ) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.turns.push_back(Turn {
            seq,
            role,
            content: content.into(),
            tool_call_id,
            tool_calls,
            thread_id,
            scene_index,
        });
        seq
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    /// Drop every turn recorded for the given thread; reports how many
    /// were removed.
    pub fn remove_thread_turns(&mut self, thread_id: i64) -> usize {
        let before = self.turns.len();
        self.turns.retain(|t| t.thread_id != Some(thread_id));
        before - self.turns.len()
    }

    /// Drop the turns of a scene range within a thread (inclusive).
    pub fn remove_chunk_turns(&mut self, thread_id: i64, first_scene: u32, last_scene: u32) -> usize {
        let before = self.turns.len();
        self.turns.retain(|t| {
            !(t.thread_id == Some(thread_id)
                && t.scene_index
                    .map(|s| s >= first_scene && s <= last_scene)
                    .unwrap_or(false))
        });
        before - self.turns.len()
    }

    /// Turns belonging to one thread, in order (summarization input).
    pub fn thread_turns(&self, thread_id: i64) -> Vec<Turn> {
        self.turns
            .iter()
            .filter(|t| t.thread_id == Some(thread_id))
            .cloned()
            .collect()
    }

    /// Turns of a scene range within a thread, in order.
    pub fn chunk_turns(&self, thread_id: i64, first_scene: u32, last_scene: u32) -> Vec<Turn> {
        self.turns
            .iter()
            .filter(|t| {
                t.thread_id == Some(thread_id)
                    && t.scene_index
                        .map(|s| s >= first_scene && s <= last_scene)
                        .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Emergency-tier mutations (driven by the compactor)
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Strip `<think>…</think>` blocks from assistant turns older than
    /// the `keep_recent` most recent turns. Returns turns changed.
    pub fn strip_thinking_blocks(&mut self, keep_recent: usize, re: &regex::Regex) -> usize {
        let len = self.turns.len();
        let cutoff = len.saturating_sub(keep_recent);
        let mut changed = 0;
        for turn in self.turns.iter_mut().take(cutoff) {
            if turn.role != Role::Assistant {
                continue;
            }
            let stripped = re.replace_all(&turn.content, "").into_owned();
            if stripped != turn.content {
                turn.content = stripped;
                changed += 1;
            }
        }
        changed
    }

    /// Truncate assistant turns older than `keep_recent` turns to
    /// `max_len` characters, appending the visible marker. Turns already
    /// carrying the marker are left alone. Returns turns changed.
    pub fn truncate_old_responses(&mut self, keep_recent: usize, max_len: usize) -> usize {
        let len = self.turns.len();
        let cutoff = len.saturating_sub(keep_recent);
        let mut changed = 0;
        for turn in self.turns.iter_mut().take(cutoff) {
            if turn.role != Role::Assistant
                || turn.content.ends_with(TRUNCATION_MARKER)
                || turn.content.chars().count() <= max_len
            {
                continue;
            }
            let mut truncated: String = turn.content.chars().take(max_len).collect();
            truncated.push_str(TRUNCATION_MARKER);
            turn.content = truncated;
            changed += 1;
        }
        changed
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Message assembly
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Assemble the full prompt:
    ///
    /// 1. system prompt
    /// 2. summary header (cumulative, chunk, pending thread summaries,
    ///    each inside its own sentinel tag), omitted when empty
    /// 3. recorded history, in order
    /// 4. the current scene + candidate entries, when provided
    pub fn build_messages(&self, scene: Option<&SceneInput<'_>>) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.turns.len() + 3);
        messages.push(Message::system(&self.system_prompt));

        if let Some(header) = self.summary_header() {
            messages.push(Message::user(header));
        }

        for turn in &self.turns {
            messages.push(turn_to_message(turn));
        }

        if let Some(scene) = scene {
            let mut body = format!(
                "<current_scene thread=\"{}\" scene=\"{}\">\n{}\n</current_scene>",
                scene.thread_id, scene.scene_index, scene.text
            );
            if !scene.candidate_entries.is_empty() {
                body.push_str(&format!(
                    "\n<candidate_entries>\n{}\n</candidate_entries>",
                    scene.candidate_entries
                ));
            }
            messages.push(Message::user(body));
        }

        messages
    }

    /// The sentinel-tagged summary block, or `None` when there is
    /// nothing to say yet.
    pub fn summary_header(&self) -> Option<String> {
        if self.cumulative_summary.is_none()
            && self.chunk_summaries.is_empty()
            && self.thread_summaries.is_empty()
        {
            return None;
        }
        let mut out = String::new();
        if let Some(cumulative) = &self.cumulative_summary {
            out.push_str(&format!("<story_so_far>\n{cumulative}\n</story_so_far>\n"));
        }
        for chunk in &self.chunk_summaries {
            out.push_str(&format!(
                "<chunk_summary thread=\"{}\" chunk=\"{}\" scenes=\"{}-{}\">\n{}\n</chunk_summary>\n",
                chunk.thread_id, chunk.chunk_index, chunk.first_scene, chunk.last_scene, chunk.text
            ));
        }
        if let Some(thread) = self.thread_summaries.last() {
            out.push_str(&format!(
                "<thread_summary thread=\"{}\">\n{}\n</thread_summary>\n",
                thread.thread_id, thread.text
            ));
        }
        out.truncate(out.trim_end().len());
        Some(out)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Serialization
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

fn turn_to_message(turn: &Turn) -> Message {
    match turn.role {
        Role::Assistant if !turn.tool_calls.is_empty() => {
            Message::assistant_with_tool_calls(&turn.content, &turn.tool_calls)
        }
        Role::Assistant => Message::assistant(&turn.content),
        Role::Tool => {
            Message::tool_result(turn.tool_call_id.as_deref().unwrap_or(""), &turn.content)
        }
        Role::User => Message::user(&turn.content),
        Role::System => Message::system(&turn.content),
    }
}
