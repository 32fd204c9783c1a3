//! Summarization, the compactor's writing arm.
//!
//! A trait seam so compactor tests can substitute a deterministic stub
//! and assert structure instead of prose.

use std::sync::Arc;

use qc_domain::chat::Message;
use qc_domain::error::Result;
use qc_providers::{ChatRequest, LlmClient};

use crate::context::Turn;

#[async_trait::async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize a completed thread: plot highlights plus the explicit
    /// list of glossary entries created/updated in it.
    async fn summarize_thread(
        &self,
        turns: &[Turn],
        thread_id: i64,
        entry_ids: &[i64],
    ) -> Result<String>;

    /// Same shape, narrower scope: one chunk of consecutive scenes.
    async fn summarize_chunk(
        &self,
        turns: &[Turn],
        thread_id: i64,
        first_scene: u32,
        last_scene: u32,
        entry_ids: &[i64],
    ) -> Result<String>;

    /// Fold new text into the running "story so far", deduplicating.
    async fn merge_into_cumulative(&self, old: Option<&str>, new_text: &str) -> Result<String>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM-backed implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct LlmSummarizer {
    client: Arc<dyn LlmClient>,
    /// Summary size target, in tokens (the model treats it as guidance).
    target_tokens: u32,
}

impl LlmSummarizer {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self {
            client,
            target_tokens: 500,
        }
    }

    async fn complete(&self, prompt: String) -> Result<String> {
        let req = ChatRequest {
            messages: vec![Message::user(prompt)],
            tools: vec![],
            temperature: Some(0.1),
            max_tokens: Some(self.target_tokens * 2),
            model: None,
        };
        let resp = self.client.chat(&req).await?;
        Ok(resp.content.trim().to_string())
    }
}

#[async_trait::async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize_thread(
        &self,
        turns: &[Turn],
        thread_id: i64,
        entry_ids: &[i64],
    ) -> Result<String> {
        let conversation = build_conversation_text(turns);
        let prompt = format!(
            "You are summarizing the annotation of one forum thread (thread {thread_id}).\n\
             Produce a hybrid summary of roughly {target} tokens:\n\
             1. The plot highlights of the thread, in order\n\
             2. Recurring characters, places, factions, and items\n\
             3. A final line `entries: {ids}` listing the glossary entry ids touched\n\n\
             Write in present tense. Omit the mechanics of tool calls; keep what the\n\
             story established.\n\n\
             TRANSCRIPT:\n{conversation}",
            target = self.target_tokens,
            ids = render_ids(entry_ids),
        );
        self.complete(prompt).await
    }

    async fn summarize_chunk(
        &self,
        turns: &[Turn],
        thread_id: i64,
        first_scene: u32,
        last_scene: u32,
        entry_ids: &[i64],
    ) -> Result<String> {
        let conversation = build_conversation_text(turns);
        let prompt = format!(
            "You are summarizing scenes {first_scene}-{last_scene} of thread {thread_id}.\n\
             Produce a compact summary (at most {target} tokens) that preserves:\n\
             1. What happened, in order\n\
             2. Names introduced or changed\n\
             3. A final line `entries: {ids}` listing the glossary entry ids touched\n\n\
             TRANSCRIPT:\n{conversation}",
            target = self.target_tokens,
            ids = render_ids(entry_ids),
        );
        self.complete(prompt).await
    }

    async fn merge_into_cumulative(&self, old: Option<&str>, new_text: &str) -> Result<String> {
        let prompt = match old {
            Some(old) => format!(
                "Fold the new thread summary into the running story summary.\n\
                 Deduplicate aggressively; keep the merged text under\n\
                 {target} tokens. Preserve every `entries:` line.\n\n\
                 RUNNING SUMMARY:\n{old}\n\nNEW THREAD SUMMARY:\n{new_text}",
                target = self.target_tokens * 2,
            ),
            None => return Ok(new_text.to_string()),
        };
        self.complete(prompt).await
    }
}

/// Role-labelled transcript text for the summarization prompts. Very
/// long lines (tool results, mostly) are elided in the middle.
fn build_conversation_text(turns: &[Turn]) -> String {
    let mut buf = String::new();
    for turn in turns {
        let role_label = match turn.role {
            qc_domain::chat::Role::User => "User",
            qc_domain::chat::Role::Assistant => "Assistant",
            qc_domain::chat::Role::Tool => "Tool",
            qc_domain::chat::Role::System => "System",
        };
        buf.push_str(role_label);
        buf.push_str(": ");
        if turn.content.len() > 2000 {
            let head: String = turn.content.chars().take(1000).collect();
            let tail_start = turn.content.chars().count().saturating_sub(500);
            let tail: String = turn.content.chars().skip(tail_start).collect();
            buf.push_str(&head);
            buf.push_str(" [...] ");
            buf.push_str(&tail);
        } else {
            buf.push_str(&turn.content);
        }
        buf.push('\n');
    }
    buf
}

fn render_ids(ids: &[i64]) -> String {
    if ids.is_empty() {
        "none".into()
    } else {
        ids.iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qc_domain::chat::Role;

    #[test]
    fn conversation_text_labels_roles_and_elides_long_lines() {
        let turns = vec![
            Turn {
                seq: 0,
                role: Role::User,
                content: "short".into(),
                tool_call_id: None,
                tool_calls: vec![],
                thread_id: Some(1),
                scene_index: Some(0),
            },
            Turn {
                seq: 1,
                role: Role::Tool,
                content: "x".repeat(3000),
                tool_call_id: Some("c".into()),
                tool_calls: vec![],
                thread_id: Some(1),
                scene_index: Some(0),
            },
        ];
        let text = build_conversation_text(&turns);
        assert!(text.starts_with("User: short\n"));
        assert!(text.contains("Tool: "));
        assert!(text.contains(" [...] "));
        assert!(text.len() < 3000);
    }

    #[test]
    fn id_rendering() {
        assert_eq!(render_ids(&[]), "none");
        assert_eq!(render_ids(&[3, 7]), "3, 7");
    }
}
