//! Summoned dialogues: read-only conversations with a historical
//! annotation context reconstituted from a snapshot.
//!
//! The session owns a private copy of the snapshot context; nothing it
//! records can reach the live context, and the dispatcher blocks every
//! write tool while a session is open.

use std::sync::Arc;

use qc_context::AnnotationContext;
use qc_domain::chat::Role;
use qc_domain::error::{Error, Result};
use qc_providers::{ChatRequest, LlmClient};

use crate::prompts::SUMMON_PREAMBLE;

use super::call_with_retry;

pub struct SummonSession {
    snapshot_id: i64,
    dialogue_id: String,
    context: AnnotationContext,
    turns: u32,
}

impl SummonSession {
    /// Rehydrate the snapshot context and prefix its system prompt with
    /// the summon preamble.
    pub fn open(snapshot_id: i64, context_json: &str) -> Result<Self> {
        let mut context = AnnotationContext::from_json(context_json).map_err(|e| {
            Error::Storage(format!("snapshot {snapshot_id} context unreadable: {e}"))
        })?;
        context.system_prompt = format!("{SUMMON_PREAMBLE}\n\n{}", context.system_prompt);

        let dialogue_id = uuid::Uuid::new_v4().to_string();
        tracing::info!(snapshot_id, dialogue_id = %dialogue_id, "summon opened");
        Ok(Self {
            snapshot_id,
            dialogue_id,
            context,
            turns: 0,
        })
    }

    pub fn snapshot_id(&self) -> i64 {
        self.snapshot_id
    }

    pub fn dialogue_id(&self) -> &str {
        &self.dialogue_id
    }

    pub fn turn_count(&self) -> u32 {
        self.turns
    }

    /// One question-answer exchange against the historical context.
    /// Transient agent failures retry with the same backoff as every
    /// other call site.
    pub async fn ask(
        &mut self,
        client: &Arc<dyn LlmClient>,
        question: &str,
        max_retries: u32,
    ) -> Result<String> {
        self.context
            .record_turn(Role::User, question, None, vec![], None, None);
        let req = ChatRequest {
            messages: self.context.build_messages(None),
            tools: vec![],
            temperature: Some(0.4),
            max_tokens: Some(768),
            model: None,
        };
        let resp = call_with_retry(client, &req, max_retries).await?;
        self.context
            .record_turn(Role::Assistant, &resp.content, None, vec![], None, None);
        self.turns += 1;
        Ok(resp.content)
    }
}
