//! The perceive-reason-act loop.
//!
//! Per scene: consult the compactor, retrieve candidate entries, call
//! the agent with tools attached, route tool calls, parse any
//! `<codex_updates>` payload, record the turns, curate at thread
//! boundaries, and checkpoint. Run-state advances and snapshot writes
//! share one transaction, so a crash never leaves the cursor ahead of
//! its snapshot; a partially processed scene is simply redone.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;

use qc_context::{
    AnnotationContext, Compactor, CompactorState, LlmSummarizer, SceneInput, TokenCounter,
};
use qc_corpus::{CorpusReader, SceneBatcher, SceneEvent};
use qc_domain::chat::{Message, Role, ToolCall};
use qc_domain::config::Config;
use qc_domain::error::{Error, Result};
use qc_domain::scene::Scene;
use qc_domain::snapshot::{RunState, SnapshotKind, ThreadState};
use qc_providers::{ChatRequest, LlmClient};
use qc_store::{AnnotatorDb, CheckpointArgs};

use crate::prompts::ANNOTATOR_SYSTEM_PROMPT;

use super::curator;
use super::dispatcher::{EntryEvent, ToolDispatcher};
use super::updates::{parse_codex_updates, CodexUpdate, UpdateField};
use super::call_with_retry;

/// What a finished (or interrupted) run reports.
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub scenes_processed: u64,
    pub entries_created: u64,
    pub entries_updated: u64,
    pub interrupted: bool,
    pub token_fallback: bool,
}

pub struct Runner {
    config: Config,
    store: Arc<Mutex<AnnotatorDb>>,
    client: Arc<dyn LlmClient>,
    counter: Arc<TokenCounter>,
    compactor: Compactor,
    dispatcher: ToolDispatcher,
    corpus: Arc<Mutex<CorpusReader>>,
    batcher: SceneBatcher,
    ctx: AnnotationContext,
    comp_state: CompactorState,
    run_state: RunState,
    stop: Arc<AtomicBool>,
    scenes_since_checkpoint: u32,
    last_tokens: u32,
    word_re: regex::Regex,
    outcome: RunOutcome,
}

impl Runner {
    /// Build a runner, resuming from run-state unless `no_resume` wipes
    /// it. Resumption rehydrates the annotation context from the
    /// current snapshot and restarts at the first unprocessed scene.
    pub fn new(
        config: Config,
        store: Arc<Mutex<AnnotatorDb>>,
        corpus: Arc<Mutex<CorpusReader>>,
        client: Arc<dyn LlmClient>,
        stop: Arc<AtomicBool>,
    ) -> Result<Self> {
        let counter = Arc::new(TokenCounter::new(
            client.clone(),
            config.context.chars_per_token,
            config.context.per_message_overhead,
        ));
        let summarizer = Arc::new(LlmSummarizer::new(client.clone()));
        let compactor = Compactor::new(
            summarizer,
            counter.clone(),
            config.compaction.clone(),
            config.context.budget,
            config.context.verify_ratio,
        );
        let dispatcher = ToolDispatcher::new(
            store.clone(),
            corpus.clone(),
            client.clone(),
            config.agent.max_retries,
        );

        if config.runner.no_resume {
            store.lock().clear_run_state().map_err(storage)?;
        }

        let existing = store.lock().read_run_state().map_err(storage)?;
        let (run_state, ctx, comp_state, start_after, resume_scene_index) = match existing {
            Some(state) if !config.runner.no_resume => {
                let ctx = match state.current_snapshot_id {
                    Some(snapshot_id) => {
                        let (_, json) =
                            store.lock().load_snapshot(snapshot_id).map_err(storage)?;
                        AnnotationContext::from_json(&json).map_err(|e| {
                            Error::Storage(format!("snapshot {snapshot_id} context unreadable: {e}"))
                        })?
                    }
                    None => AnnotationContext::new(ANNOTATOR_SYSTEM_PROMPT),
                };
                let thread_state = store
                    .lock()
                    .read_thread_state(state.last_thread_id)
                    .map_err(storage)?;
                let (open_thread, scene_index) = match thread_state {
                    Some(ts) if !ts.completed => (Some(ts.thread_id), ts.scenes_emitted),
                    _ => (None, 0),
                };
                let comp_state = CompactorState::rehydrate(&ctx, open_thread, scene_index);
                tracing::info!(
                    last_post_id = state.last_post_id,
                    last_thread_id = state.last_thread_id,
                    scenes_processed = state.scenes_processed,
                    "resuming from run-state"
                );
                (
                    state.clone(),
                    ctx,
                    comp_state,
                    Some((state.last_thread_id, state.last_post_id)),
                    scene_index,
                )
            }
            _ => (
                RunState::new(Utc::now()),
                AnnotationContext::new(ANNOTATOR_SYSTEM_PROMPT),
                CompactorState::new(),
                None,
                0,
            ),
        };

        let batcher = SceneBatcher::new(
            corpus.clone(),
            config.corpus.batch_size,
            start_after,
            resume_scene_index,
        );

        Ok(Self {
            config,
            store,
            client,
            counter,
            compactor,
            dispatcher,
            corpus,
            batcher,
            ctx,
            comp_state,
            run_state,
            stop,
            scenes_since_checkpoint: 0,
            last_tokens: 0,
            word_re: regex::Regex::new(r"[A-Za-z][A-Za-z0-9']{3,}").expect("static regex"),
            outcome: RunOutcome::default(),
        })
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Main loop
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub async fn run(&mut self) -> Result<RunOutcome> {
        loop {
            // Stop requests are honored between scenes only.
            if self.stop.load(Ordering::SeqCst) {
                tracing::info!("stop requested; writing final checkpoint");
                if self.outcome.scenes_processed > 0 {
                    self.checkpoint()?;
                }
                self.outcome.interrupted = true;
                break;
            }

            if let Some(limit) = self.config.runner.scene_limit {
                if self.outcome.scenes_processed >= limit {
                    tracing::info!(limit, "scene limit reached; checkpointing");
                    self.checkpoint()?;
                    break;
                }
            }

            let event = match self.batcher.next_event().map_err(corpus_storage) {
                Ok(event) => event,
                Err(e) => return Err(self.halt(e)),
            };
            match event {
                None => {
                    tracing::info!("no more scenes; corpus exhausted");
                    if self.outcome.scenes_processed > 0 {
                        self.checkpoint()?;
                    }
                    break;
                }
                Some(SceneEvent::EmptyThread { thread_id }) => {
                    // Boundary event for a thread with no story content.
                    tracing::debug!(thread_id, "thread has no qm posts");
                    let written = self
                        .store
                        .lock()
                        .write_thread_state(&ThreadState {
                            thread_id,
                            scenes_emitted: 0,
                            completed: true,
                        })
                        .map_err(storage);
                    if let Err(e) = written {
                        return Err(self.halt(e));
                    }
                }
                Some(SceneEvent::Scene(scene)) => {
                    self.process_scene(&scene).await?;
                    self.outcome.scenes_processed += 1;
                }
            }
        }

        self.outcome.token_fallback = self.counter.using_fallback();
        Ok(self.outcome.clone())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Per-scene protocol
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn process_scene(&mut self, scene: &Scene) -> Result<()> {
        let thread_id = scene.thread_id;
        let scene_index = scene.scene_index;
        tracing::info!(
            thread_id,
            scene = scene_index,
            posts = scene.posts.len(),
            first_post = scene.first_post_id(),
            thread_end = scene.is_thread_end,
            "processing scene"
        );

        // ── COMPACTING ───────────────────────────────────────────
        self.comp_state.begin_scene(thread_id, scene_index);
        let tokens = self.compactor.measure(&self.ctx).await;
        self.last_tokens = tokens;
        if self.compactor.over_soft(tokens) {
            match self.compactor.compact(&mut self.ctx, &mut self.comp_state).await {
                Ok(outcome) => {
                    self.last_tokens = outcome.tokens_after;
                    if outcome.could_not_compact {
                        tracing::warn!(
                            tokens = outcome.tokens_after,
                            "compactor could not make progress; continuing anyway"
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "compaction failed; continuing with full history");
                }
            }
        }

        // ── PREPARING ────────────────────────────────────────────
        let scene_text = scene.render_text();
        let candidates = match self.candidate_entries(&scene_text) {
            Ok(candidates) => candidates,
            Err(e) => return Err(self.halt(e)),
        };
        self.dispatcher.set_position(scene.last_post_id(), thread_id);

        let scene_input = SceneInput {
            thread_id,
            scene_index,
            text: &scene_text,
            candidate_entries: &candidates,
        };
        let mut messages = self.ctx.build_messages(Some(&scene_input));
        let tools = ToolDispatcher::definitions();

        // ── CALLING / TOOL_EXEC loop ─────────────────────────────
        // Turns are buffered and recorded only after the scene
        // completes, so a crash mid-scene leaves the context clean and
        // the scene is redone whole.
        let mut pending: Vec<(Role, String, Option<String>, Vec<ToolCall>)> = Vec::new();
        let mut final_text = String::new();

        for loop_idx in 0..self.config.runner.max_tool_loops {
            let req = ChatRequest {
                messages: messages.clone(),
                tools: tools.clone(),
                temperature: Some(self.config.agent.temperature),
                max_tokens: Some(self.config.agent.max_tokens),
                model: self.config.agent.model.clone(),
            };
            let resp = match call_with_retry(&self.client, &req, self.config.agent.max_retries)
                .await
            {
                Ok(resp) => resp,
                Err(e) => return Err(self.halt(e)),
            };

            if resp.tool_calls.is_empty() {
                final_text = resp.content;
                break;
            }

            // ── PROCESSING: route tool calls in emission order ───
            messages.push(Message::assistant_with_tool_calls(
                &resp.content,
                &resp.tool_calls,
            ));
            pending.push((
                Role::Assistant,
                resp.content.clone(),
                None,
                resp.tool_calls.clone(),
            ));
            for call in &resp.tool_calls {
                let (result, is_error) = match self.dispatcher.dispatch(call).await {
                    Ok(r) => r,
                    Err(e) => return Err(self.halt(e)),
                };
                if is_error {
                    tracing::warn!(tool = %call.tool_name, result = %result, "tool error result");
                }
                messages.push(Message::tool_result(&call.call_id, &result));
                pending.push((Role::Tool, result, Some(call.call_id.clone()), vec![]));
            }

            if loop_idx + 1 == self.config.runner.max_tool_loops {
                tracing::warn!(
                    limit = self.config.runner.max_tool_loops,
                    "tool loop limit reached; cutting the scene off"
                );
                final_text = resp.content;
            }
        }

        // ── PARSING: apply any <codex_updates> payload ───────────
        for update in parse_codex_updates(&final_text) {
            let call = update_to_tool_call(update);
            let (result, is_error) = match self.dispatcher.dispatch(&call).await {
                Ok(r) => r,
                Err(e) => return Err(self.halt(e)),
            };
            if is_error {
                tracing::warn!(result = %result, "codex_updates element rejected");
            }
        }

        // ── RECORDING ────────────────────────────────────────────
        let scene_block = format!(
            "<current_scene thread=\"{}\" scene=\"{}\">\n{}\n</current_scene>",
            thread_id, scene_index, scene_text
        );
        self.ctx.record_turn(
            Role::User,
            scene_block,
            None,
            vec![],
            Some(thread_id),
            Some(scene_index),
        );
        for (role, content, tool_call_id, tool_calls) in pending {
            self.ctx.record_turn(
                role,
                content,
                tool_call_id,
                tool_calls,
                Some(thread_id),
                Some(scene_index),
            );
        }
        if !final_text.is_empty() {
            self.ctx.record_turn(
                Role::Assistant,
                final_text,
                None,
                vec![],
                Some(thread_id),
                Some(scene_index),
            );
        }

        // Entry provenance for chunk summaries and counters.
        let events = self.dispatcher.take_entry_events();
        let touched: Vec<i64> = events
            .iter()
            .filter(|e| !matches!(e, EntryEvent::Deleted(_)))
            .map(|e| e.entry_id())
            .collect();
        self.comp_state.note_entries(thread_id, scene_index, &touched);
        for event in &events {
            match event {
                EntryEvent::Created(_) => {
                    self.run_state.entries_created += 1;
                    self.outcome.entries_created += 1;
                }
                EntryEvent::Updated(_) => {
                    self.run_state.entries_updated += 1;
                    self.outcome.entries_updated += 1;
                }
                EntryEvent::Deleted(_) => {}
            }
        }

        // Advance the in-memory cursor; it persists at the next
        // checkpoint or run-state write below.
        self.run_state.last_post_id = scene.last_post_id();
        self.run_state.last_thread_id = thread_id;
        self.run_state.posts_processed += scene.posts.len() as u64;
        self.run_state.scenes_processed += 1;
        self.run_state.updated_at = Utc::now();

        let written = self
            .store
            .lock()
            .write_thread_state(&ThreadState {
                thread_id,
                scenes_emitted: scene_index + 1,
                completed: scene.is_thread_end,
            })
            .map_err(storage);
        if let Err(e) = written {
            return Err(self.halt(e));
        }

        // ── BOUNDARY? / CURATING / CHECKPOINT ────────────────────
        if scene.is_thread_end {
            let curated = curator::curate_thread(
                &self.client,
                &self.store,
                &self.corpus,
                &self.ctx,
                thread_id,
                scene_index,
                scene.last_post_id(),
                self.config.agent.max_retries,
            )
            .await;
            // Transient agent exhaustion and storage failures both get
            // the checkpoint-if-possible treatment.
            if let Err(e) = curated {
                return Err(self.halt(e));
            }
            self.comp_state.complete_thread(thread_id);
            self.checkpoint()?;
            self.scenes_since_checkpoint = 0;
        } else {
            self.scenes_since_checkpoint += 1;
            if self.scenes_since_checkpoint >= self.config.runner.checkpoint_every_scenes {
                self.checkpoint()?;
                self.scenes_since_checkpoint = 0;
            } else {
                let written = self
                    .store
                    .lock()
                    .write_run_state(&self.run_state)
                    .map_err(storage);
                if let Err(e) = written {
                    return Err(self.halt(e));
                }
            }
        }

        Ok(())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Helpers
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Retrieve candidate glossary entries by searching on the scene's
    /// salient words (capitalized first).
    fn candidate_entries(&self, scene_text: &str) -> Result<String> {
        let mut capitalized: Vec<String> = Vec::new();
        let mut rest: Vec<String> = Vec::new();
        for m in self.word_re.find_iter(scene_text) {
            let word = m.as_str();
            let lower = word.to_lowercase();
            if capitalized.contains(&lower) || rest.contains(&lower) {
                continue;
            }
            if word.chars().next().is_some_and(|c| c.is_uppercase()) {
                capitalized.push(lower);
            } else {
                rest.push(lower);
            }
        }
        capitalized.extend(rest);
        capitalized.truncate(24);
        if capitalized.is_empty() {
            return Ok(String::new());
        }

        let query = capitalized.join(" ");
        let entries = self
            .store
            .lock()
            .search_entries(
                &query,
                &qc_store::SearchFilter {
                    tags: vec![],
                    status: qc_store::StatusFilter::All,
                    limit: self.config.context.candidate_limit,
                },
            )
            .map_err(storage)?;

        let mut out = String::new();
        for entry in &entries {
            let definition: String = entry.definition.chars().take(200).collect();
            out.push_str(&format!(
                "entry {} \"{}\" [{}]: {}\n",
                entry.id,
                entry.term,
                entry.status.as_str(),
                definition
            ));
        }
        out.truncate(out.trim_end().len());
        Ok(out)
    }

    /// Write a checkpoint snapshot and the run-state advance in one
    /// transaction.
    fn checkpoint(&mut self) -> Result<i64> {
        let context_json = self.ctx.to_json()?;
        let mut store = self.store.lock();
        let entry_states = store.current_entry_states().map_err(storage)?;
        let args = CheckpointArgs {
            kind: SnapshotKind::Checkpoint,
            last_post_id: self.run_state.last_post_id,
            last_thread_id: self.run_state.last_thread_id,
            thread_position: self.comp_state.current_scene,
            token_count: self.last_tokens,
            context_json,
        };
        let snapshot_id = store
            .checkpoint(&args, &entry_states, &self.run_state)
            .map_err(storage)?;
        self.run_state.current_snapshot_id = Some(snapshot_id);
        Ok(snapshot_id)
    }

    /// Fatal failure: checkpoint what we have (best effort) and hand
    /// the error back for exit-code mapping. Agent exhaustion exits 1,
    /// storage failures exit 2; both get the same last-chance
    /// checkpoint so a restart resumes at this scene.
    fn halt(&mut self, e: Error) -> Error {
        match &e {
            Error::Storage(_) | Error::Io(_) => {
                tracing::error!(error = %e, "storage failure; halting")
            }
            _ => tracing::error!(error = %e, "agent unavailable after retries; halting"),
        }
        if let Err(cp) = self.checkpoint() {
            tracing::error!(error = %cp, "final checkpoint failed");
        }
        e
    }
}

fn update_to_tool_call(update: CodexUpdate) -> ToolCall {
    match update {
        CodexUpdate::Create {
            term,
            definition,
            tags,
            status,
        } => ToolCall {
            call_id: "codex_updates".into(),
            tool_name: "glossary_create".into(),
            arguments: serde_json::json!({
                "term": term,
                "definition": definition,
                "tags": tags,
                "status": status.map(|s| s.as_str()),
            }),
        },
        CodexUpdate::Update {
            entry_id,
            field,
            value,
        } => {
            let mut arguments = serde_json::json!({ "entry_id": entry_id });
            let key = match field {
                UpdateField::Term => "term",
                UpdateField::Definition => "definition",
                UpdateField::Status => "status",
                UpdateField::Tags => "tags",
            };
            arguments[key] = match field {
                UpdateField::Tags => serde_json::json!(value
                    .split(',')
                    .map(|t| t.trim())
                    .filter(|t| !t.is_empty())
                    .collect::<Vec<_>>()),
                _ => serde_json::json!(value),
            };
            ToolCall {
                call_id: "codex_updates".into(),
                tool_name: "glossary_update".into(),
                arguments,
            }
        }
    }
}

fn storage(e: qc_store::StoreError) -> Error {
    Error::Storage(e.to_string())
}

fn corpus_storage(e: qc_corpus::reader::CorpusError) -> Error {
    Error::Storage(e.to_string())
}
