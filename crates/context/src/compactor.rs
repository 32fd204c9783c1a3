//! Tiered rolling compaction.
//!
//! One `compact` call loops until the context fits the target, no tier
//! can act, or a whole pass fails to shrink the token count (the
//! doom-loop guard). Tier order within a pass:
//!
//! - 0.5 intra-thread chunk summarization (with a partial-chunk
//!   fallback for long-running threads),
//! - 1   whole-thread summarization, eagerly merged into the
//!   cumulative summary (gated at `thread_ratio`),
//! - 3/4 emergency: strip old reasoning blocks, truncate old assistant
//!   responses (gated at `emergency_ratio`).
//!
//! All mutations land on the backing `AnnotationContext`; callers
//! rebuild outgoing messages from it, so the two views cannot diverge.

use std::collections::BTreeMap;
use std::sync::Arc;

use qc_domain::config::CompactionConfig;
use qc_domain::error::Result;

use crate::context::{AnnotationContext, ChunkSummary, ThreadSummary};
use crate::summarize::Summarizer;
use crate::tokens::TokenCounter;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State carried across invocations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Bookkeeping the compactor needs beyond what the context itself
/// stores: where the current thread's unsummarized span begins, chunk
/// numbering, completed threads still occupying history, and which
/// entries each scene touched (chunk provenance).
#[derive(Debug, Default)]
pub struct CompactorState {
    pub current_thread: Option<i64>,
    /// Scene index currently being processed; scenes strictly before it
    /// are complete.
    pub current_scene: u32,
    /// First scene of the current thread not yet covered by a summary.
    pub next_unsummarized_scene: u32,
    /// Next non-negative chunk index for the current thread.
    pub next_chunk_index: i32,
    /// Next negative index for partial-chunk summaries (-1, -2, …).
    pub next_partial_index: i32,
    /// Completed threads whose turns are still in history, oldest
    /// first, with the entry ids they touched.
    pub completed_threads: Vec<(i64, Vec<i64>)>,
    entries_touched: BTreeMap<(i64, u32), Vec<i64>>,
}

impl CompactorState {
    pub fn new() -> Self {
        Self {
            next_partial_index: -1,
            ..Default::default()
        }
    }

    /// Point the per-thread cursors at a new scene. Entering a new
    /// thread resets chunk bookkeeping.
    pub fn begin_scene(&mut self, thread_id: i64, scene_index: u32) {
        if self.current_thread != Some(thread_id) {
            self.current_thread = Some(thread_id);
            self.next_unsummarized_scene = 0;
            self.next_chunk_index = 0;
            self.next_partial_index = -1;
        }
        self.current_scene = scene_index;
    }

    /// Record which entries a scene created or updated.
    pub fn note_entries(&mut self, thread_id: i64, scene_index: u32, ids: &[i64]) {
        if ids.is_empty() {
            return;
        }
        self.entries_touched
            .entry((thread_id, scene_index))
            .or_default()
            .extend(ids.iter().copied());
    }

    /// Mark a thread as done; its turns stay in history until the
    /// thread tier claims them.
    pub fn complete_thread(&mut self, thread_id: i64) {
        let ids = self.entry_ids_for_thread(thread_id);
        self.completed_threads.push((thread_id, ids));
        if self.current_thread == Some(thread_id) {
            self.current_thread = None;
        }
    }

    fn entry_ids_in_range(&self, thread_id: i64, first: u32, last: u32) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .entries_touched
            .range((thread_id, first)..=(thread_id, last))
            .flat_map(|(_, v)| v.iter().copied())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    fn entry_ids_for_thread(&self, thread_id: i64) -> Vec<i64> {
        self.entry_ids_in_range(thread_id, 0, u32::MAX)
    }

    fn forget_thread(&mut self, thread_id: i64) {
        self.entries_touched
            .retain(|(t, _), _| *t != thread_id);
    }

    /// Rebuild per-thread cursors from a rehydrated context (resume
    /// path). Completed threads are inferred from turn tags; their
    /// entry ids come from the surviving chunk summaries.
    pub fn rehydrate(ctx: &AnnotationContext, current_thread: Option<i64>, current_scene: u32) -> Self {
        let mut state = Self::new();
        state.current_thread = current_thread;
        state.current_scene = current_scene;

        if let Some(thread_id) = current_thread {
            for chunk in ctx
                .chunk_summaries
                .iter()
                .filter(|c| c.thread_id == thread_id)
            {
                state.next_unsummarized_scene =
                    state.next_unsummarized_scene.max(chunk.last_scene + 1);
                if chunk.chunk_index >= 0 {
                    state.next_chunk_index = state.next_chunk_index.max(chunk.chunk_index + 1);
                } else {
                    state.next_partial_index = state.next_partial_index.min(chunk.chunk_index - 1);
                }
            }
        }

        let mut seen: Vec<i64> = Vec::new();
        for turn in ctx.turns() {
            if let Some(thread_id) = turn.thread_id {
                if Some(thread_id) != current_thread && !seen.contains(&thread_id) {
                    seen.push(thread_id);
                }
            }
        }
        for thread_id in seen {
            let ids: Vec<i64> = ctx
                .chunk_summaries
                .iter()
                .filter(|c| c.thread_id == thread_id)
                .flat_map(|c| c.entry_ids.iter().copied())
                .collect();
            state.completed_threads.push((thread_id, ids));
        }
        state
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default)]
pub struct CompactionOutcome {
    pub tokens_before: u32,
    pub tokens_after: u32,
    pub chunks_summarized: u32,
    pub threads_summarized: u32,
    pub thinking_trimmed: bool,
    pub responses_truncated: bool,
    /// Set when only the doom-loop guard ended the loop.
    pub could_not_compact: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Compactor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Compactor {
    summarizer: Arc<dyn Summarizer>,
    counter: Arc<TokenCounter>,
    config: CompactionConfig,
    budget: u32,
    verify_ratio: f32,
    think_re: regex::Regex,
}

impl Compactor {
    pub fn new(
        summarizer: Arc<dyn Summarizer>,
        counter: Arc<TokenCounter>,
        config: CompactionConfig,
        budget: u32,
        verify_ratio: f32,
    ) -> Self {
        Self {
            summarizer,
            counter,
            config,
            budget,
            verify_ratio,
            think_re: regex::Regex::new(r"(?s)<think>.*?</think>\s*")
                .expect("static regex"),
        }
    }

    fn threshold(&self, ratio: f32) -> u32 {
        (self.budget as f32 * ratio) as u32
    }

    /// Whether the runner should consult `compact` at all.
    pub fn over_soft(&self, tokens: u32) -> bool {
        tokens > self.threshold(self.config.soft_ratio)
    }

    /// Measure the context. Below the verify ratio the cheap estimate
    /// is trusted; above it the tokenize endpoint cross-checks.
    pub async fn measure(&self, ctx: &AnnotationContext) -> u32 {
        let messages = ctx.build_messages(None);
        let estimate = self.counter.estimate_messages(&messages);
        if (estimate as f32) < self.budget as f32 * self.verify_ratio {
            estimate
        } else {
            self.counter.count_messages(&messages).await
        }
    }

    /// Run the tiered loop until the context fits (or nothing helps).
    pub async fn compact(
        &self,
        ctx: &mut AnnotationContext,
        state: &mut CompactorState,
    ) -> Result<CompactionOutcome> {
        let target = self.threshold(self.config.target_ratio);
        let mut outcome = CompactionOutcome::default();
        let mut tokens = self.measure(ctx).await;
        outcome.tokens_before = tokens;

        while tokens > target {
            let progressed = self.run_one_tier(ctx, state, tokens, &mut outcome).await?;
            if !progressed {
                if tokens > target {
                    outcome.could_not_compact = true;
                    tracing::warn!(
                        tokens,
                        target,
                        "compaction exhausted every tier while still over target"
                    );
                }
                break;
            }
            let measured = self.measure(ctx).await;
            if measured >= tokens {
                outcome.could_not_compact = true;
                tracing::warn!(
                    before = tokens,
                    after = measured,
                    "compaction pass failed to shrink the context"
                );
                tokens = measured;
                break;
            }
            tokens = measured;
        }

        outcome.tokens_after = tokens;
        if outcome.chunks_summarized > 0 || outcome.threads_summarized > 0 {
            tracing::info!(
                tokens_before = outcome.tokens_before,
                tokens_after = outcome.tokens_after,
                chunks = outcome.chunks_summarized,
                threads = outcome.threads_summarized,
                "context compacted"
            );
        }
        Ok(outcome)
    }

    /// Apply the first tier that can act. Returns whether any did.
    async fn run_one_tier(
        &self,
        ctx: &mut AnnotationContext,
        state: &mut CompactorState,
        tokens: u32,
        outcome: &mut CompactionOutcome,
    ) -> Result<bool> {
        // ── Tier 0.5: full chunk, preserving recent chunks when we can ──
        if let Some(thread_id) = state.current_thread {
            let span = state.current_scene.saturating_sub(state.next_unsummarized_scene);
            let available = span / self.config.chunk_scenes;
            for preserve in [2u32, 1, 0] {
                if available >= preserve + 1 {
                    self.summarize_chunk(ctx, state, thread_id, self.config.chunk_scenes, false)
                        .await?;
                    outcome.chunks_summarized += 1;
                    return Ok(true);
                }
            }

            // ── Partial-chunk fallback ────────────────────────────
            if available == 0 && span >= self.config.min_partial_scenes {
                let half = (span / 2).max(1);
                self.summarize_chunk(ctx, state, thread_id, half, true).await?;
                outcome.chunks_summarized += 1;
                return Ok(true);
            }
        }

        // ── Tier 1: oldest completed thread → cumulative ─────────
        if tokens >= self.threshold(self.config.thread_ratio) && state.completed_threads.len() > 1 {
            self.summarize_thread(ctx, state).await?;
            outcome.threads_summarized += 1;
            return Ok(true);
        }

        // ── Emergency tiers ──────────────────────────────────────
        if tokens >= self.threshold(self.config.emergency_ratio) {
            if !outcome.thinking_trimmed {
                let changed =
                    ctx.strip_thinking_blocks(self.config.keep_recent_thinking, &self.think_re);
                if changed > 0 {
                    outcome.thinking_trimmed = true;
                    return Ok(true);
                }
            }
            let changed = ctx
                .truncate_old_responses(self.config.truncate_after_turns, self.config.truncate_len);
            if changed > 0 {
                outcome.responses_truncated = true;
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Summarize `scene_count` scenes starting at the unsummarized
    /// cursor, record the summary, and drop the covered turns.
    async fn summarize_chunk(
        &self,
        ctx: &mut AnnotationContext,
        state: &mut CompactorState,
        thread_id: i64,
        scene_count: u32,
        partial: bool,
    ) -> Result<()> {
        let first = state.next_unsummarized_scene;
        let last = first + scene_count - 1;
        let turns = ctx.chunk_turns(thread_id, first, last);
        let entry_ids = state.entry_ids_in_range(thread_id, first, last);

        let text = self
            .summarizer
            .summarize_chunk(&turns, thread_id, first, last, &entry_ids)
            .await?;

        let chunk_index = if partial {
            let idx = state.next_partial_index;
            state.next_partial_index -= 1;
            idx
        } else {
            let idx = state.next_chunk_index;
            state.next_chunk_index += 1;
            idx
        };

        ctx.chunk_summaries.push(ChunkSummary {
            thread_id,
            chunk_index,
            first_scene: first,
            last_scene: last,
            text,
            entry_ids,
        });
        let removed = ctx.remove_chunk_turns(thread_id, first, last);
        state.next_unsummarized_scene = last + 1;
        tracing::debug!(
            thread_id,
            chunk_index,
            scenes = %format!("{first}-{last}"),
            turns_removed = removed,
            partial,
            "chunk summarized"
        );
        Ok(())
    }

    /// Summarize the oldest completed thread, fold it into the
    /// cumulative summary, and drop its turns and chunk summaries.
    async fn summarize_thread(
        &self,
        ctx: &mut AnnotationContext,
        state: &mut CompactorState,
    ) -> Result<()> {
        let (thread_id, mut entry_ids) = state.completed_threads.remove(0);
        let turns = ctx.thread_turns(thread_id);

        // Chunk summaries of this thread are subsumed by the thread
        // summary; fold their provenance in before dropping them.
        for chunk in ctx
            .chunk_summaries
            .iter()
            .filter(|c| c.thread_id == thread_id)
        {
            entry_ids.extend(chunk.entry_ids.iter().copied());
        }
        entry_ids.sort();
        entry_ids.dedup();

        let text = self
            .summarizer
            .summarize_thread(&turns, thread_id, &entry_ids)
            .await?;

        let position = ctx.thread_summaries.len() as u32;
        ctx.thread_summaries.push(ThreadSummary {
            thread_id,
            position,
            text: text.clone(),
            entry_ids,
        });

        // Eager merge: the pending list never outlives this call.
        let merged = self
            .summarizer
            .merge_into_cumulative(ctx.cumulative_summary.as_deref(), &text)
            .await?;
        ctx.cumulative_summary = Some(merged);
        ctx.thread_summaries.pop();

        let removed = ctx.remove_thread_turns(thread_id);
        ctx.chunk_summaries.retain(|c| c.thread_id != thread_id);
        state.forget_thread(thread_id);
        tracing::debug!(thread_id, turns_removed = removed, "thread folded into cumulative summary");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qc_domain::chat::Role;
    use qc_domain::error::{Error, Result as DomainResult};
    use qc_providers::{ChatRequest, ChatResponse, LlmClient};

    /// Deterministic summarizer: concatenation with a marker, so tests
    /// assert structure rather than prose.
    struct StubSummarizer;

    #[async_trait::async_trait]
    impl Summarizer for StubSummarizer {
        async fn summarize_thread(
            &self,
            _turns: &[crate::context::Turn],
            thread_id: i64,
            entry_ids: &[i64],
        ) -> DomainResult<String> {
            Ok(format!("[thread {thread_id} summary; entries {entry_ids:?}]"))
        }

        async fn summarize_chunk(
            &self,
            _turns: &[crate::context::Turn],
            thread_id: i64,
            first_scene: u32,
            last_scene: u32,
            entry_ids: &[i64],
        ) -> DomainResult<String> {
            Ok(format!(
                "[chunk {thread_id}:{first_scene}-{last_scene}; entries {entry_ids:?}]"
            ))
        }

        async fn merge_into_cumulative(
            &self,
            old: Option<&str>,
            new_text: &str,
        ) -> DomainResult<String> {
            Ok(match old {
                Some(old) => format!("{old} + {new_text}"),
                None => new_text.to_string(),
            })
        }
    }

    /// Never reachable: the estimate path is always below the verify
    /// ratio in these tests.
    struct NoTokenize;

    #[async_trait::async_trait]
    impl LlmClient for NoTokenize {
        async fn chat(&self, _req: &ChatRequest) -> DomainResult<ChatResponse> {
            Err(Error::Agent("no chat in compactor tests".into()))
        }
        async fn tokenize(&self, _text: &str) -> DomainResult<Vec<u32>> {
            Err(Error::Http("tokenize offline".into()))
        }
        fn client_id(&self) -> &str {
            "no_tokenize"
        }
    }

    fn compactor(budget: u32) -> Compactor {
        let counter = Arc::new(TokenCounter::new(Arc::new(NoTokenize), 4.0, 4));
        Compactor::new(
            Arc::new(StubSummarizer),
            counter,
            CompactionConfig::default(),
            budget,
            0.60,
        )
    }

    /// Two heavyweight completed threads plus a current thread with one
    /// complete chunk. Sized so chunk compaction alone leaves usage
    /// above the thread-tier gate of a 1000-token budget, forcing both
    /// tiers to act.
    fn overflowing_context() -> (AnnotationContext, CompactorState) {
        let mut ctx = AnnotationContext::new("system");
        let mut state = CompactorState::new();
        let heavy = "lorem ipsum dolor sit amet ".repeat(7);
        let light = "word ".repeat(10);

        for thread_id in [1i64, 2] {
            for scene in 0..4u32 {
                state.begin_scene(thread_id, scene);
                ctx.record_turn(Role::User, format!("scene {heavy}"), None, vec![], Some(thread_id), Some(scene));
                ctx.record_turn(Role::Assistant, format!("noted {heavy}"), None, vec![], Some(thread_id), Some(scene));
            }
            state.note_entries(thread_id, 0, &[thread_id * 10]);
            state.complete_thread(thread_id);
        }

        // 8 complete scenes (one full chunk) + the in-progress ninth.
        for scene in 0..9u32 {
            state.begin_scene(3, scene);
            ctx.record_turn(Role::User, format!("s{scene} {light}"), None, vec![], Some(3), Some(scene));
            state.note_entries(3, scene, &[100 + scene as i64]);
        }

        (ctx, state)
    }

    #[tokio::test]
    async fn compaction_reaches_target_and_grows_summaries() {
        let compactor = compactor(1000);
        let (mut ctx, mut state) = overflowing_context();
        let turns_before = ctx.turn_count();
        let messages_before = ctx.build_messages(None).len();

        let outcome = compactor.compact(&mut ctx, &mut state).await.unwrap();

        assert!(outcome.tokens_before > 700);
        assert!(
            outcome.tokens_after < 700,
            "tokens_after = {}",
            outcome.tokens_after
        );
        assert!(outcome.tokens_after <= outcome.tokens_before);
        assert!(outcome.chunks_summarized >= 1);
        assert!(outcome.threads_summarized >= 1);
        assert!(!outcome.could_not_compact);

        assert!(!ctx.chunk_summaries.is_empty());
        assert!(ctx.cumulative_summary.is_some());
        assert!(ctx.turn_count() < turns_before);
        assert!(ctx.build_messages(None).len() < messages_before);

        // Remaining turns still carry coherent tags.
        for turn in ctx.turns() {
            assert!(turn.thread_id.is_some());
            assert!(turn.scene_index.is_some());
        }
        // Pending thread summaries never persist (eager merge).
        assert!(ctx.thread_summaries.is_empty());
    }

    #[tokio::test]
    async fn chunk_summaries_cover_oldest_scenes_first() {
        let compactor = compactor(1000);
        let (mut ctx, mut state) = overflowing_context();
        compactor.compact(&mut ctx, &mut state).await.unwrap();

        let thread3: Vec<_> = ctx
            .chunk_summaries
            .iter()
            .filter(|c| c.thread_id == 3)
            .collect();
        assert!(!thread3.is_empty());
        assert_eq!(thread3[0].chunk_index, 0);
        assert_eq!(thread3[0].first_scene, 0);
        // Entry provenance followed the chunk.
        assert!(thread3[0].entry_ids.contains(&100));
        // Covered turns are gone from history.
        assert!(ctx
            .turns()
            .all(|t| t.thread_id != Some(3) || t.scene_index.unwrap() > thread3[0].last_scene));
    }

    #[tokio::test]
    async fn thread_tier_keeps_most_recent_completed_thread() {
        let compactor = compactor(1000);
        let (mut ctx, mut state) = overflowing_context();
        compactor.compact(&mut ctx, &mut state).await.unwrap();

        // Oldest thread (1) went first; once under target the loop
        // stops, so thread 2 may survive in history.
        let cumulative = ctx.cumulative_summary.clone().unwrap();
        assert!(cumulative.contains("thread 1 summary"));
        assert!(state.completed_threads.iter().all(|(t, _)| *t != 1));
    }

    #[tokio::test]
    async fn partial_chunk_fallback_uses_negative_indices() {
        let compactor = compactor(200);
        let mut ctx = AnnotationContext::new("system");
        let mut state = CompactorState::new();
        let pad = "word ".repeat(40);
        // 6 in-progress scenes: not a full chunk, but enough for the
        // partial fallback.
        for scene in 0..6u32 {
            state.begin_scene(1, scene);
            ctx.record_turn(Role::User, format!("{pad}"), None, vec![], Some(1), Some(scene));
        }
        state.begin_scene(1, 6);

        let outcome = compactor.compact(&mut ctx, &mut state).await.unwrap();
        assert!(outcome.chunks_summarized >= 1);
        let partial = ctx
            .chunk_summaries
            .iter()
            .find(|c| c.chunk_index < 0)
            .expect("partial summary present");
        assert_eq!(partial.chunk_index, -1);
        assert_eq!(partial.first_scene, 0);
        assert_eq!(partial.last_scene, 2);
    }

    #[tokio::test]
    async fn guard_fires_when_nothing_can_move() {
        let compactor = compactor(100);
        let mut ctx = AnnotationContext::new("system");
        let mut state = CompactorState::new();
        // One enormous current-scene turn: no complete chunk, not
        // enough scenes for a partial, no completed threads.
        state.begin_scene(1, 0);
        ctx.record_turn(
            Role::User,
            "word ".repeat(200),
            None,
            vec![],
            Some(1),
            Some(0),
        );

        let outcome = compactor.compact(&mut ctx, &mut state).await.unwrap();
        assert!(outcome.could_not_compact);
        assert_eq!(outcome.chunks_summarized, 0);
        // Token count never increased.
        assert!(outcome.tokens_after <= outcome.tokens_before);
    }

    #[tokio::test]
    async fn emergency_tiers_trim_thinking_then_truncate() {
        let counter = Arc::new(TokenCounter::new(Arc::new(NoTokenize), 4.0, 4));
        let config = CompactionConfig {
            emergency_ratio: 0.10,
            thread_ratio: 0.09,
            soft_ratio: 0.05,
            target_ratio: 0.06,
            ..Default::default()
        };
        let compactor = Compactor::new(Arc::new(StubSummarizer), counter, config, 1000, 0.60);

        let mut ctx = AnnotationContext::new("system");
        let mut state = CompactorState::new();
        state.begin_scene(1, 0);
        for i in 0..10u32 {
            ctx.record_turn(
                Role::Assistant,
                format!("<think>{}</think>reply {i} {}", "x".repeat(80), "y".repeat(700)),
                None,
                vec![],
                Some(1),
                Some(0),
            );
        }

        let outcome = compactor.compact(&mut ctx, &mut state).await.unwrap();
        assert!(outcome.thinking_trimmed);
        assert!(outcome.responses_truncated);
        let first = ctx.turns().next().unwrap();
        assert!(!first.content.contains("<think>"));
        assert!(first.content.ends_with(crate::context::TRUNCATION_MARKER));
    }

    #[test]
    fn rehydrate_recovers_cursors_from_summaries() {
        let mut ctx = AnnotationContext::new("system");
        ctx.chunk_summaries.push(ChunkSummary {
            thread_id: 3,
            chunk_index: 0,
            first_scene: 0,
            last_scene: 7,
            text: "c0".into(),
            entry_ids: vec![5],
        });
        ctx.chunk_summaries.push(ChunkSummary {
            thread_id: 3,
            chunk_index: 1,
            first_scene: 8,
            last_scene: 15,
            text: "c1".into(),
            entry_ids: vec![],
        });
        ctx.record_turn(Role::User, "old thread", None, vec![], Some(2), Some(0));
        ctx.record_turn(Role::User, "current", None, vec![], Some(3), Some(16));

        let state = CompactorState::rehydrate(&ctx, Some(3), 17);
        assert_eq!(state.next_unsummarized_scene, 16);
        assert_eq!(state.next_chunk_index, 2);
        assert_eq!(state.completed_threads, vec![(2, vec![])]);
    }
}
