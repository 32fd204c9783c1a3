//! The curator pass.
//!
//! At every thread boundary the runner forks the live context, swaps in
//! the curator system prompt, and walks the tentative entries born in
//! the closing thread. Each entry is shown with its first-appearance
//! posts and nearest codex neighbours; the curator answers with one of
//! CONFIRM / REJECT / REVISE / MERGE, applied against the main store in
//! receipt order. The fork is discarded unconditionally.

use std::sync::Arc;

use parking_lot::Mutex;

use qc_context::AnnotationContext;
use qc_corpus::CorpusReader;
use qc_domain::chat::Role;
use qc_domain::error::{Error, Result};
use qc_domain::glossary::{EntryPatch, EntryStatus, GlossaryEntry};
use qc_domain::snapshot::SnapshotKind;
use qc_providers::{ChatRequest, LlmClient};
use qc_store::{AnnotatorDb, CheckpointArgs, SearchFilter, StoreError};

use crate::prompts::CURATOR_SYSTEM_PROMPT;

use super::call_with_retry;

/// Posts shown either side of an entry's first appearance.
const EVIDENCE_WINDOW: u32 = 3;
/// Near-neighbour entries shown per curation target.
const NEIGHBOR_LIMIT: usize = 5;

#[derive(Debug, Clone, Default)]
pub struct CuratorReport {
    pub reviewed: u32,
    pub confirmed: u32,
    pub rejected: u32,
    pub revised: u32,
    pub merged: u32,
    pub unparsed: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CuratorDecision {
    Confirm,
    Reject(String),
    Revise(String),
    Merge(i64),
}

/// Parse the first decision line of a curator reply.
pub fn parse_decision(text: &str) -> Option<CuratorDecision> {
    let mut lines = text.lines().skip_while(|l| l.trim().is_empty());
    let first = lines.next()?.trim();

    // "REJECTED" must not parse as REJECT: the keyword has to stand
    // alone or be followed by whitespace.
    let after_keyword = |kw: &str| -> Option<String> {
        if first == kw {
            Some(String::new())
        } else {
            first
                .strip_prefix(kw)
                .filter(|rest| rest.starts_with(char::is_whitespace))
                .map(|rest| rest.trim().to_string())
        }
    };

    if after_keyword("CONFIRM").is_some() {
        return Some(CuratorDecision::Confirm);
    }
    if let Some(reason) = after_keyword("REJECT") {
        return Some(CuratorDecision::Reject(if reason.is_empty() {
            "rejected by curator".into()
        } else {
            reason
        }));
    }
    if let Some(rest) = after_keyword("REVISE") {
        // The replacement definition may continue on following lines.
        let mut definition = rest;
        for line in lines {
            if !definition.is_empty() {
                definition.push('\n');
            }
            definition.push_str(line);
        }
        let definition = definition.trim().to_string();
        if definition.is_empty() {
            return None;
        }
        return Some(CuratorDecision::Revise(definition));
    }
    if let Some(rest) = after_keyword("MERGE") {
        return rest
            .trim_start_matches('#')
            .parse::<i64>()
            .ok()
            .map(CuratorDecision::Merge);
    }
    None
}

/// Run the curator over a freshly closed thread.
pub async fn curate_thread(
    client: &Arc<dyn LlmClient>,
    store: &Arc<Mutex<AnnotatorDb>>,
    corpus: &Arc<Mutex<CorpusReader>>,
    ctx: &AnnotationContext,
    thread_id: i64,
    thread_position: u32,
    last_post_id: i64,
    max_retries: u32,
) -> Result<CuratorReport> {
    let mut report = CuratorReport::default();

    let tentative = store
        .lock()
        .tentative_in_thread(thread_id)
        .map_err(storage)?;
    if tentative.is_empty() {
        tracing::debug!(thread_id, "no tentative entries to curate");
        return Ok(report);
    }

    let mut fork = ctx.clone();
    fork.system_prompt = CURATOR_SYSTEM_PROMPT.to_string();

    // Record the fork itself so summons can revisit the curation state.
    {
        let mut store = store.lock();
        let entry_states = store.current_entry_states().map_err(storage)?;
        let args = CheckpointArgs {
            kind: SnapshotKind::CuratorFork,
            last_post_id,
            last_thread_id: thread_id,
            thread_position,
            token_count: 0,
            context_json: fork.to_json()?,
        };
        store.save_snapshot(&args, &entry_states).map_err(storage)?;
    }

    tracing::info!(thread_id, entries = tentative.len(), "curating thread");

    for entry in &tentative {
        let evidence = build_evidence(store, corpus, entry)?;
        fork.record_turn(Role::User, evidence, None, vec![], Some(thread_id), None);

        let req = ChatRequest {
            messages: fork.build_messages(None),
            tools: vec![],
            temperature: Some(0.2),
            max_tokens: Some(768),
            model: None,
        };
        let resp = call_with_retry(client, &req, max_retries).await?;
        fork.record_turn(
            Role::Assistant,
            &resp.content,
            None,
            vec![],
            Some(thread_id),
            None,
        );

        report.reviewed += 1;
        match parse_decision(&resp.content) {
            Some(decision) => {
                apply_decision(store, entry, &decision, last_post_id, thread_id, &mut report)?
            }
            None => {
                report.unparsed += 1;
                tracing::warn!(
                    entry_id = entry.id,
                    term = %entry.term,
                    "curator reply had no parseable decision; entry stays tentative"
                );
                let preview: String = resp.content.chars().take(200).collect();
                store
                    .lock()
                    .log_decision(Some(entry.id), None, &format!("UNPARSED: {preview}"), last_post_id)
                    .map_err(storage)?;
            }
        }
    }

    tracing::info!(
        thread_id,
        reviewed = report.reviewed,
        confirmed = report.confirmed,
        rejected = report.rejected,
        revised = report.revised,
        merged = report.merged,
        "curation finished"
    );
    // The fork and its dialogue are dropped here, unconditionally.
    Ok(report)
}

/// Apply one decision against the main store. Decisions land in receipt
/// order; a later decision sees every earlier effect, so a vanished
/// source/target is logged and skipped rather than treated as fatal.
pub(crate) fn apply_decision(
    store: &Arc<Mutex<AnnotatorDb>>,
    entry: &GlossaryEntry,
    decision: &CuratorDecision,
    post_id: i64,
    thread_id: i64,
    report: &mut CuratorReport,
) -> Result<()> {
    let mut store = store.lock();
    match decision {
        CuratorDecision::Confirm => {
            let patch = EntryPatch {
                status: Some(EntryStatus::Confirmed),
                ..Default::default()
            };
            if store
                .update_entry(entry.id, &patch, post_id, thread_id)
                .map_err(storage)?
            {
                store
                    .log_decision(Some(entry.id), None, "CONFIRM", post_id)
                    .map_err(storage)?;
                report.confirmed += 1;
            }
        }
        CuratorDecision::Reject(reason) => {
            if store
                .delete_entry(entry.id, reason, post_id)
                .map_err(storage)?
            {
                report.rejected += 1;
            }
        }
        CuratorDecision::Revise(definition) => {
            let patch = EntryPatch {
                definition: Some(definition.clone()),
                ..Default::default()
            };
            if store
                .update_entry(entry.id, &patch, post_id, thread_id)
                .map_err(storage)?
            {
                store
                    .log_decision(Some(entry.id), None, "REVISE", post_id)
                    .map_err(storage)?;
                report.revised += 1;
            }
        }
        CuratorDecision::Merge(target_id) => {
            let target = match store.get_entry(*target_id) {
                Ok(t) => t,
                Err(StoreError::NotFound(_)) => {
                    store
                        .log_decision(
                            None,
                            None,
                            &format!(
                                "MERGE skipped: target {target_id} missing for '{}'",
                                entry.term
                            ),
                            post_id,
                        )
                        .map_err(storage)?;
                    return Ok(());
                }
                Err(e) => return Err(storage(e)),
            };

            // Copy unique material into the target, then drop the source.
            let mut patch = EntryPatch::default();
            if !target.definition.contains(entry.definition.trim()) {
                patch.definition = Some(format!(
                    "{}\n\n{}",
                    target.definition,
                    entry.definition.trim()
                ));
            }
            let mut tags = target.tags.clone();
            for tag in &entry.tags {
                if !tags.contains(tag) {
                    tags.push(tag.clone());
                }
            }
            if tags != target.tags {
                patch.tags = Some(tags);
            }
            if !patch.is_empty() {
                store
                    .update_entry(target.id, &patch, post_id, thread_id)
                    .map_err(storage)?;
            }
            store
                .log_decision(
                    Some(target.id),
                    None,
                    &format!("MERGE: absorbed '{}' (entry {})", entry.term, entry.id),
                    post_id,
                )
                .map_err(storage)?;
            store
                .delete_entry(
                    entry.id,
                    &format!("merged into entry {}", target.id),
                    post_id,
                )
                .map_err(storage)?;
            report.merged += 1;
        }
    }
    Ok(())
}

/// Assemble the evidence block for one curation target.
fn build_evidence(
    store: &Arc<Mutex<AnnotatorDb>>,
    corpus: &Arc<Mutex<CorpusReader>>,
    entry: &GlossaryEntry,
) -> Result<String> {
    let mut out = format!(
        "<curation_target entry_id=\"{}\" term=\"{}\" tags=\"{}\">\n{}\n</curation_target>\n",
        entry.id,
        entry.term,
        entry.tags.join(","),
        entry.definition
    );

    match corpus
        .lock()
        .adjacent_posts(entry.first_seen_post_id, EVIDENCE_WINDOW)
    {
        Ok(posts) => {
            out.push_str("<first_appearance>\n");
            for post in &posts {
                out.push_str(&format!("[post {}] {}\n", post.id, post.body));
            }
            out.push_str("</first_appearance>\n");
        }
        Err(e) => {
            tracing::warn!(
                entry_id = entry.id,
                post_id = entry.first_seen_post_id,
                error = %e,
                "first-appearance posts unavailable"
            );
        }
    }

    let neighbors = store
        .lock()
        .search_entries(
            &entry.term,
            &SearchFilter {
                tags: vec![],
                status: qc_store::StatusFilter::All,
                limit: NEIGHBOR_LIMIT + 1,
            },
        )
        .map_err(storage)?;
    let neighbors: Vec<_> = neighbors.into_iter().filter(|n| n.id != entry.id).collect();
    if !neighbors.is_empty() {
        out.push_str("<near_neighbors>\n");
        for n in neighbors.iter().take(NEIGHBOR_LIMIT) {
            out.push_str(&format!(
                "entry {} \"{}\" [{}]: {}\n",
                n.id,
                n.term,
                n.status.as_str(),
                n.definition
            ));
        }
        out.push_str("</near_neighbors>\n");
    }

    out.push_str("Decide: CONFIRM, REJECT <reason>, REVISE <definition>, or MERGE <entry id>.");
    Ok(out)
}

fn storage(e: StoreError) -> Error {
    Error::Storage(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_decision_form() {
        assert_eq!(parse_decision("CONFIRM"), Some(CuratorDecision::Confirm));
        assert_eq!(
            parse_decision("CONFIRM looks solid"),
            Some(CuratorDecision::Confirm)
        );
        assert_eq!(parse_decision("REJECTED loudly"), None);
        assert_eq!(
            parse_decision("REJECT never actually named in the story"),
            Some(CuratorDecision::Reject(
                "never actually named in the story".into()
            ))
        );
        assert_eq!(
            parse_decision("REJECT"),
            Some(CuratorDecision::Reject("rejected by curator".into()))
        );
        assert_eq!(
            parse_decision("REVISE A vat-grown scholar of the third terrace."),
            Some(CuratorDecision::Revise(
                "A vat-grown scholar of the third terrace.".into()
            ))
        );
        assert_eq!(parse_decision("MERGE 7"), Some(CuratorDecision::Merge(7)));
        assert_eq!(parse_decision("MERGE #12"), Some(CuratorDecision::Merge(12)));
    }

    #[test]
    fn revise_collects_following_lines() {
        let text = "REVISE First line.\nSecond line.";
        assert_eq!(
            parse_decision(text),
            Some(CuratorDecision::Revise("First line.\nSecond line.".into()))
        );
    }

    #[test]
    fn garbage_is_unparseable() {
        assert_eq!(parse_decision("I think it is fine"), None);
        assert_eq!(parse_decision("MERGE soon"), None);
        assert_eq!(parse_decision(""), None);
        assert_eq!(parse_decision("REVISE"), None);
    }

    #[test]
    fn merge_copies_unique_material_then_deletes_source() {
        let store = Arc::new(Mutex::new(AnnotatorDb::open_in_memory().unwrap()));
        let (source_id, target_id) = {
            let mut db = store.lock();
            let target_id = db
                .create_entry(
                    "Soma",
                    "Questmaster NPC",
                    &["character".into()],
                    100,
                    1,
                    EntryStatus::Tentative,
                )
                .unwrap();
            let source_id = db
                .create_entry(
                    "Soma the Gardener",
                    "Tends the vats",
                    &["gardener".into()],
                    110,
                    1,
                    EntryStatus::Tentative,
                )
                .unwrap();
            (source_id, target_id)
        };

        let source = store.lock().get_entry(source_id).unwrap();
        let mut report = CuratorReport::default();
        apply_decision(
            &store,
            &source,
            &CuratorDecision::Merge(target_id),
            120,
            1,
            &mut report,
        )
        .unwrap();

        let db = store.lock();
        let target = db.get_entry(target_id).unwrap();
        assert!(target.definition.contains("Questmaster NPC"));
        assert!(target.definition.contains("Tends the vats"));
        assert!(target.tags.contains(&"gardener".to_string()));
        assert!(matches!(
            db.get_entry(source_id),
            Err(StoreError::NotFound(_))
        ));
        assert_eq!(report.merged, 1);
    }

    #[test]
    fn merge_with_missing_target_is_logged_and_skipped() {
        let store = Arc::new(Mutex::new(AnnotatorDb::open_in_memory().unwrap()));
        let source_id = store
            .lock()
            .create_entry("Vatis", "a scholar", &[], 100, 1, EntryStatus::Tentative)
            .unwrap();
        let source = store.lock().get_entry(source_id).unwrap();

        let mut report = CuratorReport::default();
        apply_decision(
            &store,
            &source,
            &CuratorDecision::Merge(999),
            120,
            1,
            &mut report,
        )
        .unwrap();

        let db = store.lock();
        // Source survives; the skip is on the audit trail.
        assert!(db.get_entry(source_id).is_ok());
        assert_eq!(report.merged, 0);
        let skipped = db.orphaned_revisions().unwrap();
        assert!(skipped.iter().any(|r| r.new_value.contains("MERGE skipped")));
    }
}
