//! End-to-end runner scenarios against a scripted agent.

mod common;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use common::{corpus_with, empty_store, plain_post, qm_post, ScriptedClient};

use qc_domain::config::Config;
use qc_domain::glossary::{EntryStatus, RevisionField};
use qc_domain::snapshot::SnapshotKind;
use qc_annotator::runtime::Runner;

fn test_config() -> Config {
    Config::default()
}

fn stop_flag() -> Arc<AtomicBool> {
    Arc::new(AtomicBool::new(false))
}

#[tokio::test]
async fn empty_corpus_terminates_with_run_state_untouched() {
    let corpus = corpus_with(&[]);
    let store = empty_store();
    let client = ScriptedClient::new(vec![]);

    let mut runner = Runner::new(
        test_config(),
        store.clone(),
        corpus,
        client,
        stop_flag(),
    )
    .unwrap();
    let outcome = runner.run().await.unwrap();

    assert_eq!(outcome.scenes_processed, 0);
    assert!(store.lock().read_run_state().unwrap().is_none());
    assert_eq!(store.lock().count_entries().unwrap(), 0);
}

#[tokio::test]
async fn single_scene_create_stamps_provenance_and_checkpoints() {
    let corpus = corpus_with(&[qm_post(1, 100, "Soma greeted the party")]);
    let store = empty_store();
    let client = ScriptedClient::new(vec![
        ScriptedClient::tool_call(
            "glossary_create",
            serde_json::json!({
                "term": "Soma",
                "definition": "Questmaster NPC",
                "tags": ["character"]
            }),
        ),
        ScriptedClient::text("Recorded Soma."),
        // Curator pass over the tentative entry.
        ScriptedClient::text("CONFIRM"),
    ]);

    let mut runner =
        Runner::new(test_config(), store.clone(), corpus, client, stop_flag()).unwrap();
    let outcome = runner.run().await.unwrap();

    assert_eq!(outcome.scenes_processed, 1);
    assert_eq!(outcome.entries_created, 1);

    let db = store.lock();
    let entry = db.get_entry(1).unwrap();
    assert_eq!(entry.term, "Soma");
    assert_eq!(entry.first_seen_post_id, 100);
    assert_eq!(entry.first_seen_thread_id, 1);
    assert_eq!(entry.status, EntryStatus::Confirmed);

    // One revision per field at creation, plus the curator's status
    // change and CONFIRM note.
    let revisions = db.revisions_for_entry(1).unwrap();
    assert!(revisions.len() >= 4);
    for field in [
        RevisionField::Term,
        RevisionField::Definition,
        RevisionField::Status,
        RevisionField::Tags,
    ] {
        assert!(revisions.iter().any(|r| r.field == field && r.post_id == 100));
    }

    let state = db.read_run_state().unwrap().unwrap();
    assert_eq!(state.last_post_id, 100);
    assert_eq!(state.last_thread_id, 1);
    assert_eq!(state.scenes_processed, 1);
    assert_eq!(state.entries_created, 1);

    // Thread boundary wrote a checkpoint; the curator forked first.
    let checkpoints = db
        .list_snapshots(None, Some(SnapshotKind::Checkpoint), 10)
        .unwrap();
    assert_eq!(checkpoints.len(), 1);
    assert_eq!(state.current_snapshot_id, Some(checkpoints[0].id));
    let forks = db
        .list_snapshots(None, Some(SnapshotKind::CuratorFork), 10)
        .unwrap();
    assert_eq!(forks.len(), 1);
}

#[tokio::test]
async fn duplicate_term_is_rejected_but_the_scene_recovers() {
    let corpus = corpus_with(&[qm_post(1, 100, "Soma returned to the vats")]);
    let store = empty_store();
    store
        .lock()
        .create_entry(
            "Soma",
            "Questmaster NPC",
            &["character".into()],
            90,
            1,
            EntryStatus::Tentative,
        )
        .unwrap();

    let client = ScriptedClient::new(vec![
        ScriptedClient::tool_call(
            "glossary_create",
            serde_json::json!({"term": "Soma", "definition": "someone new"}),
        ),
        // The model reads the DuplicateTerm error and updates instead.
        ScriptedClient::tool_call(
            "glossary_update",
            serde_json::json!({"entry_id": 1, "definition": "Questmaster NPC; tends the vats"}),
        ),
        ScriptedClient::text("Updated the existing entry."),
        ScriptedClient::text("CONFIRM"),
    ]);

    let mut runner =
        Runner::new(test_config(), store.clone(), corpus, client, stop_flag()).unwrap();
    let outcome = runner.run().await.unwrap();

    assert_eq!(outcome.entries_created, 0);
    assert_eq!(outcome.entries_updated, 1);

    let db = store.lock();
    assert_eq!(db.count_entries().unwrap(), 1);
    let entry = db.get_entry(1).unwrap();
    assert_eq!(entry.definition, "Questmaster NPC; tends the vats");
    assert_eq!(entry.last_updated_post_id, 100);
    // Creation-era revisions plus the definition update.
    let revisions = db.revisions_for_entry(1).unwrap();
    assert!(revisions
        .iter()
        .any(|r| r.field == RevisionField::Definition && r.post_id == 100));
}

#[tokio::test]
async fn curator_reject_deletes_entry_but_keeps_the_audit_trail() {
    let corpus = corpus_with(&[qm_post(1, 100, "the vatis stirred")]);
    let store = empty_store();
    let client = ScriptedClient::new(vec![
        ScriptedClient::tool_call(
            "glossary_create",
            serde_json::json!({"term": "vatis", "definition": "a stirring sound?"}),
        ),
        ScriptedClient::text("Possibly a term; recorded tentatively."),
        ScriptedClient::text("REJECT not a proper noun, just prose"),
    ]);

    let mut runner =
        Runner::new(test_config(), store.clone(), corpus, client, stop_flag()).unwrap();
    runner.run().await.unwrap();

    let db = store.lock();
    assert_eq!(db.count_entries().unwrap(), 0);

    // The deletion survives as an orphaned curator_decision revision.
    let orphaned = db.orphaned_revisions().unwrap();
    let decision = orphaned
        .iter()
        .find(|r| r.field == RevisionField::CuratorDecision)
        .expect("curator decision preserved");
    assert!(decision.entry_id.is_none());
    assert_eq!(decision.new_value, "not a proper noun, just prose");

    // Boundary checkpoint still written.
    assert_eq!(
        db.list_snapshots(None, Some(SnapshotKind::Checkpoint), 10)
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn codex_updates_payload_is_applied_from_the_final_message() {
    let corpus = corpus_with(&[qm_post(1, 100, "The Vats loomed")]);
    let store = empty_store();
    let client = ScriptedClient::new(vec![
        ScriptedClient::text(
            "New location.\n<codex_updates>\n\
             <create term=\"The Vats\" tags=\"location\">Great growth vats beneath the terrace</create>\n\
             </codex_updates>",
        ),
        ScriptedClient::text("CONFIRM"),
    ]);

    let mut runner =
        Runner::new(test_config(), store.clone(), corpus, client, stop_flag()).unwrap();
    let outcome = runner.run().await.unwrap();

    assert_eq!(outcome.entries_created, 1);
    let db = store.lock();
    let entry = db.get_entry(1).unwrap();
    assert_eq!(entry.term, "The Vats");
    assert_eq!(entry.tags, vec!["location".to_string()]);
    assert_eq!(entry.first_seen_post_id, 100);
}

#[tokio::test]
async fn limited_run_resumes_at_the_next_unprocessed_scene() {
    let posts = vec![
        qm_post(1, 100, "scene zero"),
        plain_post(1, 101, "reader comment"),
        qm_post(1, 102, "scene one"),
    ];
    let corpus = corpus_with(&posts);
    let store = empty_store();

    // ── First run: --limit 1 ─────────────────────────────────────
    let mut config = test_config();
    config.runner.scene_limit = Some(1);
    let client = ScriptedClient::new(vec![ScriptedClient::text("nothing new in scene zero")]);
    let mut runner = Runner::new(
        config,
        store.clone(),
        corpus.clone(),
        client,
        stop_flag(),
    )
    .unwrap();
    let first = runner.run().await.unwrap();
    assert_eq!(first.scenes_processed, 1);

    {
        let db = store.lock();
        let state = db.read_run_state().unwrap().unwrap();
        assert_eq!(state.last_post_id, 100);
        assert_eq!(state.scenes_processed, 1);
        let ts = db.read_thread_state(1).unwrap().unwrap();
        assert_eq!(ts.scenes_emitted, 1);
        assert!(!ts.completed);
    }

    // ── Second run: no limit; picks up scene one only ────────────
    let client = ScriptedClient::new(vec![
        ScriptedClient::text("nothing new in scene one"),
        // Thread closes now; no tentative entries, so no curator call.
    ]);
    let mut runner = Runner::new(
        test_config(),
        store.clone(),
        corpus,
        client,
        stop_flag(),
    )
    .unwrap();
    let second = runner.run().await.unwrap();
    assert_eq!(second.scenes_processed, 1);

    let db = store.lock();
    let state = db.read_run_state().unwrap().unwrap();
    assert_eq!(state.last_post_id, 102);
    // Counters accumulate across runs: total equals the per-run sum.
    assert_eq!(
        state.scenes_processed,
        first.scenes_processed + second.scenes_processed
    );
    assert_eq!(state.posts_processed, 2);
    let ts = db.read_thread_state(1).unwrap().unwrap();
    assert_eq!(ts.scenes_emitted, 2);
    assert!(ts.completed);
}

#[tokio::test]
async fn resume_survives_a_process_restart_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("annotator.db");
    let posts = vec![
        qm_post(1, 100, "scene zero"),
        plain_post(1, 101, "reader comment"),
        qm_post(1, 102, "scene one"),
    ];

    // First process: one scene, then exit.
    {
        let store = Arc::new(parking_lot::Mutex::new(
            qc_store::AnnotatorDb::open(&db_path).unwrap(),
        ));
        let mut config = test_config();
        config.runner.scene_limit = Some(1);
        let client = ScriptedClient::new(vec![ScriptedClient::text("saw scene zero")]);
        let mut runner =
            Runner::new(config, store, corpus_with(&posts), client, stop_flag()).unwrap();
        assert_eq!(runner.run().await.unwrap().scenes_processed, 1);
    }

    // Second process: fresh handles on the same file.
    {
        let store = Arc::new(parking_lot::Mutex::new(
            qc_store::AnnotatorDb::open(&db_path).unwrap(),
        ));
        let client = ScriptedClient::new(vec![ScriptedClient::text("saw scene one")]);
        let mut runner = Runner::new(
            test_config(),
            store.clone(),
            corpus_with(&posts),
            client,
            stop_flag(),
        )
        .unwrap();
        assert_eq!(runner.run().await.unwrap().scenes_processed, 1);

        let state = store.lock().read_run_state().unwrap().unwrap();
        assert_eq!(state.last_post_id, 102);
        assert_eq!(state.scenes_processed, 2);
    }
}

#[tokio::test]
async fn no_resume_starts_over_from_the_first_scene() {
    let corpus = corpus_with(&[qm_post(1, 100, "scene zero")]);
    let store = empty_store();

    let client = ScriptedClient::new(vec![ScriptedClient::text("pass one")]);
    let mut runner = Runner::new(
        test_config(),
        store.clone(),
        corpus.clone(),
        client,
        stop_flag(),
    )
    .unwrap();
    assert_eq!(runner.run().await.unwrap().scenes_processed, 1);

    // A plain restart sees nothing left.
    let client = ScriptedClient::new(vec![]);
    let mut runner = Runner::new(
        test_config(),
        store.clone(),
        corpus.clone(),
        client,
        stop_flag(),
    )
    .unwrap();
    assert_eq!(runner.run().await.unwrap().scenes_processed, 0);

    // --no-resume wipes the cursor and replays the corpus.
    let mut config = test_config();
    config.runner.no_resume = true;
    let client = ScriptedClient::new(vec![ScriptedClient::text("pass two")]);
    let mut runner =
        Runner::new(config, store.clone(), corpus, client, stop_flag()).unwrap();
    assert_eq!(runner.run().await.unwrap().scenes_processed, 1);
}
