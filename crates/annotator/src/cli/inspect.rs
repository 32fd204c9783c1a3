//! The `inspect` command family.

use std::path::Path;

use qc_domain::error::{Error, Result};
use qc_store::AnnotatorDb;

use super::InspectTarget;

pub fn inspect(annotator_path: &Path, target: &InspectTarget) -> Result<()> {
    let db = AnnotatorDb::open(annotator_path).map_err(storage)?;
    match target {
        InspectTarget::Snapshots => snapshots(&db),
        InspectTarget::Snapshot { id } => snapshot(&db, *id),
        InspectTarget::Entries => entries(&db),
        InspectTarget::Entry { id } => entry(&db, *id),
        InspectTarget::Thread { id } => thread(&db, *id),
        InspectTarget::Blame { fragment } => blame(&db, fragment),
    }
}

fn blame(db: &AnnotatorDb, fragment: &str) -> Result<()> {
    match db.blame_definition(fragment).map_err(storage)? {
        Some((snapshot_id, entry_id)) => {
            let (meta, _) = db.load_snapshot(snapshot_id).map_err(storage)?;
            println!(
                "first captured in snapshot {} (entry {}), at thread {} / post {}",
                snapshot_id, entry_id, meta.last_thread_id, meta.last_post_id
            );
        }
        None => println!("fragment not found in any snapshot"),
    }
    Ok(())
}

fn snapshots(db: &AnnotatorDb) -> Result<()> {
    let metas = db.list_snapshots(None, None, 100).map_err(storage)?;
    if metas.is_empty() {
        println!("no snapshots");
        return Ok(());
    }
    for meta in metas {
        println!(
            "{:>5}  {:<12}  thread {:>6} / post {:>8}  pos {:>3}  entries {:>4}  tokens {:>6}  {}",
            meta.id,
            meta.kind.as_str(),
            meta.last_thread_id,
            meta.last_post_id,
            meta.thread_position,
            meta.entry_count,
            meta.token_count,
            meta.created_at.to_rfc3339()
        );
    }
    Ok(())
}

fn snapshot(db: &AnnotatorDb, id: i64) -> Result<()> {
    let (meta, context_json) = db.load_snapshot(id).map_err(storage)?;
    println!("snapshot {}: {}", meta.id, meta.kind.as_str());
    println!(
        "cursor: thread {} / post {} (scene {})",
        meta.last_thread_id, meta.last_post_id, meta.thread_position
    );
    println!("taken:  {}", meta.created_at.to_rfc3339());
    println!("tokens: {}", meta.token_count);
    println!("context: {} bytes of JSON", context_json.len());

    let states = db.snapshot_entry_states(id).map_err(storage)?;
    println!("captured entries: {}", states.len());
    for state in states {
        let definition: String = state.definition.chars().take(80).collect();
        println!(
            "  entry {:>5} [{}] {}",
            state.entry_id,
            state.status.as_str(),
            definition
        );
    }
    Ok(())
}

fn entries(db: &AnnotatorDb) -> Result<()> {
    let all = db.all_entries().map_err(storage)?;
    if all.is_empty() {
        println!("glossary is empty");
        return Ok(());
    }
    for entry in all {
        println!(
            "{:>5}  {:<30}  [{}]  tags: {}",
            entry.id,
            entry.term,
            entry.status.as_str(),
            entry.tags.join(", ")
        );
    }
    Ok(())
}

fn entry(db: &AnnotatorDb, id: i64) -> Result<()> {
    let entry = db.get_entry(id).map_err(storage)?;
    println!("entry {}: {}", entry.id, entry.term);
    println!("status:     {}", entry.status.as_str());
    println!("tags:       {}", entry.tags.join(", "));
    println!(
        "first seen: post {} (thread {})",
        entry.first_seen_post_id, entry.first_seen_thread_id
    );
    println!(
        "last touch: post {} (thread {})",
        entry.last_updated_post_id, entry.last_updated_thread_id
    );
    println!("created:    {}", entry.created_at.to_rfc3339());
    println!("updated:    {}", entry.updated_at.to_rfc3339());
    println!("\n{}\n", entry.definition);

    let revisions = db.revisions_for_entry(id).map_err(storage)?;
    println!("revisions: {}", revisions.len());
    for rev in revisions {
        println!(
            "  {:>5}  {:<16}  post {:>8}  {}",
            rev.id,
            rev.field.as_str(),
            rev.post_id,
            rev.created_at.to_rfc3339()
        );
    }
    Ok(())
}

fn thread(db: &AnnotatorDb, id: i64) -> Result<()> {
    match db.read_thread_state(id).map_err(storage)? {
        Some(state) => {
            println!(
                "thread {}: {} scene(s), {}",
                state.thread_id,
                state.scenes_emitted,
                if state.completed { "completed" } else { "in progress" }
            );
        }
        None => println!("thread {id}: not yet visited"),
    }

    let snapshots = db.list_snapshots(Some(id), None, 20).map_err(storage)?;
    println!("snapshots in thread: {}", snapshots.len());

    let born_here: Vec<_> = db
        .all_entries()
        .map_err(storage)?
        .into_iter()
        .filter(|e| e.first_seen_thread_id == id)
        .collect();
    println!("entries first seen here: {}", born_here.len());
    for entry in born_here {
        println!(
            "  {:>5}  {:<30}  [{}]",
            entry.id,
            entry.term,
            entry.status.as_str()
        );
    }
    Ok(())
}

fn storage(e: qc_store::StoreError) -> Error {
    Error::Storage(e.to_string())
}
