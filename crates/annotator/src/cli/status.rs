//! The `status` command.

use std::path::Path;

use qc_domain::error::{Error, Result};
use qc_store::AnnotatorDb;

pub fn status(annotator_path: &Path) -> Result<()> {
    let db = AnnotatorDb::open(annotator_path).map_err(|e| Error::Storage(e.to_string()))?;

    match db.read_run_state().map_err(|e| Error::Storage(e.to_string()))? {
        Some(state) => {
            println!("run started:       {}", state.started_at.to_rfc3339());
            println!("last updated:      {}", state.updated_at.to_rfc3339());
            println!(
                "cursor:            thread {} / post {}",
                state.last_thread_id, state.last_post_id
            );
            println!("posts processed:   {}", state.posts_processed);
            println!("scenes processed:  {}", state.scenes_processed);
            println!("entries created:   {}", state.entries_created);
            println!("entries updated:   {}", state.entries_updated);
            match state.current_snapshot_id {
                Some(id) => println!("current snapshot:  {id}"),
                None => println!("current snapshot:  none"),
            }
        }
        None => println!("no run-state: this store has not been run yet"),
    }

    let entries = db.count_entries().map_err(|e| Error::Storage(e.to_string()))?;
    let snapshots = db
        .list_snapshots(None, None, 10_000)
        .map_err(|e| Error::Storage(e.to_string()))?
        .len();
    println!("glossary entries:  {entries}");
    println!("snapshots:         {snapshots}");
    Ok(())
}
