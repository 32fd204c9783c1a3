//! The `export` command: dump the glossary as JSON or YAML.

use std::path::Path;

use qc_domain::error::{Error, Result};
use qc_domain::glossary::EntryStatus;
use qc_store::AnnotatorDb;

use super::ExportFormat;

pub fn export(
    annotator_path: &Path,
    format: ExportFormat,
    status: Option<&str>,
    tags: &[String],
) -> Result<()> {
    let status = match status {
        None => None,
        Some(raw) => Some(
            EntryStatus::parse(raw)
                .ok_or_else(|| Error::Config(format!("unknown status filter '{raw}'")))?,
        ),
    };

    let db = AnnotatorDb::open(annotator_path).map_err(|e| Error::Storage(e.to_string()))?;
    let entries: Vec<_> = db
        .all_entries()
        .map_err(|e| Error::Storage(e.to_string()))?
        .into_iter()
        .filter(|e| status.map_or(true, |s| e.status == s))
        .filter(|e| tags.iter().all(|t| e.tags.contains(t)))
        .collect();

    let rendered = match format {
        ExportFormat::Json => serde_json::to_string_pretty(&entries)?,
        ExportFormat::Yaml => serde_yaml::to_string(&entries)
            .map_err(|e| Error::Other(format!("yaml: {e}")))?,
    };
    println!("{rendered}");
    tracing::debug!(count = entries.len(), "glossary exported");
    Ok(())
}
