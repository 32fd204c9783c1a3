pub mod export;
pub mod inspect;
pub mod run;
pub mod status;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};

use qc_domain::config::Config;
use qc_domain::error::{Error, Result};

/// QuestCodex — an autonomous glossary annotator for quest archives.
#[derive(Debug, Parser)]
#[command(name = "questcodex", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the annotation loop over a corpus.
    Run {
        /// Path to the read-only corpus database.
        corpus: PathBuf,
        /// Path to the annotator database (created if missing).
        annotator_db: PathBuf,
        /// Base URL of the agent server.
        #[arg(long)]
        agent_url: Option<String>,
        /// Stop after this many scenes.
        #[arg(long)]
        limit: Option<u64>,
        /// Ignore saved run-state and start from the beginning.
        #[arg(long)]
        no_resume: bool,
        /// Posts fetched per corpus read.
        #[arg(long)]
        batch_size: Option<usize>,
        /// Config file (default: $QC_CONFIG or questcodex.toml).
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Show run-state and store counters.
    Status {
        annotator_db: PathBuf,
    },
    /// Inspect stored state.
    Inspect {
        annotator_db: PathBuf,
        #[command(subcommand)]
        target: InspectTarget,
    },
    /// Dump the glossary.
    Export {
        annotator_db: PathBuf,
        #[arg(long, value_enum, default_value_t = ExportFormat::Json)]
        format: ExportFormat,
        /// Keep only entries with this status (tentative|confirmed).
        #[arg(long)]
        status: Option<String>,
        /// Keep only entries carrying every listed tag.
        #[arg(long = "tags")]
        tags: Vec<String>,
    },
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum InspectTarget {
    /// List snapshots (newest first).
    Snapshots,
    /// Show one snapshot, including its captured entry states.
    Snapshot { id: i64 },
    /// List glossary entries.
    Entries,
    /// Show one entry with its revision history.
    Entry { id: i64 },
    /// Show per-thread progress and the entries first seen there.
    Thread { id: i64 },
    /// Find the snapshot that introduced a definition fragment.
    Blame { fragment: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportFormat {
    Json,
    Yaml,
}

// ── Config loading ────────────────────────────────────────────────────

/// Load the TOML config from `--config`, `$QC_CONFIG`, or
/// `questcodex.toml`; a missing file means defaults.
pub fn load_config(path_override: Option<&Path>) -> Result<Config> {
    let path = match path_override {
        Some(p) => p.to_path_buf(),
        None => PathBuf::from(
            std::env::var("QC_CONFIG").unwrap_or_else(|_| "questcodex.toml".into()),
        ),
    };

    if !path.exists() {
        if path_override.is_some() {
            return Err(Error::Config(format!(
                "config file {} does not exist",
                path.display()
            )));
        }
        return Ok(Config::default());
    }

    let raw = std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("reading {}: {e}", path.display())))?;
    toml::from_str(&raw).map_err(|e| Error::Config(format!("parsing {}: {e}", path.display())))
}
