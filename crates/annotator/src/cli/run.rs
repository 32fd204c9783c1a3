//! The `run` command: wire everything up and drive the loop.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use qc_corpus::CorpusReader;
use qc_domain::config::{Config, ConfigSeverity};
use qc_domain::error::{Error, Result};
use qc_providers::LlamaServerClient;
use qc_store::AnnotatorDb;

use crate::runtime::Runner;

#[allow(clippy::too_many_arguments)]
pub async fn run(
    corpus_path: &Path,
    annotator_path: &Path,
    agent_url: Option<String>,
    limit: Option<u64>,
    no_resume: bool,
    batch_size: Option<usize>,
    config_path: Option<PathBuf>,
) -> Result<()> {
    // ── Config: file + CLI overrides ─────────────────────────────
    let mut config: Config = super::load_config(config_path.as_deref())?;
    config.corpus.path = corpus_path.to_path_buf();
    config.annotator.path = annotator_path.to_path_buf();
    if let Some(url) = agent_url {
        config.agent.base_url = url;
    }
    if let Some(limit) = limit {
        config.runner.scene_limit = Some(limit);
    }
    if let Some(batch_size) = batch_size {
        config.corpus.batch_size = batch_size;
    }
    config.runner.no_resume = no_resume;

    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        return Err(Error::Config("config validation failed".into()));
    }

    // ── Stores and client ────────────────────────────────────────
    let corpus = Arc::new(Mutex::new(
        CorpusReader::open(&config.corpus.path)
            .map_err(|e| Error::Storage(e.to_string()))?,
    ));
    let store = Arc::new(Mutex::new(
        AnnotatorDb::open(&config.annotator.path)
            .map_err(|e| Error::Storage(e.to_string()))?,
    ));
    let client = Arc::new(LlamaServerClient::from_config(&config.agent)?);
    tracing::info!(
        corpus = %config.corpus.path.display(),
        annotator = %config.annotator.path.display(),
        agent = %config.agent.base_url,
        "questcodex starting"
    );

    // ── SIGINT: stop at the next state boundary ──────────────────
    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received; stopping at the next scene boundary");
                stop.store(true, Ordering::SeqCst);
            }
        });
    }

    // ── Run ──────────────────────────────────────────────────────
    let mut runner = Runner::new(config, store, corpus, client, stop)?;
    let outcome = runner.run().await?;

    tracing::info!(
        scenes = outcome.scenes_processed,
        created = outcome.entries_created,
        updated = outcome.entries_updated,
        interrupted = outcome.interrupted,
        token_fallback = outcome.token_fallback,
        "run finished"
    );
    println!(
        "processed {} scene(s): {} entr(ies) created, {} updated{}",
        outcome.scenes_processed,
        outcome.entries_created,
        outcome.entries_updated,
        if outcome.interrupted {
            " (interrupted)"
        } else {
            ""
        }
    );
    Ok(())
}
