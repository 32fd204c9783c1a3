use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub annotator: AnnotatorConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub compaction: CompactionConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Corpus
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusConfig {
    /// Path to the read-only corpus database.
    #[serde(default = "d_corpus_path")]
    pub path: PathBuf,
    /// Posts fetched per read when streaming scenes.
    #[serde(default = "d_256")]
    pub batch_size: usize,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            path: d_corpus_path(),
            batch_size: 256,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Annotator store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotatorConfig {
    /// Path to the annotator database (glossary + snapshots + run state).
    #[serde(default = "d_annotator_path")]
    pub path: PathBuf,
}

impl Default for AnnotatorConfig {
    fn default() -> Self {
        Self {
            path: d_annotator_path(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent (LLM server)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Base URL of the OpenAI-compatible chat server (llama.cpp et al).
    #[serde(default = "d_agent_url")]
    pub base_url: String,
    /// Model name sent in the request body. Most local servers ignore it.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "d_temperature")]
    pub temperature: f32,
    #[serde(default = "d_768")]
    pub max_tokens: u32,
    /// Per-request timeout in seconds.
    #[serde(default = "d_60")]
    pub timeout_sec: u64,
    /// Retry attempts on transient failures before halting.
    #[serde(default = "d_3")]
    pub max_retries: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            base_url: d_agent_url(),
            model: None,
            temperature: 0.4,
            max_tokens: 768,
            timeout_sec: 60,
            max_retries: 3,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context budget + token counting
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Total context window budget in tokens.
    #[serde(default = "d_32768")]
    pub budget: u32,
    /// Heuristic fallback: characters per token.
    #[serde(default = "d_chars_per_token")]
    pub chars_per_token: f32,
    /// Heuristic fallback: fixed per-message overhead for role framing.
    #[serde(default = "d_4")]
    pub per_message_overhead: u32,
    /// Below this fraction of budget the cheap estimate is trusted;
    /// above it the tokenize endpoint cross-checks.
    #[serde(default = "d_verify_ratio")]
    pub verify_ratio: f32,
    /// Candidate glossary entries retrieved per scene.
    #[serde(default = "d_10")]
    pub candidate_limit: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            budget: 32_768,
            chars_per_token: 4.0,
            per_message_overhead: 4,
            verify_ratio: 0.60,
            candidate_limit: 10,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Compaction tiers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// Compaction is consulted once usage crosses this fraction.
    #[serde(default = "d_soft_ratio")]
    pub soft_ratio: f32,
    /// Thread-tier compaction engages above this fraction.
    #[serde(default = "d_thread_ratio")]
    pub thread_ratio: f32,
    /// Emergency tiers (think-strip, truncation) engage above this.
    #[serde(default = "d_emergency_ratio")]
    pub emergency_ratio: f32,
    /// Compaction loops until usage falls below this fraction.
    #[serde(default = "d_target_ratio")]
    pub target_ratio: f32,
    /// Scenes per intra-thread chunk.
    #[serde(default = "d_8")]
    pub chunk_scenes: u32,
    /// Minimum in-progress scenes before the partial-chunk fallback.
    #[serde(default = "d_6")]
    pub min_partial_scenes: u32,
    /// Reasoning blocks survive in this many most-recent turns.
    #[serde(default = "d_4usize")]
    pub keep_recent_thinking: usize,
    /// Assistant turns older than this index are truncation candidates.
    #[serde(default = "d_8usize")]
    pub truncate_after_turns: usize,
    /// Truncation length in characters.
    #[serde(default = "d_500")]
    pub truncate_len: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            soft_ratio: 0.60,
            thread_ratio: 0.80,
            emergency_ratio: 0.85,
            target_ratio: 0.70,
            chunk_scenes: 8,
            min_partial_scenes: 6,
            keep_recent_thinking: 4,
            truncate_after_turns: 8,
            truncate_len: 500,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runner
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Stop after this many scenes (None = run to corpus exhaustion).
    #[serde(default)]
    pub scene_limit: Option<u64>,
    /// Ignore run-state and start from the beginning of the corpus.
    #[serde(default)]
    pub no_resume: bool,
    /// Advisory intra-thread checkpoint cadence, in scenes. Thread
    /// boundaries always checkpoint regardless.
    #[serde(default = "d_25")]
    pub checkpoint_every_scenes: u32,
    /// Tool-call loops allowed per scene before the turn is cut off.
    #[serde(default = "d_12")]
    pub max_tool_loops: u32,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            scene_limit: None,
            no_resume: false,
            checkpoint_every_scenes: 25,
            max_tool_loops: 12,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Config {
    /// Sanity-check ratio ordering and sizes. Errors make the run
    /// refuse to start; warnings are logged and ignored.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        let c = &self.compaction;

        let err = |message: String| ConfigIssue {
            severity: ConfigSeverity::Error,
            message,
        };

        if !(c.soft_ratio < c.thread_ratio && c.thread_ratio <= c.emergency_ratio) {
            issues.push(err(format!(
                "compaction ratios must order soft < thread <= emergency \
                 (got {} / {} / {})",
                c.soft_ratio, c.thread_ratio, c.emergency_ratio
            )));
        }
        if c.target_ratio >= c.thread_ratio {
            issues.push(err(format!(
                "compaction.target_ratio ({}) must be below thread_ratio ({})",
                c.target_ratio, c.thread_ratio
            )));
        }
        if c.chunk_scenes == 0 {
            issues.push(err("compaction.chunk_scenes must be >= 1".into()));
        }
        if self.context.budget < 1024 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: format!(
                    "context.budget of {} tokens is very small; compaction \
                     will thrash",
                    self.context.budget
                ),
            });
        }
        if self.context.chars_per_token <= 0.0 {
            issues.push(err("context.chars_per_token must be positive".into()));
        }
        if self.agent.max_retries == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: "agent.max_retries is 0; any transient failure halts the run".into(),
            });
        }
        issues
    }
}

// ── serde defaults ────────────────────────────────────────────────────

fn d_corpus_path() -> PathBuf {
    PathBuf::from("corpus.db")
}
fn d_annotator_path() -> PathBuf {
    PathBuf::from("annotator.db")
}
fn d_agent_url() -> String {
    "http://localhost:8080".into()
}
fn d_temperature() -> f32 {
    0.4
}
fn d_768() -> u32 {
    768
}
fn d_60() -> u64 {
    60
}
fn d_3() -> u32 {
    3
}
fn d_4() -> u32 {
    4
}
fn d_256() -> usize {
    256
}
fn d_32768() -> u32 {
    32_768
}
fn d_chars_per_token() -> f32 {
    4.0
}
fn d_verify_ratio() -> f32 {
    0.60
}
fn d_10() -> usize {
    10
}
fn d_soft_ratio() -> f32 {
    0.60
}
fn d_thread_ratio() -> f32 {
    0.80
}
fn d_emergency_ratio() -> f32 {
    0.85
}
fn d_target_ratio() -> f32 {
    0.70
}
fn d_8() -> u32 {
    8
}
fn d_6() -> u32 {
    6
}
fn d_4usize() -> usize {
    4
}
fn d_8usize() -> usize {
    8
}
fn d_500() -> usize {
    500
}
fn d_25() -> u32 {
    25
}
fn d_12() -> u32 {
    12
}
