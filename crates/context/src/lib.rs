//! Context management: token accounting, the durable annotation
//! context, summarization, and the tiered rolling compactor that keeps
//! conversation state inside the budget.

pub mod compactor;
pub mod context;
pub mod summarize;
pub mod tokens;

pub use compactor::{Compactor, CompactorState, CompactionOutcome};
pub use context::{AnnotationContext, ChunkSummary, SceneInput, ThreadSummary, Turn};
pub use summarize::{LlmSummarizer, Summarizer};
pub use tokens::TokenCounter;
