//! LLM client for the local agent server.
//!
//! The annotator treats the server as a black box with two endpoints:
//! an OpenAI-compatible chat completion endpoint and a tokenize
//! endpoint. The trait seam exists so tests can substitute a scripted
//! client.

pub mod llama_server;
pub mod traits;

pub use llama_server::LlamaServerClient;
pub use traits::{ChatRequest, ChatResponse, LlmClient};
