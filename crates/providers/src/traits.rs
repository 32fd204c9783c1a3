use qc_domain::chat::{Message, ToolCall, ToolDefinition, Usage};
use qc_domain::error::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A chat completion request against the agent server.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// The conversation messages to send.
    pub messages: Vec<Message>,
    /// Tool definitions the model may invoke.
    pub tools: Vec<ToolDefinition>,
    /// Sampling temperature. `None` lets the server choose.
    pub temperature: Option<f32>,
    /// Maximum tokens in the response. `None` lets the server choose.
    pub max_tokens: Option<u32>,
    /// Model identifier; most local servers ignore it.
    pub model: Option<String>,
}

/// A chat completion response.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Textual content of the response.
    pub content: String,
    /// Tool calls emitted by the model, in emission order.
    pub tool_calls: Vec<ToolCall>,
    /// Token usage information, when the server reports it.
    pub usage: Option<Usage>,
    /// Why the model stopped (e.g. "stop", "tool_calls", "length").
    pub finish_reason: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The two endpoints the annotator consumes. Implemented for the real
/// HTTP server and for scripted test doubles.
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a chat completion request and wait for the full response.
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse>;

    /// Tokenize plain text, returning the token-id sequence.
    async fn tokenize(&self, text: &str) -> Result<Vec<u32>>;

    /// A unique identifier for this client instance (logging).
    fn client_id(&self) -> &str;
}
