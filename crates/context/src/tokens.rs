//! Token accounting with a remote primary and a latching local
//! fallback.
//!
//! The primary path asks the agent server's tokenize endpoint. The
//! first failure switches this counter to a character heuristic for the
//! rest of the run; flapping between the two would make compaction
//! thresholds oscillate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use qc_domain::chat::Message;
use qc_providers::LlmClient;

pub struct TokenCounter {
    client: Arc<dyn LlmClient>,
    chars_per_token: f32,
    per_message_overhead: u32,
    using_fallback: AtomicBool,
}

impl TokenCounter {
    pub fn new(client: Arc<dyn LlmClient>, chars_per_token: f32, per_message_overhead: u32) -> Self {
        Self {
            client,
            chars_per_token: if chars_per_token > 0.0 {
                chars_per_token
            } else {
                4.0
            },
            per_message_overhead,
            using_fallback: AtomicBool::new(false),
        }
    }

    /// Whether the counter has latched onto the heuristic.
    pub fn using_fallback(&self) -> bool {
        self.using_fallback.load(Ordering::Relaxed)
    }

    /// Character heuristic, always available and side-effect free.
    pub fn estimate(&self, text: &str) -> u32 {
        (text.chars().count() as f32 / self.chars_per_token).ceil() as u32
    }

    /// Heuristic over a message list, including per-message overhead.
    pub fn estimate_messages(&self, messages: &[Message]) -> u32 {
        messages
            .iter()
            .map(|m| self.estimate(&m.content.extract_all_text()) + self.per_message_overhead)
            .sum()
    }

    /// Count tokens in one text: tokenize endpoint first, heuristic
    /// after the first failure.
    pub async fn count(&self, text: &str) -> u32 {
        if self.using_fallback() {
            return self.estimate(text);
        }
        match self.client.tokenize(text).await {
            Ok(tokens) => tokens.len() as u32,
            Err(e) => {
                // Log once; the latch keeps later calls quiet.
                tracing::warn!(
                    error = %e,
                    "tokenize endpoint failed; using character heuristic for the rest of the run"
                );
                self.using_fallback.store(true, Ordering::Relaxed);
                self.estimate(text)
            }
        }
    }

    /// Count tokens across a message list.
    pub async fn count_messages(&self, messages: &[Message]) -> u32 {
        if self.using_fallback() {
            return self.estimate_messages(messages);
        }
        // One tokenize round-trip over the concatenation; per-message
        // overhead is added locally either way.
        let mut joined = String::new();
        for m in messages {
            joined.push_str(&m.content.extract_all_text());
            joined.push('\n');
        }
        let body = self.count(&joined).await;
        body + self.per_message_overhead * messages.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qc_domain::error::{Error, Result};
    use qc_providers::{ChatRequest, ChatResponse};
    use std::sync::atomic::AtomicU32;

    /// Tokenizes one token per whitespace word, or fails every call.
    struct WordTokenizer {
        fail: bool,
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl LlmClient for WordTokenizer {
        async fn chat(&self, _req: &ChatRequest) -> Result<ChatResponse> {
            Err(Error::Agent("not a chat test".into()))
        }

        async fn tokenize(&self, text: &str) -> Result<Vec<u32>> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if self.fail {
                return Err(Error::Http("connection refused".into()));
            }
            Ok(text.split_whitespace().map(|_| 0u32).collect())
        }

        fn client_id(&self) -> &str {
            "word_tokenizer"
        }
    }

    fn counter(fail: bool) -> (TokenCounter, Arc<WordTokenizer>) {
        let client = Arc::new(WordTokenizer {
            fail,
            calls: AtomicU32::new(0),
        });
        (TokenCounter::new(client.clone(), 4.0, 4), client)
    }

    #[tokio::test]
    async fn primary_path_counts_real_tokens() {
        let (counter, _) = counter(false);
        assert_eq!(counter.count("one two three").await, 3);
        assert!(!counter.using_fallback());
    }

    #[tokio::test]
    async fn fallback_latches_after_first_failure() {
        let (counter, client) = counter(true);
        // 8 chars / 4.0 -> 2 tokens.
        assert_eq!(counter.count("12345678").await, 2);
        assert!(counter.using_fallback());

        // No further tokenize attempts once latched.
        counter.count("more text").await;
        assert_eq!(client.calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn message_overhead_is_included() {
        let (counter, _) = counter(true);
        let messages = vec![Message::user("12345678"), Message::assistant("1234")];
        // ceil(8/4) + 4 + ceil(4/4) + 4 = 11
        assert_eq!(counter.count_messages(&messages).await, 11);
    }

    #[test]
    fn estimate_rounds_up() {
        let (counter, _) = counter(false);
        assert_eq!(counter.estimate("12345"), 2);
        assert_eq!(counter.estimate(""), 0);
    }
}
