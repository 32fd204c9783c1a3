//! The annotation runtime: runner state machine, curator pass, tool
//! dispatch, summon sub-state, and codex-update parsing.

pub mod curator;
pub mod dispatcher;
pub mod runner;
pub mod summon;
pub mod updates;

pub use dispatcher::{EntryEvent, ToolDispatcher};
pub use runner::{RunOutcome, Runner};

use std::sync::Arc;
use std::time::Duration;

use qc_domain::error::{Error, Result};
use qc_providers::{ChatRequest, ChatResponse, LlmClient};

/// Call the agent with exponential backoff on transient failures
/// (connect errors, timeouts, 5xx). Permanent failures and retry
/// exhaustion return the final error for the caller to escalate.
pub(crate) async fn call_with_retry(
    client: &Arc<dyn LlmClient>,
    req: &ChatRequest,
    max_retries: u32,
) -> Result<ChatResponse> {
    let mut attempt = 0u32;
    loop {
        match client.chat(req).await {
            Ok(resp) => return Ok(resp),
            Err(e) if e.is_transient() && attempt < max_retries => {
                let backoff = Duration::from_secs(1u64 << attempt);
                attempt += 1;
                tracing::warn!(
                    attempt,
                    max_retries,
                    backoff_sec = backoff.as_secs(),
                    error = %e,
                    "agent call failed; retrying"
                );
                tokio::time::sleep(backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyClient {
        failures_before_success: u32,
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl LlmClient for FlakyClient {
        async fn chat(&self, _req: &ChatRequest) -> Result<ChatResponse> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures_before_success {
                Err(Error::Http("connection reset".into()))
            } else {
                Ok(ChatResponse {
                    content: "ok".into(),
                    tool_calls: vec![],
                    usage: None,
                    finish_reason: Some("stop".into()),
                })
            }
        }
        async fn tokenize(&self, text: &str) -> Result<Vec<u32>> {
            Ok(text.split_whitespace().map(|_| 0).collect())
        }
        fn client_id(&self) -> &str {
            "flaky"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures_then_succeeds() {
        let client: Arc<dyn LlmClient> = Arc::new(FlakyClient {
            failures_before_success: 2,
            calls: AtomicU32::new(0),
        });
        let resp = call_with_retry(&client, &ChatRequest::default(), 3)
            .await
            .unwrap();
        assert_eq!(resp.content, "ok");
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_returns_the_final_error() {
        let client: Arc<dyn LlmClient> = Arc::new(FlakyClient {
            failures_before_success: 10,
            calls: AtomicU32::new(0),
        });
        let err = call_with_retry(&client, &ChatRequest::default(), 3)
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
