//! Shared fixtures: a scripted agent client and corpus builders.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use qc_corpus::CorpusReader;
use qc_domain::chat::ToolCall;
use qc_domain::error::Result;
use qc_domain::scene::{StoryPost, QM_POST_TAG};
use qc_providers::{ChatRequest, ChatResponse, LlmClient};
use qc_store::AnnotatorDb;

/// Plays back a fixed sequence of chat responses; tokenizes by
/// whitespace. Once the script runs dry it answers with plain text so
/// stray extra calls cannot wedge a test.
pub struct ScriptedClient {
    responses: Mutex<VecDeque<ChatResponse>>,
}

impl ScriptedClient {
    pub fn new(responses: Vec<ChatResponse>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
        })
    }

    pub fn text(content: &str) -> ChatResponse {
        ChatResponse {
            content: content.into(),
            tool_calls: vec![],
            usage: None,
            finish_reason: Some("stop".into()),
        }
    }

    pub fn tool_call(name: &str, arguments: serde_json::Value) -> ChatResponse {
        ChatResponse {
            content: String::new(),
            tool_calls: vec![ToolCall {
                call_id: format!("call_{name}"),
                tool_name: name.into(),
                arguments,
            }],
            usage: None,
            finish_reason: Some("tool_calls".into()),
        }
    }
}

#[async_trait::async_trait]
impl LlmClient for ScriptedClient {
    async fn chat(&self, _req: &ChatRequest) -> Result<ChatResponse> {
        Ok(self
            .responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Self::text("noted.")))
    }

    async fn tokenize(&self, text: &str) -> Result<Vec<u32>> {
        Ok(text.split_whitespace().map(|_| 0).collect())
    }

    fn client_id(&self) -> &str {
        "scripted"
    }
}

pub fn qm_post(thread_id: i64, id: i64, body: &str) -> StoryPost {
    StoryPost {
        thread_id,
        id,
        author: Some("QM".into()),
        subject: None,
        timestamp: Some("2016-03-01T12:00:00Z".into()),
        body: body.into(),
        tags: vec![QM_POST_TAG.into()],
    }
}

pub fn plain_post(thread_id: i64, id: i64, body: &str) -> StoryPost {
    StoryPost {
        thread_id,
        id,
        author: Some("anon".into()),
        subject: None,
        timestamp: None,
        body: body.into(),
        tags: vec!["story_post".into()],
    }
}

pub fn corpus_with(posts: &[StoryPost]) -> Arc<Mutex<CorpusReader>> {
    let reader = CorpusReader::open_in_memory().unwrap();
    for post in posts {
        reader.insert_post(post).unwrap();
    }
    Arc::new(Mutex::new(reader))
}

pub fn empty_store() -> Arc<Mutex<AnnotatorDb>> {
    Arc::new(Mutex::new(AnnotatorDb::open_in_memory().unwrap()))
}
