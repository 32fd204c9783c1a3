//! Adapter for a local llama.cpp-style server.
//!
//! Chat rides the OpenAI chat completions contract
//! (`/v1/chat/completions`), which llama.cpp, vLLM, LM Studio, and
//! Ollama all speak; tokenization uses the llama.cpp-native
//! `POST /tokenize` endpoint.

use std::time::Duration;

use serde_json::Value;

use qc_domain::chat::{ContentPart, Message, MessageContent, Role, ToolCall, ToolDefinition, Usage};
use qc_domain::config::AgentConfig;
use qc_domain::error::{Error, Result};

use crate::traits::{ChatRequest, ChatResponse, LlmClient};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct LlamaServerClient {
    id: String,
    base_url: String,
    default_model: Option<String>,
    client: reqwest::Client,
}

impl LlamaServerClient {
    pub fn from_config(cfg: &AgentConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_sec))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            id: "llama_server".into(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            default_model: cfg.model.clone(),
            client,
        })
    }

    fn build_chat_body(&self, req: &ChatRequest) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(msg_to_wire).collect();

        let mut body = serde_json::json!({
            "messages": messages,
            "stream": false,
        });

        if let Some(model) = req.model.as_ref().or(self.default_model.as_ref()) {
            body["model"] = Value::String(model.clone());
        }
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_wire).collect();
            body["tools"] = Value::Array(tools);
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(max) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn msg_to_wire(msg: &Message) -> Value {
    match msg.role {
        Role::Tool => tool_result_to_wire(msg),
        Role::Assistant => assistant_to_wire(msg),
        _ => serde_json::json!({
            "role": role_to_str(msg.role),
            "content": msg.content.extract_all_text(),
        }),
    }
}

fn assistant_to_wire(msg: &Message) -> Value {
    let mut obj = serde_json::json!({"role": "assistant"});
    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<Value> = Vec::new();

    match &msg.content {
        MessageContent::Text(t) => text_parts.push(t.clone()),
        MessageContent::Parts(parts) => {
            for part in parts {
                match part {
                    ContentPart::Text { text } => text_parts.push(text.clone()),
                    ContentPart::ToolUse { id, name, input } => {
                        tool_calls.push(serde_json::json!({
                            "id": id,
                            "type": "function",
                            "function": {
                                "name": name,
                                "arguments": input.to_string(),
                            }
                        }));
                    }
                    ContentPart::ToolResult { .. } => {}
                }
            }
        }
    }

    if text_parts.is_empty() {
        obj["content"] = Value::Null;
    } else {
        obj["content"] = Value::String(text_parts.join("\n"));
    }
    if !tool_calls.is_empty() {
        obj["tool_calls"] = Value::Array(tool_calls);
    }
    obj
}

fn tool_result_to_wire(msg: &Message) -> Value {
    if let MessageContent::Parts(parts) = &msg.content {
        for part in parts {
            if let ContentPart::ToolResult {
                tool_use_id,
                content,
                ..
            } = part
            {
                return serde_json::json!({
                    "role": "tool",
                    "tool_call_id": tool_use_id,
                    "content": content,
                });
            }
        }
    }
    serde_json::json!({
        "role": "tool",
        "tool_call_id": "",
        "content": msg.content.extract_all_text(),
    })
}

fn tool_to_wire(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response deserialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_chat_response(body: &Value) -> Result<ChatResponse> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| Error::Agent("no choices in response".into()))?;

    let message = choice
        .get("message")
        .ok_or_else(|| Error::Agent("no message in choice".into()))?;

    let content = message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let finish_reason = choice
        .get("finish_reason")
        .and_then(|v| v.as_str())
        .map(String::from);

    let tool_calls = parse_tool_calls(message);
    let usage = body.get("usage").and_then(parse_usage);

    Ok(ChatResponse {
        content,
        tool_calls,
        usage,
        finish_reason,
    })
}

fn parse_tool_calls(message: &Value) -> Vec<ToolCall> {
    let arr = match message.get("tool_calls").and_then(|v| v.as_array()) {
        Some(a) => a,
        None => return Vec::new(),
    };
    arr.iter()
        .filter_map(|tc| {
            let call_id = tc.get("id")?.as_str()?.to_string();
            let func = tc.get("function")?;
            let tool_name = func.get("name")?.as_str()?.to_string();
            let args_str = func.get("arguments")?.as_str().unwrap_or("{}");
            // Malformed argument JSON degrades to an empty object; the
            // dispatcher surfaces the missing fields back to the model.
            let arguments: Value =
                serde_json::from_str(args_str).unwrap_or(Value::Object(Default::default()));
            Some(ToolCall {
                call_id,
                tool_name,
                arguments,
            })
        })
        .collect()
}

fn parse_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        prompt_tokens: v.get("prompt_tokens")?.as_u64()? as u32,
        completion_tokens: v.get("completion_tokens")?.as_u64()? as u32,
        total_tokens: v.get("total_tokens")?.as_u64()? as u32,
    })
}

fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmClient for LlamaServerClient {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = self.build_chat_body(req);

        tracing::debug!(
            client = %self.id,
            url = %url,
            messages = req.messages.len(),
            tools = req.tools.len(),
            "chat request"
        );

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let resp_text = resp.text().await.map_err(from_reqwest)?;

        if !status.is_success() {
            return Err(Error::AgentStatus {
                endpoint: "/v1/chat/completions".into(),
                status: status.as_u16(),
                message: resp_text,
            });
        }

        let resp_json: Value = serde_json::from_str(&resp_text)?;
        parse_chat_response(&resp_json)
    }

    async fn tokenize(&self, text: &str) -> Result<Vec<u32>> {
        let url = format!("{}/tokenize", self.base_url);
        let body = serde_json::json!({ "content": text });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let resp_text = resp.text().await.map_err(from_reqwest)?;

        if !status.is_success() {
            return Err(Error::AgentStatus {
                endpoint: "/tokenize".into(),
                status: status.as_u16(),
                message: resp_text,
            });
        }

        let resp_json: Value = serde_json::from_str(&resp_text)?;
        let tokens = resp_json
            .get("tokens")
            .and_then(|t| t.as_array())
            .ok_or_else(|| Error::Agent("missing 'tokens' array in tokenize response".into()))?;

        Ok(tokens
            .iter()
            .filter_map(|v| v.as_u64().map(|t| t as u32))
            .collect())
    }

    fn client_id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_body_carries_tools_and_sampling() {
        let client = LlamaServerClient::from_config(&AgentConfig::default()).unwrap();
        let req = ChatRequest {
            messages: vec![Message::system("sys"), Message::user("hi")],
            tools: vec![ToolDefinition {
                name: "glossary_search".into(),
                description: "search".into(),
                parameters: serde_json::json!({"type": "object"}),
            }],
            temperature: Some(0.4),
            max_tokens: Some(768),
            model: None,
        };
        let body = client.build_chat_body(&req);
        assert_eq!(body["messages"].as_array().unwrap().len(), 2);
        assert_eq!(body["tools"][0]["function"]["name"], "glossary_search");
        assert_eq!(body["temperature"], serde_json::json!(0.4));
        assert_eq!(body["stream"], serde_json::json!(false));
    }

    #[test]
    fn assistant_tool_calls_serialize_to_wire_shape() {
        let msg = Message::assistant_with_tool_calls(
            "checking",
            &[ToolCall {
                call_id: "call_1".into(),
                tool_name: "read_post".into(),
                arguments: serde_json::json!({"post_id": 100}),
            }],
        );
        let wire = msg_to_wire(&msg);
        assert_eq!(wire["content"], "checking");
        assert_eq!(wire["tool_calls"][0]["function"]["name"], "read_post");
        // Arguments travel as a JSON string, per the OpenAI contract.
        assert!(wire["tool_calls"][0]["function"]["arguments"].is_string());
    }

    #[test]
    fn parses_response_with_tool_calls() {
        let body = serde_json::json!({
            "choices": [{
                "finish_reason": "tool_calls",
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {
                            "name": "glossary_create",
                            "arguments": "{\"term\": \"Soma\"}"
                        }
                    }]
                }
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        });
        let resp = parse_chat_response(&body).unwrap();
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].tool_name, "glossary_create");
        assert_eq!(resp.tool_calls[0].arguments["term"], "Soma");
        assert_eq!(resp.usage.unwrap().total_tokens, 15);
        assert_eq!(resp.finish_reason.as_deref(), Some("tool_calls"));
    }

    #[test]
    fn malformed_tool_arguments_degrade_to_empty_object() {
        let message = serde_json::json!({
            "tool_calls": [{
                "id": "call_1",
                "function": {"name": "glossary_create", "arguments": "{not json"}
            }]
        });
        let calls = parse_tool_calls(&message);
        assert_eq!(calls.len(), 1);
        assert!(calls[0].arguments.as_object().unwrap().is_empty());
    }
}
