use serde::{Deserialize, Serialize};

/// A tool invocation emitted by the model (wire-format agnostic).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
}

/// Tool definition exposed to the LLM (OpenAI function-calling shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}

/// A message in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

// ── Convenience constructors ───────────────────────────────────────

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }

    /// An assistant message that carries both text and tool invocations.
    ///
    /// Used when replaying recorded turns: the model's tool calls must be
    /// present in the rebuilt history or the tool-result turns that follow
    /// would dangle.
    pub fn assistant_with_tool_calls(text: &str, calls: &[ToolCall]) -> Self {
        let mut parts = Vec::with_capacity(1 + calls.len());
        if !text.is_empty() {
            parts.push(ContentPart::Text { text: text.into() });
        }
        for call in calls {
            parts.push(ContentPart::ToolUse {
                id: call.call_id.clone(),
                name: call.tool_name.clone(),
                input: call.arguments.clone(),
            });
        }
        Self {
            role: Role::Assistant,
            content: MessageContent::Parts(parts),
        }
    }

    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::Parts(vec![ContentPart::ToolResult {
                tool_use_id: tool_use_id.into(),
                content: content.into(),
                is_error: false,
            }]),
        }
    }
}

impl MessageContent {
    /// Extract and join all text content.
    pub fn extract_all_text(&self) -> String {
        match self {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Token usage reported for a completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assistant_with_tool_calls_orders_parts() {
        let calls = vec![ToolCall {
            call_id: "c1".into(),
            tool_name: "glossary_search".into(),
            arguments: serde_json::json!({"query": "soma"}),
        }];
        let msg = Message::assistant_with_tool_calls("looking it up", &calls);
        match &msg.content {
            MessageContent::Parts(parts) => {
                assert!(matches!(parts[0], ContentPart::Text { .. }));
                assert!(matches!(parts[1], ContentPart::ToolUse { .. }));
            }
            _ => panic!("expected parts"),
        }
    }

    #[test]
    fn empty_text_is_omitted_from_parts() {
        let calls = vec![ToolCall {
            call_id: "c1".into(),
            tool_name: "read_post".into(),
            arguments: serde_json::json!({"post_id": 7}),
        }];
        let msg = Message::assistant_with_tool_calls("", &calls);
        match &msg.content {
            MessageContent::Parts(parts) => assert_eq!(parts.len(), 1),
            _ => panic!("expected parts"),
        }
    }

    #[test]
    fn extract_all_text_joins_with_newline() {
        let content = MessageContent::Parts(vec![
            ContentPart::Text {
                text: "line one".into(),
            },
            ContentPart::ToolUse {
                id: "c1".into(),
                name: "read_post".into(),
                input: serde_json::json!({}),
            },
            ContentPart::Text {
                text: "line two".into(),
            },
        ]);
        assert_eq!(content.extract_all_text(), "line one\nline two");
    }
}
