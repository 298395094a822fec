use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    System,
    Assistant,
    Tool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

impl FunctionCall {
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self {
            id: new_id("call"),
            name: name.into(),
            args,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    Completed,
    Pending,
    Error,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: Value,
    pub status: ToolCallStatus,
}

impl FunctionResponse {
    pub fn completed(call: &FunctionCall, response: Value) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            response,
            status: ToolCallStatus::Completed,
        }
    }

    pub fn pending(call: &FunctionCall, correlation_id: &str) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            response: serde_json::json!({
                "status": "pending",
                "correlation_id": correlation_id,
            }),
            status: ToolCallStatus::Pending,
        }
    }

    pub fn error(call: &FunctionCall, error: impl Into<String>) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            response: serde_json::json!({ "error": error.into() }),
            status: ToolCallStatus::Error,
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == ToolCallStatus::Error
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text { text: String },
    FunctionCall(FunctionCall),
    FunctionResponse(FunctionResponse),
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }
}

/// 对话消息：角色 + 有序内容片段
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    pub parts: Vec<Part>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl Message {
    pub fn new(role: MessageRole, parts: Vec<Part>) -> Self {
        Self {
            role,
            parts,
            metadata: Map::new(),
        }
    }

    pub fn text(role: MessageRole, text: impl Into<String>) -> Self {
        Self::new(role, vec![Part::text(text)])
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text(MessageRole::User, text)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::text(MessageRole::System, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text(MessageRole::Assistant, text)
    }

    pub fn tool_response(response: FunctionResponse) -> Self {
        Self::new(MessageRole::Tool, vec![Part::FunctionResponse(response)])
    }

    /// Placeholder result used when an agent produced no response at all.
    pub fn empty_response() -> Self {
        Self::new(MessageRole::Assistant, Vec::new())
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Concatenation of all text parts.
    pub fn text_content(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn function_calls(&self) -> Vec<&FunctionCall> {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::FunctionCall(call) => Some(call),
                _ => None,
            })
            .collect()
    }

    pub fn has_function_calls(&self) -> bool {
        self.parts
            .iter()
            .any(|part| matches!(part, Part::FunctionCall(_)))
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

pub fn new_id(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_content_skips_non_text_parts() {
        let call = FunctionCall::new("lookup", json!({"q": "rust"}));
        let message = Message::new(
            MessageRole::Assistant,
            vec![
                Part::text("hello "),
                Part::FunctionCall(call),
                Part::text("world"),
            ],
        );
        assert_eq!(message.text_content(), "hello world");
        assert!(message.has_function_calls());
        assert_eq!(message.function_calls()[0].name, "lookup");
    }

    #[test]
    fn error_response_is_tagged() {
        let call = FunctionCall::new("missing", json!({}));
        let response = FunctionResponse::error(&call, "tool `missing` not found");
        assert!(response.is_error());
        assert_eq!(response.id, call.id);
        assert_eq!(response.response["error"], "tool `missing` not found");
    }

    #[test]
    fn part_serializes_with_type_tag() {
        let value = serde_json::to_value(Part::text("hi")).unwrap();
        assert_eq!(value, json!({"type": "text", "text": "hi"}));
    }
}
