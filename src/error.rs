use std::time::Duration;

use thiserror::Error;

use crate::flow::ValidationIssue;

pub type Result<T> = std::result::Result<T, LoomError>;

#[derive(Debug, Error)]
pub enum LoomError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("tool `{tool}` failed: {message}")]
    ToolExecution { tool: String, message: String },
    #[error("model invocation failed: {0}")]
    ModelInvocation(String),
    #[error("resource limit reached: {0}")]
    ResourceLimit(String),
    #[error("validation failed with {} error(s)", .0.len())]
    Validation(Vec<ValidationIssue>),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("{kind} `{id}` not found")]
    NotFound { kind: &'static str, id: String },
    #[error("invalid transition from `{from}` to `{to}`")]
    InvalidTransition { from: String, to: String },
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LoomError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        LoomError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        LoomError::ToolExecution {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// 稳定的错误分类名称，写入 ERROR 事件
    pub fn kind(&self) -> &'static str {
        match self {
            LoomError::Configuration(_) => "configuration",
            LoomError::ToolExecution { .. } => "tool_execution",
            LoomError::ModelInvocation(_) => "model_invocation",
            LoomError::ResourceLimit(_) => "resource_limit",
            LoomError::Validation(_) => "validation",
            LoomError::Timeout(_) => "timeout",
            LoomError::NotFound { .. } => "not_found",
            LoomError::InvalidTransition { .. } => "invalid_transition",
            LoomError::InvalidState(_) => "invalid_state",
            LoomError::Serialization(_) => "serialization",
            LoomError::Other(_) => "internal",
        }
    }
}

impl From<serde_json::Error> for LoomError {
    fn from(err: serde_json::Error) -> Self {
        LoomError::Serialization(err.to_string())
    }
}
