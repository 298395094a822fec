use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::context::InvocationContext;
use super::message::{new_id, FunctionCall, FunctionResponse, Message};
use crate::error::LoomError;
use crate::llm::{ModelRequest, ModelResponse};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    AgentStart,
    AgentEnd,
    ModelRequest,
    ModelResponse,
    ToolCall,
    ToolResponse,
    IterationStart,
    IterationEnd,
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::AgentStart => "AGENT_START",
            EventKind::AgentEnd => "AGENT_END",
            EventKind::ModelRequest => "MODEL_REQUEST",
            EventKind::ModelResponse => "MODEL_RESPONSE",
            EventKind::ToolCall => "TOOL_CALL",
            EventKind::ToolResponse => "TOOL_RESPONSE",
            EventKind::IterationStart => "ITERATION_START",
            EventKind::IterationEnd => "ITERATION_END",
            EventKind::Error => "ERROR",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPayload {
    AgentStart { input: Message },
    AgentEnd { response: Message },
    ModelRequest { request: ModelRequest },
    ModelResponse { response: ModelResponse },
    ToolCall { call: FunctionCall },
    ToolResponse { response: FunctionResponse },
    IterationStart { iteration: u32 },
    IterationEnd { iteration: u32, response: Message },
    Error { error_kind: String, message: String },
}

/// One step of agent progress.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: String,
    pub agent: String,
    pub invocation_id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(agent: &str, ctx: &InvocationContext, payload: EventPayload) -> Self {
        Self {
            id: new_id("evt"),
            agent: agent.to_string(),
            invocation_id: ctx.invocation_id.clone(),
            session_id: ctx.session_id.clone(),
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn error(agent: &str, ctx: &InvocationContext, error: &LoomError) -> Self {
        Self::new(
            agent,
            ctx,
            EventPayload::Error {
                error_kind: error.kind().to_string(),
                message: error.to_string(),
            },
        )
    }

    pub fn kind(&self) -> EventKind {
        match &self.payload {
            EventPayload::AgentStart { .. } => EventKind::AgentStart,
            EventPayload::AgentEnd { .. } => EventKind::AgentEnd,
            EventPayload::ModelRequest { .. } => EventKind::ModelRequest,
            EventPayload::ModelResponse { .. } => EventKind::ModelResponse,
            EventPayload::ToolCall { .. } => EventKind::ToolCall,
            EventPayload::ToolResponse { .. } => EventKind::ToolResponse,
            EventPayload::IterationStart { .. } => EventKind::IterationStart,
            EventPayload::IterationEnd { .. } => EventKind::IterationEnd,
            EventPayload::Error { .. } => EventKind::Error,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.kind(), EventKind::AgentEnd | EventKind::Error)
    }

    /// Response carried by an AGENT_END event.
    pub fn response(&self) -> Option<&Message> {
        match &self.payload {
            EventPayload::AgentEnd { response } => Some(response),
            _ => None,
        }
    }
}
