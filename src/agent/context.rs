use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::message::new_id;
use crate::error::Result;
use crate::tools::PendingToolCalls;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MemoryEntry {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

/// Memory-search collaborator.
#[async_trait]
pub trait MemoryService: Send + Sync {
    async fn search(&self, query: &str, ctx: &InvocationContext) -> Result<Vec<MemoryEntry>>;
}

/// Ambient identifiers and services passed to every agent and tool call.
#[derive(Clone)]
pub struct InvocationContext {
    pub invocation_id: String,
    pub session_id: String,
    pub user_id: Option<String>,
    pub app_name: Option<String>,
    pub request_id: String,
    pub memory: Option<Arc<dyn MemoryService>>,
    pub pending_calls: Arc<PendingToolCalls>,
}

impl InvocationContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            invocation_id: new_id("inv"),
            session_id: session_id.into(),
            user_id: None,
            app_name: None,
            request_id: new_id("req"),
            memory: None,
            pending_calls: Arc::new(PendingToolCalls::new()),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_app(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = Some(app_name.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryService>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_pending_calls(mut self, pending_calls: Arc<PendingToolCalls>) -> Self {
        self.pending_calls = pending_calls;
        self
    }
}

impl fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationContext")
            .field("invocation_id", &self.invocation_id)
            .field("session_id", &self.session_id)
            .field("user_id", &self.user_id)
            .field("app_name", &self.app_name)
            .field("request_id", &self.request_id)
            .field("has_memory", &self.memory.is_some())
            .finish()
    }
}
