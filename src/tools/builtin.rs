use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::tool::{Tool, ToolContext, ToolOutcome};
use crate::agent::{collect_response, Agent, Message};
use crate::error::{LoomError, Result};

type ToolFn = Arc<dyn Fn(Value) -> Result<Value> + Send + Sync>;

/// Tool backed by a plain closure.
pub struct FunctionTool {
    name: String,
    description: String,
    parameters: Value,
    func: ToolFn,
}

impl FunctionTool {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: String::new(),
            parameters: json!({ "type": "object", "properties": {} }),
            func: Arc::new(func),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }
}

#[async_trait]
impl Tool for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        self.parameters.clone()
    }

    async fn execute(&self, args: Value, _ctx: ToolContext<'_>) -> Result<ToolOutcome> {
        (self.func)(args).map(ToolOutcome::Completed)
    }
}

/// Exposes a nested agent as a tool; the result is the agent's final text.
pub struct AgentTool {
    agent: Arc<dyn Agent>,
}

impl AgentTool {
    pub fn new(agent: Arc<dyn Agent>) -> Self {
        Self { agent }
    }

    fn request_text(args: &Value) -> String {
        if let Some(text) = args.as_str() {
            return text.to_string();
        }
        if let Some(text) = args.get("request").and_then(Value::as_str) {
            return text.to_string();
        }
        args.to_string()
    }
}

#[async_trait]
impl Tool for AgentTool {
    fn name(&self) -> &str {
        self.agent.name()
    }

    fn description(&self) -> &str {
        self.agent.description()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "request": { "type": "string" } },
            "required": ["request"],
        })
    }

    async fn execute(&self, args: Value, ctx: ToolContext<'_>) -> Result<ToolOutcome> {
        let message = Message::user(Self::request_text(&args));
        let stream = self
            .agent
            .run(message, ctx.invocation.clone(), ctx.session.clone());
        let (_, response) = collect_response(stream)
            .await
            .map_err(|err| LoomError::tool(self.agent.name(), err.to_string()))?;
        Ok(ToolOutcome::Completed(
            json!({ "response": response.text_content() }),
        ))
    }
}

/// Queries the memory service attached to the invocation context.
pub struct MemorySearchTool {
    limit: usize,
}

impl MemorySearchTool {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }
}

impl Default for MemorySearchTool {
    fn default() -> Self {
        Self::new(5)
    }
}

#[async_trait]
impl Tool for MemorySearchTool {
    fn name(&self) -> &str {
        "memory_search"
    }

    fn description(&self) -> &str {
        "Searches long-term memory for entries relevant to a query"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "query": { "type": "string" } },
            "required": ["query"],
        })
    }

    async fn execute(&self, args: Value, ctx: ToolContext<'_>) -> Result<ToolOutcome> {
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| LoomError::tool(self.name(), "missing `query` argument"))?;
        let memory = ctx
            .invocation
            .memory
            .as_ref()
            .ok_or_else(|| LoomError::tool(self.name(), "no memory service configured"))?;
        let mut entries = memory.search(query, ctx.invocation).await?;
        entries.truncate(self.limit);
        Ok(ToolOutcome::Completed(json!({ "results": entries })))
    }
}
