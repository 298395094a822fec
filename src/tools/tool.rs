use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::InvocationContext;
use crate::error::Result;
use crate::llm::ToolDeclaration;
use crate::state::SessionState;

/// Result of a single tool execution.
///
/// Long-running tools answer with `Pending`; the real value is delivered later through
/// [`PendingToolCalls`](super::PendingToolCalls) keyed by the correlation id.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum ToolOutcome {
    Completed(Value),
    Pending(String),
}

#[derive(Clone, Copy)]
pub struct ToolContext<'a> {
    pub invocation: &'a InvocationContext,
    pub session: &'a SessionState,
    pub call_id: &'a str,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// JSON schema of the accepted arguments.
    fn parameters(&self) -> Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    fn is_long_running(&self) -> bool {
        false
    }

    async fn execute(&self, args: Value, ctx: ToolContext<'_>) -> Result<ToolOutcome>;

    fn declaration(&self) -> ToolDeclaration {
        ToolDeclaration {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}
