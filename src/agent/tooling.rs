use serde_json::Value;
use tracing::{debug, warn};

use super::context::InvocationContext;
use super::message::{new_id, FunctionCall, FunctionResponse};
use crate::error::LoomError;
use crate::plugin::PluginSet;
use crate::state::SessionState;
use crate::tools::{ToolContext, ToolOutcome, ToolSet};

/// Executes one tool call. Failures are converted into an error-tagged response.
pub(crate) async fn execute_tool_call(
    agent: &str,
    tools: &ToolSet,
    plugins: &PluginSet,
    call: &FunctionCall,
    ctx: &InvocationContext,
    session: &SessionState,
) -> FunctionResponse {
    plugins.before_tool_call(call, ctx).await;

    let response = match tools.get(&call.name) {
        None => {
            let err = LoomError::not_found("tool", &call.name);
            warn!(agent, tool = %call.name, "model requested an unknown tool");
            plugins.on_error(agent, &err, ctx).await;
            FunctionResponse::error(call, err.to_string())
        }
        Some(tool) => {
            let tool_ctx = ToolContext {
                invocation: ctx,
                session,
                call_id: &call.id,
            };
            let args = if call.args.is_null() {
                Value::Object(Default::default())
            } else {
                call.args.clone()
            };
            match tool.execute(args, tool_ctx).await {
                Ok(ToolOutcome::Completed(value)) => {
                    debug!(agent, tool = %call.name, "tool call completed");
                    FunctionResponse::completed(call, value)
                }
                Ok(ToolOutcome::Pending(correlation_id)) => {
                    let correlation_id = if correlation_id.is_empty() {
                        new_id("pending")
                    } else {
                        correlation_id
                    };
                    if !tool.is_long_running() {
                        debug!(agent, tool = %call.name, "tool returned pending without being long-running");
                    }
                    ctx.pending_calls
                        .register(&correlation_id, &call.name, &call.id);
                    FunctionResponse::pending(call, &correlation_id)
                }
                Err(err) => {
                    let err = match err {
                        err @ LoomError::ToolExecution { .. } => err,
                        other => LoomError::tool(&call.name, other.to_string()),
                    };
                    warn!(agent, tool = %call.name, error = %err, "tool call failed");
                    plugins.on_error(agent, &err, ctx).await;
                    FunctionResponse::error(call, err.to_string())
                }
            }
        }
    };

    plugins.after_tool_call(call, &response, ctx).await;
    response
}
