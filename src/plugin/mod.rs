use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::agent::{FunctionCall, FunctionResponse, InvocationContext, Message};
use crate::error::{LoomError, Result};

/// Lifecycle hooks around agent runs and tool calls.
///
/// Every hook is optional. A failing hook is logged and otherwise ignored.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    async fn before_agent(
        &self,
        _agent: &str,
        _input: &Message,
        _ctx: &InvocationContext,
    ) -> Result<()> {
        Ok(())
    }

    async fn after_agent(
        &self,
        _agent: &str,
        _response: &Message,
        _ctx: &InvocationContext,
    ) -> Result<()> {
        Ok(())
    }

    async fn before_tool_call(&self, _call: &FunctionCall, _ctx: &InvocationContext) -> Result<()> {
        Ok(())
    }

    async fn after_tool_call(
        &self,
        _call: &FunctionCall,
        _response: &FunctionResponse,
        _ctx: &InvocationContext,
    ) -> Result<()> {
        Ok(())
    }

    async fn on_error(
        &self,
        _agent: &str,
        _error: &LoomError,
        _ctx: &InvocationContext,
    ) -> Result<()> {
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct PluginSet {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginSet {
    pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> Result<Self> {
        let mut seen = HashSet::new();
        for plugin in &plugins {
            if !seen.insert(plugin.name().to_string()) {
                return Err(LoomError::Configuration(format!(
                    "duplicate plugin name `{}`",
                    plugin.name()
                )));
            }
        }
        Ok(Self { plugins })
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub async fn before_agent(&self, agent: &str, input: &Message, ctx: &InvocationContext) {
        for plugin in &self.plugins {
            if let Err(err) = plugin.before_agent(agent, input, ctx).await {
                log_hook_failure(plugin.name(), "before_agent", &err);
            }
        }
    }

    pub async fn after_agent(&self, agent: &str, response: &Message, ctx: &InvocationContext) {
        for plugin in &self.plugins {
            if let Err(err) = plugin.after_agent(agent, response, ctx).await {
                log_hook_failure(plugin.name(), "after_agent", &err);
            }
        }
    }

    pub async fn before_tool_call(&self, call: &FunctionCall, ctx: &InvocationContext) {
        for plugin in &self.plugins {
            if let Err(err) = plugin.before_tool_call(call, ctx).await {
                log_hook_failure(plugin.name(), "before_tool_call", &err);
            }
        }
    }

    pub async fn after_tool_call(
        &self,
        call: &FunctionCall,
        response: &FunctionResponse,
        ctx: &InvocationContext,
    ) {
        for plugin in &self.plugins {
            if let Err(err) = plugin.after_tool_call(call, response, ctx).await {
                log_hook_failure(plugin.name(), "after_tool_call", &err);
            }
        }
    }

    pub async fn on_error(&self, agent: &str, error: &LoomError, ctx: &InvocationContext) {
        for plugin in &self.plugins {
            if let Err(err) = plugin.on_error(agent, error, ctx).await {
                log_hook_failure(plugin.name(), "on_error", &err);
            }
        }
    }
}

fn log_hook_failure(plugin: &str, hook: &'static str, err: &LoomError) {
    warn!(plugin, hook, error = %err, "plugin hook failed; ignoring");
}
