use std::sync::Arc;

use async_stream::try_stream;
use tracing::{debug, warn};

use super::agent::{validate_agent_name, Agent, EventStream};
use super::context::InvocationContext;
use super::event::{Event, EventPayload};
use super::message::{FunctionCall, Message};
use super::tooling::execute_tool_call;
use crate::error::{LoomError, Result};
use crate::llm::{DynModelClient, ModelRequest};
use crate::plugin::{Plugin, PluginSet};
use crate::state::SessionState;
use crate::tools::{AgentTool, Tool, ToolSet};

pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

/// Model-driven agent: call the model, run the requested tools, repeat.
pub struct LlmAgent {
    name: String,
    description: String,
    instruction: Option<String>,
    model: DynModelClient,
    tools: ToolSet,
    plugins: PluginSet,
    max_iterations: u32,
}

impl LlmAgent {
    pub fn builder(name: impl Into<String>, model: DynModelClient) -> LlmAgentBuilder {
        LlmAgentBuilder::new(name, model)
    }

    pub fn instruction(&self) -> Option<&str> {
        self.instruction.as_deref()
    }

    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    fn build_request(&self, messages: &[Message]) -> ModelRequest {
        ModelRequest {
            system_instruction: self.instruction.clone(),
            messages: messages.to_vec(),
            tools: self.tools.declarations(),
        }
    }
}

fn as_model_error(err: LoomError) -> LoomError {
    match err {
        err @ LoomError::ModelInvocation(_) => err,
        other => LoomError::ModelInvocation(other.to_string()),
    }
}

impl Agent for LlmAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn run<'a>(
        &'a self,
        message: Message,
        ctx: InvocationContext,
        session: SessionState,
    ) -> EventStream<'a> {
        Box::pin(try_stream! {
            let agent = self.name.as_str();
            yield Event::new(agent, &ctx, EventPayload::AgentStart { input: message.clone() });
            self.plugins.before_agent(agent, &message, &ctx).await;

            let mut messages = session.messages.clone();
            messages.push(message);
            let mut last_response: Option<Message> = None;
            let mut iteration = 0u32;

            loop {
                if iteration >= self.max_iterations {
                    warn!(agent, max_iterations = self.max_iterations, "llm agent reached its iteration cap");
                    break;
                }
                iteration += 1;

                let request = self.build_request(&messages);
                yield Event::new(agent, &ctx, EventPayload::ModelRequest { request: request.clone() });
                debug!(agent, iteration, messages = request.messages.len(), "calling model");

                let response = match self.model.generate(request).await {
                    Ok(response) => response,
                    Err(err) => {
                        let err = as_model_error(err);
                        self.plugins.on_error(agent, &err, &ctx).await;
                        yield Event::error(agent, &ctx, &err);
                        Err(err)?
                    }
                };
                yield Event::new(agent, &ctx, EventPayload::ModelResponse { response: response.clone() });

                let calls: Vec<FunctionCall> = response
                    .message
                    .function_calls()
                    .into_iter()
                    .cloned()
                    .collect();
                messages.push(response.message.clone());
                last_response = Some(response.message);

                if calls.is_empty() {
                    break;
                }

                for call in calls {
                    yield Event::new(agent, &ctx, EventPayload::ToolCall { call: call.clone() });
                    let tool_session = SessionState {
                        messages: messages.clone(),
                        metadata: session.metadata.clone(),
                    };
                    let tool_response = execute_tool_call(
                        agent,
                        &self.tools,
                        &self.plugins,
                        &call,
                        &ctx,
                        &tool_session,
                    )
                    .await;
                    messages.push(Message::tool_response(tool_response.clone()));
                    yield Event::new(agent, &ctx, EventPayload::ToolResponse { response: tool_response });
                }
            }

            let response = last_response.unwrap_or_else(Message::empty_response);
            self.plugins.after_agent(agent, &response, &ctx).await;
            yield Event::new(agent, &ctx, EventPayload::AgentEnd { response });
        })
    }
}

pub struct LlmAgentBuilder {
    name: String,
    description: String,
    instruction: Option<String>,
    model: DynModelClient,
    tools: Vec<Arc<dyn Tool>>,
    sub_agents: Vec<Arc<dyn Agent>>,
    plugins: Vec<Arc<dyn Plugin>>,
    max_iterations: u32,
}

impl LlmAgentBuilder {
    pub fn new(name: impl Into<String>, model: DynModelClient) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            instruction: None,
            model,
            tools: Vec::new(),
            sub_agents: Vec::new(),
            plugins: Vec::new(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn tools(mut self, tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Self {
        self.tools.extend(tools);
        self
    }

    /// Nested agents are exposed to the model as tools named after the agent.
    pub fn sub_agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.sub_agents.push(agent);
        self
    }

    pub fn plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn build(self) -> Result<LlmAgent> {
        validate_agent_name(&self.name)?;
        if self.max_iterations == 0 {
            return Err(LoomError::Configuration(format!(
                "agent `{}` needs max_iterations >= 1",
                self.name
            )));
        }
        let mut tools = self.tools;
        tools.extend(
            self.sub_agents
                .into_iter()
                .map(|agent| Arc::new(AgentTool::new(agent)) as Arc<dyn Tool>),
        );
        Ok(LlmAgent {
            name: self.name,
            description: self.description,
            instruction: self.instruction,
            model: self.model,
            tools: ToolSet::new(tools)?,
            plugins: PluginSet::new(self.plugins)?,
            max_iterations: self.max_iterations,
        })
    }
}
