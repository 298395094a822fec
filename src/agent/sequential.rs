use std::sync::Arc;

use async_stream::try_stream;
use futures::StreamExt;

use super::agent::{validate_agent_name, validate_sub_agents, Agent, EventStream};
use super::context::InvocationContext;
use super::event::{Event, EventPayload};
use super::message::{Message, MessageRole};
use crate::error::Result;
use crate::state::SessionState;

/// Runs sub-agents in declaration order.
///
/// With `pass_results` (the default) agent *i*'s final response becomes agent *i+1*'s
/// input. The combined response concatenates every sub-agent's parts in order.
pub struct SequentialAgent {
    name: String,
    description: String,
    agents: Vec<Arc<dyn Agent>>,
    pass_results: bool,
}

impl SequentialAgent {
    pub fn new(name: impl Into<String>, agents: Vec<Arc<dyn Agent>>) -> Result<Self> {
        let name = name.into();
        validate_agent_name(&name)?;
        validate_sub_agents("sequential agent", &agents)?;
        Ok(Self {
            name,
            description: "Runs sub-agents in order, piping results".to_string(),
            agents,
            pass_results: true,
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_pass_results(mut self, pass_results: bool) -> Self {
        self.pass_results = pass_results;
        self
    }
}

impl Agent for SequentialAgent {
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
            yield Event::new(&self.name, &ctx, EventPayload::AgentStart { input: message.clone() });

            let mut next_input = message.clone();
            let mut parts = Vec::new();

            for agent in &self.agents {
                let input = if self.pass_results { next_input.clone() } else { message.clone() };
                let mut stream = agent.run(input, ctx.clone(), session.clone());
                let mut response: Option<Message> = None;

                while let Some(item) = stream.next().await {
                    match item {
                        Ok(event) => {
                            response = event.response().cloned();
                            yield event;
                        }
                        Err(err) => {
                            yield Event::error(&self.name, &ctx, &err);
                            Err::<(), _>(err)?;
                        }
                    }
                }

                let response = response.unwrap_or_else(Message::empty_response);
                parts.extend(response.parts.iter().cloned());
                next_input = response;
            }

            let response = Message::new(MessageRole::Assistant, parts);
            yield Event::new(&self.name, &ctx, EventPayload::AgentEnd { response });
        })
    }
}
