use std::sync::Arc;

use async_stream::try_stream;
use futures::StreamExt;
use tracing::debug;

use super::agent::{validate_agent_name, Agent, EventStream};
use super::context::InvocationContext;
use super::event::{Event, EventPayload};
use super::message::Message;
use crate::error::Result;
use crate::state::SessionState;

/// Decides whether another iteration runs: `(iteration, last_response, ctx)`.
pub type LoopCondition =
    Arc<dyn Fn(u32, Option<&Message>, &InvocationContext) -> bool + Send + Sync>;

/// Computes the next iteration's input from the previous response.
pub type LoopTransform = Arc<dyn Fn(&Message) -> Message + Send + Sync>;

/// Re-invokes one wrapped agent up to `max_iterations` times.
pub struct LoopAgent {
    name: String,
    description: String,
    agent: Arc<dyn Agent>,
    max_iterations: u32,
    condition: Option<LoopCondition>,
    transform: Option<LoopTransform>,
}

impl LoopAgent {
    pub fn new(name: impl Into<String>, agent: Arc<dyn Agent>) -> Result<Self> {
        let name = name.into();
        validate_agent_name(&name)?;
        Ok(Self {
            name,
            description: "Re-runs an agent until its condition stops it".to_string(),
            agent,
            max_iterations: super::llm_agent::DEFAULT_MAX_ITERATIONS,
            condition: None,
            transform: None,
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(u32, Option<&Message>, &InvocationContext) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(condition));
        self
    }

    pub fn with_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(&Message) -> Message + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }
}

impl Agent for LoopAgent {
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

            let mut input = message;
            let mut last_response: Option<Message> = None;

            for iteration in 0..self.max_iterations {
                if let Some(condition) = &self.condition {
                    if !condition(iteration, last_response.as_ref(), &ctx) {
                        debug!(agent = %self.name, iteration, "loop condition stopped iteration");
                        break;
                    }
                }

                yield Event::new(&self.name, &ctx, EventPayload::IterationStart { iteration });

                let mut stream = self.agent.run(input.clone(), ctx.clone(), session.clone());
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
                yield Event::new(
                    &self.name,
                    &ctx,
                    EventPayload::IterationEnd { iteration, response: response.clone() },
                );

                if let Some(transform) = &self.transform {
                    input = transform(&response);
                }
                last_response = Some(response);
            }

            let response = last_response.unwrap_or_else(Message::empty_response);
            yield Event::new(&self.name, &ctx, EventPayload::AgentEnd { response });
        })
    }
}
