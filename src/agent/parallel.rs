use std::sync::Arc;

use async_stream::try_stream;
use futures::future::try_join_all;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tracing::warn;

use super::agent::{collect_events, validate_agent_name, validate_sub_agents, Agent, EventStream};
use super::context::InvocationContext;
use super::event::{Event, EventKind, EventPayload};
use super::message::{Message, MessageRole};
use crate::error::Result;
use crate::state::SessionState;

/// Runs every sub-agent on the same input, multiplexed on the caller's task.
///
/// `wait_for_all` (default): any failure fails the whole join; on success each
/// sub-agent's events are replayed in registration order. Otherwise failures are
/// isolated: events arrive in settlement order and a failing sub-agent contributes a
/// single ERROR event.
pub struct ParallelAgent {
    name: String,
    description: String,
    agents: Vec<Arc<dyn Agent>>,
    wait_for_all: bool,
}

impl ParallelAgent {
    pub fn new(name: impl Into<String>, agents: Vec<Arc<dyn Agent>>) -> Result<Self> {
        let name = name.into();
        validate_agent_name(&name)?;
        validate_sub_agents("parallel agent", &agents)?;
        Ok(Self {
            name,
            description: "Runs sub-agents concurrently on the same input".to_string(),
            agents,
            wait_for_all: true,
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_wait_for_all(mut self, wait_for_all: bool) -> Self {
        self.wait_for_all = wait_for_all;
        self
    }
}

impl Agent for ParallelAgent {
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

            let response = if self.wait_for_all {
                let runs = self.agents.iter().map(|agent| {
                    let stream = agent.run(message.clone(), ctx.clone(), session.clone());
                    async move {
                        let (events, response) = collect_events(stream).await;
                        response.map(|response| (events, response))
                    }
                });
                let results = match try_join_all(runs).await {
                    Ok(results) => results,
                    Err(err) => {
                        yield Event::error(&self.name, &ctx, &err);
                        Err(err)?
                    }
                };

                let mut parts = Vec::new();
                for (events, response) in results {
                    for event in events {
                        yield event;
                    }
                    parts.extend(response.parts);
                }
                Message::new(MessageRole::Assistant, parts)
            } else {
                let mut pending: FuturesUnordered<_> = self
                    .agents
                    .iter()
                    .enumerate()
                    .map(|(position, agent)| {
                        let stream = agent.run(message.clone(), ctx.clone(), session.clone());
                        async move { (position, agent.name(), collect_events(stream).await) }
                    })
                    .collect();

                let mut succeeded: Vec<(usize, Message)> = Vec::new();
                while let Some((position, agent_name, (events, result))) = pending.next().await {
                    match result {
                        Ok(response) => {
                            for event in events {
                                yield event;
                            }
                            succeeded.push((position, response));
                        }
                        Err(err) => {
                            warn!(agent = %self.name, sub_agent = agent_name, error = %err, "sub-agent failed; continuing with siblings");
                            for event in events.into_iter().filter(|event| event.kind() != EventKind::Error) {
                                yield event;
                            }
                            yield Event::error(agent_name, &ctx, &err);
                        }
                    }
                }

                if succeeded.is_empty() {
                    Message::empty_response()
                } else {
                    succeeded.sort_by_key(|(position, _)| *position);
                    let parts = succeeded
                        .into_iter()
                        .flat_map(|(_, response)| response.parts)
                        .collect();
                    Message::new(MessageRole::Assistant, parts)
                }
            };

            yield Event::new(&self.name, &ctx, EventPayload::AgentEnd { response });
        })
    }
}
