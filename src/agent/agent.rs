use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;

use super::context::InvocationContext;
use super::event::Event;
use super::message::Message;
use crate::error::{LoomError, Result};
use crate::state::SessionState;

/// Lazy, pull-driven sequence of events produced by one agent invocation.
pub type EventStream<'a> = BoxStream<'a, Result<Event>>;

/// Polymorphic execution unit.
///
/// `run` does no work until the returned stream is polled. The stream starts with
/// AGENT_START and ends with exactly one terminal AGENT_END or ERROR; after an ERROR
/// the stream yields the failure itself as `Err`.
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn run<'a>(
        &'a self,
        message: Message,
        ctx: InvocationContext,
        session: SessionState,
    ) -> EventStream<'a>;
}

/// Drains a stream, keeping every event seen even when the run fails.
pub async fn collect_events(mut stream: EventStream<'_>) -> (Vec<Event>, Result<Message>) {
    let mut events = Vec::new();
    while let Some(item) = stream.next().await {
        match item {
            Ok(event) => events.push(event),
            Err(err) => return (events, Err(err)),
        }
    }
    let response = events
        .last()
        .and_then(|event| event.response().cloned())
        .ok_or_else(|| {
            LoomError::InvalidState("agent stream ended without AGENT_END".to_string())
        });
    (events, response)
}

/// Drains a stream and recovers the terminal AGENT_END response.
pub async fn collect_response(stream: EventStream<'_>) -> Result<(Vec<Event>, Message)> {
    let (events, response) = collect_events(stream).await;
    response.map(|response| (events, response))
}

pub(crate) fn validate_sub_agents(kind: &str, agents: &[Arc<dyn Agent>]) -> Result<()> {
    if agents.is_empty() {
        return Err(LoomError::Configuration(format!(
            "{kind} requires at least one sub-agent"
        )));
    }
    let mut seen = HashSet::new();
    for agent in agents {
        if !seen.insert(agent.name()) {
            return Err(LoomError::Configuration(format!(
                "{kind} has duplicate sub-agent `{}`",
                agent.name()
            )));
        }
    }
    Ok(())
}

pub(crate) fn validate_agent_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(LoomError::Configuration("agent name must not be empty".into()));
    }
    Ok(())
}
