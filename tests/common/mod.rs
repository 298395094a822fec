#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use agentloom::agent::{Agent, Event, EventPayload, EventStream, InvocationContext, Message};
use agentloom::llm::{ModelClient, ModelRequest, ModelResponse};
use agentloom::{LoomError, SessionState};
use async_stream::try_stream;
use async_trait::async_trait;
use parking_lot::Mutex;

/// Model fake that replays scripted replies, then answers "done".
pub struct ScriptedModel {
    replies: Mutex<VecDeque<agentloom::Result<Message>>>,
    requests: Mutex<Vec<ModelRequest>>,
    delay: Option<Duration>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<Message>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().map(Ok).collect()),
            requests: Mutex::new(Vec::new()),
            delay: None,
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::from([Err(LoomError::ModelInvocation(
                message.to_string(),
            ))])),
            requests: Mutex::new(Vec::new()),
            delay: None,
        })
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            delay: Some(delay),
        })
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn generate(&self, request: ModelRequest) -> agentloom::Result<ModelResponse> {
        self.requests.lock().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let reply = self
            .replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(Message::assistant("done")));
        reply.map(ModelResponse::new)
    }
}

/// Deterministic agent: answers with a fixed reply (or fails) and records its inputs.
pub struct StaticAgent {
    name: String,
    reply: Option<Message>,
    delay: Duration,
    inputs: Mutex<Vec<Message>>,
}

impl StaticAgent {
    pub fn replying(name: &str, text: &str) -> Arc<Self> {
        Self::build(name, Some(Message::assistant(text)), Duration::ZERO)
    }

    pub fn failing(name: &str) -> Arc<Self> {
        Self::build(name, None, Duration::ZERO)
    }

    pub fn delayed(name: &str, text: &str, delay: Duration) -> Arc<Self> {
        Self::build(name, Some(Message::assistant(text)), delay)
    }

    fn build(name: &str, reply: Option<Message>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            reply,
            delay,
            inputs: Mutex::new(Vec::new()),
        })
    }

    pub fn inputs(&self) -> Vec<Message> {
        self.inputs.lock().clone()
    }
}

impl Agent for StaticAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(
        &'a self,
        message: Message,
        ctx: InvocationContext,
        _session: SessionState,
    ) -> EventStream<'a> {
        Box::pin(try_stream! {
            self.inputs.lock().push(message.clone());
            yield Event::new(&self.name, &ctx, EventPayload::AgentStart { input: message });
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match &self.reply {
                Some(reply) => {
                    yield Event::new(&self.name, &ctx, EventPayload::AgentEnd { response: reply.clone() });
                }
                None => {
                    let err = LoomError::InvalidState(format!("{} broke", self.name));
                    yield Event::error(&self.name, &ctx, &err);
                    Err::<(), _>(err)?;
                }
            }
        })
    }
}

pub fn ctx() -> InvocationContext {
    InvocationContext::new("session-test")
}
