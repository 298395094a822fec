use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::types::{RunMetrics, RunOutcome, RunnerEvent, RunnerListener, RunnerMetrics};
use crate::agent::{collect_events, Agent, Event, EventKind, InvocationContext, Message};
use crate::config::RunnerConfig;
use crate::error::{LoomError, Result};
use crate::state::{SessionState, SessionStore};

/// Runner：围绕一个根 Agent 的迭代驱动器
///
/// 拥有按 session id 保存的会话状态、运行指标和整体墙钟超时。
/// 同一 session 的并发运行按到达顺序串行执行。
pub struct Runner {
    agent: Arc<dyn Agent>,
    config: RunnerConfig,
    sessions: SessionStore,
    listeners: RwLock<Vec<Arc<dyn RunnerListener>>>,
    metrics: Mutex<RunnerMetrics>,
}

impl Runner {
    pub fn new(agent: Arc<dyn Agent>, config: RunnerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            agent,
            config,
            sessions: SessionStore::new(),
            listeners: RwLock::new(Vec::new()),
            metrics: Mutex::new(RunnerMetrics::default()),
        })
    }

    pub fn with_defaults(agent: Arc<dyn Agent>) -> Self {
        Self {
            agent,
            config: RunnerConfig::default(),
            sessions: SessionStore::new(),
            listeners: RwLock::new(Vec::new()),
            metrics: Mutex::new(RunnerMetrics::default()),
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn add_listener(&self, listener: Arc<dyn RunnerListener>) {
        self.listeners.write().push(listener);
    }

    pub fn metrics(&self) -> RunnerMetrics {
        self.metrics.lock().clone()
    }

    pub fn session(&self, session_id: &str) -> Option<SessionState> {
        self.sessions.get(session_id)
    }

    /// Seeds or replaces a session; the state is copied and trimmed.
    pub fn set_session(&self, session_id: &str, state: SessionState) {
        let mut state = state;
        state.trim(self.config.max_history_size);
        self.sessions.put(session_id, state);
    }

    pub fn clear_session(&self, session_id: &str) -> Option<SessionState> {
        self.sessions.remove(session_id)
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.ids()
    }

    pub async fn run(
        &self,
        session_id: &str,
        message: Message,
        ctx: InvocationContext,
    ) -> Result<RunOutcome> {
        let lock = self.sessions.session_lock(session_id);
        let _guard = lock.lock().await;

        let started = Instant::now();
        let mut session = self.sessions.get(session_id).unwrap_or_default();
        let mut metrics = RunMetrics::default();
        let mut events = Vec::new();

        info!(agent = %self.agent.name(), session_id, "run started");
        self.emit(&RunnerEvent::RunStart {
            session_id: session_id.to_string(),
            agent: self.agent.name().to_string(),
        });

        let timeout = self.config.timeout();
        let result = tokio::time::timeout(
            timeout,
            self.iterate(session_id, &mut session, message, &ctx, &mut metrics, &mut events),
        )
        .await
        .unwrap_or_else(|_| {
            warn!(session_id, timeout_ms = self.config.timeout_ms, "run timed out");
            metrics.errors += 1;
            Err(LoomError::Timeout(timeout))
        });

        metrics.execution_time = started.elapsed();
        let success = result.is_ok();
        self.metrics.lock().record(&metrics, success);
        self.emit(&RunnerEvent::RunComplete {
            session_id: session_id.to_string(),
            iterations: metrics.iterations,
            duration_ms: metrics.execution_time.as_millis() as u64,
            success,
        });

        let response = result?;
        self.sessions.put(session_id, session.clone());
        info!(
            session_id,
            iterations = metrics.iterations,
            tool_calls = metrics.tool_calls,
            "run completed"
        );
        Ok(RunOutcome {
            session_id: session_id.to_string(),
            response,
            events,
            session,
            metrics,
        })
    }

    async fn iterate(
        &self,
        session_id: &str,
        session: &mut SessionState,
        message: Message,
        ctx: &InvocationContext,
        metrics: &mut RunMetrics,
        events: &mut Vec<Event>,
    ) -> Result<Message> {
        let max_history = self.config.max_history_size;
        session.push(message.clone());
        session.trim(max_history);

        let mut input = message;
        let mut iteration = 0u32;
        loop {
            iteration += 1;
            metrics.iterations = iteration;
            self.emit(&RunnerEvent::IterationStart {
                session_id: session_id.to_string(),
                iteration,
            });

            // 当前输入总是历史的最后一条，agent 只看到它之前的部分
            let mut history = session.clone();
            history.messages.pop();

            let stream = self.agent.run(input, ctx.clone(), history);
            let (iteration_events, result) = collect_events(stream).await;
            metrics.tool_calls += count_kind(&iteration_events, EventKind::ToolCall);
            let failures = match &result {
                // 成功时只剩 best-effort 并行吸收的失败，每个恰好一条 ERROR
                Ok(_) => count_kind(&iteration_events, EventKind::Error),
                Err(_) => 1,
            };
            metrics.errors += failures;
            events.extend(iteration_events);

            let response = match result {
                Ok(response) => response,
                Err(err) => {
                    warn!(session_id, iteration, error = %err, "iteration failed");
                    self.emit(&RunnerEvent::IterationError {
                        session_id: session_id.to_string(),
                        iteration,
                        error: err.to_string(),
                    });
                    return Err(err);
                }
            };

            session.push(response.clone());
            session.trim(max_history);
            let has_tool_calls = response.has_function_calls();
            self.emit(&RunnerEvent::IterationComplete {
                session_id: session_id.to_string(),
                iteration,
                has_tool_calls,
            });

            if !has_tool_calls {
                return Ok(response);
            }
            if iteration >= self.config.max_iterations {
                warn!(
                    session_id,
                    max_iterations = self.config.max_iterations,
                    "runner reached max iterations with unresolved tool calls"
                );
                self.emit(&RunnerEvent::MaxIterationsReached {
                    session_id: session_id.to_string(),
                    max_iterations: self.config.max_iterations,
                });
                return Ok(response);
            }
            debug!(session_id, iteration, "response still carries tool calls; continuing");
            input = response;
        }
    }

    fn emit(&self, event: &RunnerEvent) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener.on_event(event))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(event = event.name(), error = %err, "runner listener failed")
                }
                Err(_) => warn!(event = event.name(), "runner listener panicked"),
            }
        }
    }
}

fn count_kind(events: &[Event], kind: EventKind) -> u32 {
    events.iter().filter(|event| event.kind() == kind).count() as u32
}
