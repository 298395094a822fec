use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::json;
use tracing::{debug, info, warn};

use super::conditions::evaluate_all;
use super::executor::{StepExecutorRegistry, StepOutcome};
use super::mapping::{apply_output, resolve_input};
use super::types::{
    ExecutionMode, FlowConfig, FlowExecutionResult, FlowStep, RetryConfig, StepResult, StepStatus,
};
use crate::config::FlowManagerConfig;
use crate::error::{LoomError, Result};
use crate::state::FlowContext;

/// 协作式取消标记，在步骤之间检查
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

enum RunEnd {
    Completed,
    Paused(String),
    Cancelled,
}

/// Flow 执行引擎
///
/// 依赖就绪的步骤按声明顺序调度；parallel 模式下每批最多
/// `max_parallel_steps` 个步骤并发。
pub struct FlowEngine {
    executors: Arc<StepExecutorRegistry>,
    max_parallel_steps: usize,
    default_step_timeout: Option<Duration>,
}

impl FlowEngine {
    pub fn new(executors: Arc<StepExecutorRegistry>) -> Self {
        Self::with_config(executors, &FlowManagerConfig::default())
    }

    pub fn with_config(executors: Arc<StepExecutorRegistry>, config: &FlowManagerConfig) -> Self {
        Self {
            executors,
            max_parallel_steps: config.max_parallel_steps.max(1),
            default_step_timeout: config.default_step_timeout_ms.map(Duration::from_millis),
        }
    }

    pub fn executors(&self) -> &Arc<StepExecutorRegistry> {
        &self.executors
    }

    pub async fn execute(&self, flow: &FlowConfig, ctx: FlowContext) -> FlowExecutionResult {
        self.execute_with_cancel(flow, ctx, &CancelFlag::new()).await
    }

    /// Runs the flow to a terminal state; failures become a FAILED result, never `Err`.
    pub async fn execute_with_cancel(
        &self,
        flow: &FlowConfig,
        mut ctx: FlowContext,
        cancel: &CancelFlag,
    ) -> FlowExecutionResult {
        let mut result = FlowExecutionResult::for_context(&ctx);
        result.flow_id = flow.id.clone();
        if let Err(err) = result.start() {
            result.error = Some(err.to_string());
            return result;
        }
        info!(flow_id = %flow.id, execution_id = %result.execution_id, "flow execution started");

        let mut records: HashMap<String, StepResult> = HashMap::new();
        let run = self.run_steps(flow, &mut ctx, &mut records, cancel);
        let end = match flow.timeout() {
            Some(limit) => tokio::time::timeout(limit, run)
                .await
                .unwrap_or(Err(LoomError::Timeout(limit))),
            None => run.await,
        };

        result.steps = flow
            .steps
            .iter()
            .filter_map(|step| records.remove(&step.id))
            .collect();

        let end = match end {
            Ok(_) if cancel.is_cancelled() => Ok(RunEnd::Cancelled),
            other => other,
        };
        let transition = match end {
            Ok(RunEnd::Completed) => result.complete(ctx.output),
            Ok(RunEnd::Paused(reason)) => {
                result.output = ctx.output;
                result.pause(reason)
            }
            Ok(RunEnd::Cancelled) => {
                result.output = ctx.output;
                result.cancel()
            }
            Err(err) => {
                result.output = ctx.output;
                result.fail(err.to_string())
            }
        };
        if let Err(err) = transition {
            warn!(execution_id = %result.execution_id, error = %err, "unexpected flow state transition");
        }

        info!(
            flow_id = %flow.id,
            execution_id = %result.execution_id,
            state = %result.state,
            "flow execution finished"
        );
        result
    }

    async fn run_steps(
        &self,
        flow: &FlowConfig,
        ctx: &mut FlowContext,
        records: &mut HashMap<String, StepResult>,
        cancel: &CancelFlag,
    ) -> Result<RunEnd> {
        let batch_size = match flow.execution_mode {
            ExecutionMode::Sequential => 1,
            ExecutionMode::Parallel => self.max_parallel_steps,
        };

        loop {
            if cancel.is_cancelled() {
                return Ok(RunEnd::Cancelled);
            }

            let pending: Vec<&FlowStep> = flow
                .steps
                .iter()
                .filter(|step| !records.contains_key(&step.id))
                .collect();
            if pending.is_empty() {
                return Ok(RunEnd::Completed);
            }
            let ready: Vec<&FlowStep> = pending
                .into_iter()
                .filter(|step| dependencies_settled(step, records))
                .take(batch_size)
                .collect();
            if ready.is_empty() {
                return Err(LoomError::InvalidState(
                    "remaining steps have unresolvable dependencies".into(),
                ));
            }

            let view = ctx.view();
            let mut runnable = Vec::new();
            for step in ready {
                if evaluate_all(&step.conditions, &view) {
                    runnable.push(step);
                } else {
                    debug!(step_id = %step.id, "step conditions not met; skipping");
                    ctx.steps
                        .insert(step.id.clone(), json!({ "status": StepStatus::Skipped }));
                    records.insert(step.id.clone(), StepResult::skipped(&step.id));
                }
            }

            let snapshot: &FlowContext = ctx;
            let mut running: FuturesUnordered<_> = runnable
                .into_iter()
                .map(|step| self.run_step(flow, step, snapshot))
                .collect();
            let mut settled = Vec::new();
            while let Some(item) = running.next().await {
                settled.push(item);
            }
            drop(running);

            let mut failure = None;
            let mut paused = None;
            for (step, record, outcome) in settled {
                match outcome {
                    Ok(StepOutcome::Completed(output)) => {
                        ctx.steps.insert(
                            step.id.clone(),
                            json!({ "status": StepStatus::Completed, "output": output }),
                        );
                        let assigned = apply_output(step, &output, ctx);
                        ctx.output.insert(step.id.clone(), output);
                        ctx.output.extend(assigned);
                    }
                    Ok(StepOutcome::Paused(reason)) => {
                        ctx.steps
                            .insert(step.id.clone(), json!({ "status": StepStatus::Paused }));
                        paused.get_or_insert(reason);
                    }
                    Err(err) if step.optional => {
                        warn!(step_id = %step.id, error = %err, "optional step failed; continuing");
                        ctx.steps.insert(
                            step.id.clone(),
                            json!({ "status": StepStatus::Failed, "error": err.to_string() }),
                        );
                    }
                    Err(err) => {
                        ctx.steps.insert(
                            step.id.clone(),
                            json!({ "status": StepStatus::Failed, "error": err.to_string() }),
                        );
                        failure.get_or_insert(format!("step `{}` failed: {err}", step.id));
                    }
                }
                records.insert(step.id.clone(), record);
            }

            if let Some(message) = failure {
                return Err(LoomError::Other(anyhow::anyhow!(message)));
            }
            if let Some(reason) = paused {
                return Ok(RunEnd::Paused(reason));
            }
        }
    }

    async fn run_step<'s>(
        &self,
        flow: &FlowConfig,
        step: &'s FlowStep,
        ctx: &FlowContext,
    ) -> (&'s FlowStep, StepResult, Result<StepOutcome>) {
        let mut record = StepResult {
            step_id: step.id.clone(),
            status: StepStatus::Pending,
            output: None,
            error: None,
            attempts: 0,
            started_at: Some(Utc::now()),
            ended_at: None,
        };

        let outcome = self.attempt_step(flow, step, ctx, &mut record).await;
        record.ended_at = Some(Utc::now());
        match &outcome {
            Ok(StepOutcome::Completed(output)) => {
                record.status = StepStatus::Completed;
                record.output = Some(output.clone());
            }
            Ok(StepOutcome::Paused(reason)) => {
                record.status = StepStatus::Paused;
                record.error = Some(reason.clone());
            }
            Err(err) => {
                record.status = StepStatus::Failed;
                record.error = Some(err.to_string());
            }
        }
        (step, record, outcome)
    }

    async fn attempt_step(
        &self,
        flow: &FlowConfig,
        step: &FlowStep,
        ctx: &FlowContext,
        record: &mut StepResult,
    ) -> Result<StepOutcome> {
        // 未注册的类型在执行时失败，不重试
        let executor = self.executors.get(&step.step_type).ok_or_else(|| {
            LoomError::Configuration(format!(
                "no executor registered for step type `{}`",
                step.step_type
            ))
        })?;
        let retry = step
            .retry
            .clone()
            .or_else(|| flow.retry.clone())
            .unwrap_or_else(RetryConfig::none);
        let max_attempts = retry.max_attempts.max(1);
        let timeout = step
            .timeout_ms
            .map(Duration::from_millis)
            .or(self.default_step_timeout);
        let input = resolve_input(step, ctx);

        let mut attempt = 0;
        loop {
            attempt += 1;
            record.attempts = attempt;
            let call = executor.execute(step, input.clone(), ctx);
            let outcome = match timeout {
                Some(limit) => tokio::time::timeout(limit, call)
                    .await
                    .unwrap_or(Err(LoomError::Timeout(limit))),
                None => call.await,
            };
            match outcome {
                Err(err) if attempt < max_attempts => {
                    let delay = retry.delay_for(attempt);
                    warn!(
                        step_id = %step.id,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "step failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}

/// 依赖已完成、已跳过，或为可选且已失败
fn dependencies_settled(step: &FlowStep, records: &HashMap<String, StepResult>) -> bool {
    step.depends_on.iter().all(|dependency| {
        records.get(dependency).is_some_and(|record| {
            matches!(
                record.status,
                StepStatus::Completed | StepStatus::Skipped | StepStatus::Failed
            )
        })
    })
}
