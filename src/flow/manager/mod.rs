// FlowManager：flow 注册、受限并发执行、历史、指标、事件与备份

mod backup;
mod events;
mod health;
mod history;
mod metrics;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

pub use backup::{FlowBackup, RestoreFailure, RestoreOptions, RestoreReport, BACKUP_FORMAT_VERSION};
pub use events::{EventBus, FlowEventKind, FlowEventListener, ManagerEvent, SubscriptionId};
pub use health::{HealthState, HealthStatus};
pub use history::{ExecutionHistory, ExecutionPage, ExecutionQuery, SortField, SortOrder};
pub use metrics::{FlowMetrics, FlowStats};

use super::engine::{CancelFlag, FlowEngine};
use super::executor::{StepExecutor, StepExecutorRegistry};
use super::registry::FlowRegistry;
use super::storage::FlowStorage;
use super::types::{ExecutionState, FlowConfig, FlowExecutionResult};
use super::validation::FlowValidator;
use crate::agent::new_id;
use crate::config::FlowManagerConfig;
use crate::error::{LoomError, Result};
use crate::state::FlowContext;

/// 执行前后钩子；`before_execution` 失败时本次执行记为 FAILED
#[async_trait]
pub trait ExecutionHooks: Send + Sync {
    async fn before_execution(&self, _flow: &FlowConfig, _ctx: &FlowContext) -> Result<()> {
        Ok(())
    }

    async fn after_execution(&self, _flow: &FlowConfig, _result: &FlowExecutionResult) -> Result<()> {
        Ok(())
    }

    async fn on_error(&self, _flow: &FlowConfig, _result: &FlowExecutionResult) -> Result<()> {
        Ok(())
    }
}

/// Per-execution additions layered over the flow's own variables and metadata.
#[derive(Clone, Debug, Default)]
pub struct ContextOverrides {
    pub variables: Map<String, Value>,
    pub metadata: Map<String, Value>,
    pub parent_execution_id: Option<String>,
}

impl ContextOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_parent(mut self, execution_id: impl Into<String>) -> Self {
        self.parent_execution_id = Some(execution_id.into());
        self
    }
}

#[derive(Clone, Debug)]
struct ActiveExecution {
    flow_id: String,
    started_at: DateTime<Utc>,
    cancel: CancelFlag,
    children: Vec<String>,
}

/// 执行结束（含提前返回）时释放并发名额
struct ActiveGuard<'a> {
    active: &'a Mutex<HashMap<String, ActiveExecution>>,
    execution_id: String,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.active.lock().remove(&self.execution_id);
    }
}

pub struct FlowManager {
    config: FlowManagerConfig,
    registry: FlowRegistry,
    engine: FlowEngine,
    storage: Option<Arc<dyn FlowStorage>>,
    hooks: RwLock<Vec<Arc<dyn ExecutionHooks>>>,
    active: Mutex<HashMap<String, ActiveExecution>>,
    history: Mutex<ExecutionHistory>,
    metrics: Mutex<FlowMetrics>,
    events: EventBus,
    started: Instant,
}

impl FlowManager {
    pub fn new(config: FlowManagerConfig) -> Result<Self> {
        Self::with_executors(config, StepExecutorRegistry::with_builtins())
    }

    pub fn with_executors(config: FlowManagerConfig, executors: StepExecutorRegistry) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            engine: FlowEngine::with_config(Arc::new(executors), &config),
            history: Mutex::new(ExecutionHistory::new(config.max_history)),
            config,
            registry: FlowRegistry::new(),
            storage: None,
            hooks: RwLock::new(Vec::new()),
            active: Mutex::new(HashMap::new()),
            metrics: Mutex::new(FlowMetrics::new()),
            events: EventBus::new(),
            started: Instant::now(),
        })
    }

    pub fn with_storage(mut self, storage: Arc<dyn FlowStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn config(&self) -> &FlowManagerConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(
        &self,
        kind: FlowEventKind,
        listener: Arc<dyn FlowEventListener>,
    ) -> SubscriptionId {
        self.events.subscribe(kind, listener)
    }

    pub fn subscribe_all(&self, listener: Arc<dyn FlowEventListener>) -> SubscriptionId {
        self.events.subscribe_all(listener)
    }

    pub fn add_hooks(&self, hooks: Arc<dyn ExecutionHooks>) {
        self.hooks.write().push(hooks);
    }

    pub fn register_executor(&self, executor: Arc<dyn StepExecutor>) -> Result<()> {
        self.engine.executors().register(executor)
    }

    fn validator(&self) -> FlowValidator {
        FlowValidator::with_known_types(self.engine.executors().types())
    }

    pub async fn register_flow(&self, config: FlowConfig) -> Result<()> {
        let warnings = self.validator().validate(&config).into_result()?;
        for warning in &warnings {
            warn!(flow_id = %config.id, issue = %warning, "flow registered with warning");
        }

        let flow = self.registry.register(config)?;
        if let Some(storage) = &self.storage {
            if let Err(err) = storage.save_flow(&flow).await {
                self.registry.remove(&flow.id);
                return Err(err);
            }
        }
        info!(flow_id = %flow.id, steps = flow.steps.len(), "flow registered");
        self.events
            .emit(&ManagerEvent::for_flow(FlowEventKind::FlowRegistered, flow.id.clone()));
        Ok(())
    }

    pub async fn unregister_flow(&self, flow_id: &str) -> Result<Arc<FlowConfig>> {
        let running = self
            .active
            .lock()
            .values()
            .filter(|execution| execution.flow_id == flow_id)
            .count();
        if running > 0 {
            return Err(LoomError::InvalidState(format!(
                "flow `{flow_id}` has {running} active execution(s)"
            )));
        }
        let flow = self
            .registry
            .remove(flow_id)
            .ok_or_else(|| LoomError::not_found("flow", flow_id))?;
        if let Some(storage) = &self.storage {
            storage.delete_flow(flow_id).await?;
        }
        self.metrics.lock().forget(flow_id);
        info!(flow_id, "flow unregistered");
        self.events
            .emit(&ManagerEvent::for_flow(FlowEventKind::FlowUnregistered, flow_id));
        Ok(flow)
    }

    pub fn get_flow(&self, flow_id: &str) -> Option<Arc<FlowConfig>> {
        self.registry.get(flow_id)
    }

    pub fn list_flows(&self) -> Vec<Arc<FlowConfig>> {
        self.registry.list()
    }

    /// Registers every stored flow that is not yet known; returns how many were added.
    pub async fn load_from_storage(&self) -> Result<usize> {
        let Some(storage) = &self.storage else {
            return Ok(0);
        };
        let validator = self.validator();
        let mut loaded = 0;
        for flow in storage.list_flows().await? {
            if self.registry.contains(&flow.id) {
                continue;
            }
            let report = validator.validate(&flow);
            if !report.is_valid() {
                warn!(flow_id = %flow.id, errors = report.errors.len(), "stored flow is invalid; skipping");
                continue;
            }
            if self.registry.register(flow).is_ok() {
                loaded += 1;
            }
        }
        debug!(loaded, "flows loaded from storage");
        Ok(loaded)
    }

    /// 执行 flow
    ///
    /// 未注册的 flow 与并发名额耗尽在分配执行 id 之前返回错误；
    /// 执行过程中的失败转为 FAILED 结果，不会作为 `Err` 返回。
    pub async fn execute_flow(
        &self,
        flow_id: &str,
        input: Value,
        overrides: ContextOverrides,
    ) -> Result<FlowExecutionResult> {
        let flow = self
            .registry
            .get(flow_id)
            .ok_or_else(|| LoomError::not_found("flow", flow_id))?;
        let cancel = CancelFlag::new();
        let execution_id = self.reserve_slot(flow_id, &cancel)?;
        let _guard = ActiveGuard {
            active: &self.active,
            execution_id: execution_id.clone(),
        };

        if let Some(parent) = &overrides.parent_execution_id {
            self.link_child(parent, &execution_id);
        }
        let ctx = build_context(&flow, &execution_id, input, overrides);
        info!(flow_id, execution_id = %execution_id, "flow execution accepted");
        self.events.emit(&ManagerEvent::for_execution(
            FlowEventKind::FlowStarted,
            flow_id,
            execution_id.clone(),
        ));

        let hooks: Vec<Arc<dyn ExecutionHooks>> = self.hooks.read().clone();
        let mut rejected = None;
        for hook in &hooks {
            if let Err(err) = hook.before_execution(&flow, &ctx).await {
                rejected = Some(err);
                break;
            }
        }

        let mut result = match rejected {
            Some(err) => {
                warn!(flow_id, execution_id = %execution_id, error = %err, "before_execution hook failed");
                rejected_result(&ctx, format!("before_execution hook failed: {err}"))
            }
            None => self.engine.execute_with_cancel(&flow, ctx, &cancel).await,
        };

        for hook in &hooks {
            let outcome = if result.state == ExecutionState::Failed {
                hook.on_error(&flow, &result).await
            } else {
                hook.after_execution(&flow, &result).await
            };
            if let Err(err) = outcome {
                warn!(flow_id, execution_id = %execution_id, error = %err, "execution hook failed; ignoring");
            }
        }

        {
            // 子执行登记与写入历史在同一把锁下完成
            let mut active = self.active.lock();
            if let Some(execution) = active.get_mut(&execution_id) {
                for child in execution.children.drain(..) {
                    result.add_child(child);
                }
            }
            self.history.lock().push(result.clone());
        }
        self.record(&result).await;
        self.emit_finished(&result);
        Ok(result)
    }

    /// 把子执行挂到父执行上：父执行仍在运行时记在登记表，已结束则写回历史
    fn link_child(&self, parent_id: &str, child_id: &str) {
        if let Some(parent) = self.active.lock().get_mut(parent_id) {
            parent.children.push(child_id.to_string());
            return;
        }
        match self.history.lock().get_mut(parent_id) {
            Some(parent) => parent.add_child(child_id),
            None => warn!(parent_id, child_id, "parent execution not found; child is not linked"),
        }
    }

    fn reserve_slot(&self, flow_id: &str, cancel: &CancelFlag) -> Result<String> {
        let mut active = self.active.lock();
        if active.len() >= self.config.max_concurrent_executions {
            warn!(
                flow_id,
                active = active.len(),
                limit = self.config.max_concurrent_executions,
                "flow execution rejected"
            );
            return Err(LoomError::ResourceLimit(format!(
                "{} concurrent executions already running",
                self.config.max_concurrent_executions
            )));
        }
        let execution_id = new_id("exec");
        active.insert(
            execution_id.clone(),
            ActiveExecution {
                flow_id: flow_id.to_string(),
                started_at: Utc::now(),
                cancel: cancel.clone(),
                children: Vec::new(),
            },
        );
        Ok(execution_id)
    }

    async fn record(&self, result: &FlowExecutionResult) {
        self.metrics.lock().record(result);
        if let Some(storage) = &self.storage {
            if let Err(err) = storage.save_execution(result).await {
                warn!(execution_id = %result.execution_id, error = %err, "failed to persist execution");
            }
        }
    }

    fn emit_finished(&self, result: &FlowExecutionResult) {
        let kind = match result.state {
            ExecutionState::Completed => FlowEventKind::FlowCompleted,
            ExecutionState::Failed => FlowEventKind::FlowFailed,
            ExecutionState::Paused => FlowEventKind::FlowPaused,
            // FLOW_CANCELLED 已在 cancel_execution 中发出
            _ => return,
        };
        let event = ManagerEvent::for_execution(
            kind,
            result.flow_id.clone(),
            result.execution_id.clone(),
        )
        .with_data(json!({
            "state": result.state,
            "duration_ms": result.duration().map(|d| d.as_millis() as u64),
            "error": result.error,
        }));
        self.events.emit(&event);
    }

    /// 仅做登记层面的取消：释放名额并发出 FLOW_CANCELLED，正在运行的步骤不会被中断
    pub fn cancel_execution(&self, execution_id: &str) -> Result<()> {
        let execution = self
            .active
            .lock()
            .remove(execution_id)
            .ok_or_else(|| LoomError::not_found("execution", execution_id))?;
        execution.cancel.cancel();
        info!(
            flow_id = %execution.flow_id,
            execution_id,
            running_since = %execution.started_at,
            "flow execution cancelled"
        );
        self.events.emit(&ManagerEvent::for_execution(
            FlowEventKind::FlowCancelled,
            execution.flow_id,
            execution_id,
        ));
        Ok(())
    }

    pub fn active_executions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.active.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_active(&self, execution_id: &str) -> bool {
        self.active.lock().contains_key(execution_id)
    }

    /// Looks in the in-memory history first, then in storage.
    pub async fn get_execution(&self, execution_id: &str) -> Result<Option<FlowExecutionResult>> {
        let cached = self.history.lock().get(execution_id).cloned();
        if cached.is_some() {
            return Ok(cached);
        }
        match &self.storage {
            Some(storage) => storage.load_execution(execution_id).await,
            None => Ok(None),
        }
    }

    pub fn list_executions(&self, query: &ExecutionQuery) -> ExecutionPage {
        self.history.lock().query(query)
    }

    pub fn get_flow_stats(&self, flow_id: &str) -> Result<FlowStats> {
        if !self.registry.contains(flow_id) {
            return Err(LoomError::not_found("flow", flow_id));
        }
        Ok(self.metrics.lock().stats(flow_id))
    }

    pub fn get_health_status(&self) -> HealthStatus {
        let active_executions = self.active.lock().len();
        let error_rate = self.metrics.lock().overall_error_rate();
        let limit = self.config.max_concurrent_executions;
        HealthStatus {
            status: health::assess(active_executions, limit, error_rate),
            active_executions,
            max_concurrent_executions: limit,
            registered_flows: self.registry.len(),
            history_size: self.history.lock().len(),
            error_rate,
            uptime_ms: self.started.elapsed().as_millis() as u64,
            checked_at: Utc::now(),
        }
    }

    pub fn backup_flows(&self) -> FlowBackup {
        let flows = self
            .registry
            .list()
            .into_iter()
            .map(|flow| FlowConfig::clone(&flow))
            .collect();
        let executions = self.history.lock().iter().cloned().collect();
        FlowBackup::new(flows, executions)
    }

    pub async fn restore_flows(
        &self,
        backup: FlowBackup,
        options: RestoreOptions,
    ) -> Result<RestoreReport> {
        if backup.format_version != BACKUP_FORMAT_VERSION {
            return Err(LoomError::Serialization(format!(
                "unsupported backup format version `{}`",
                backup.format_version
            )));
        }

        let mut report = RestoreReport {
            previous: options.backup.then(|| self.backup_flows()),
            ..RestoreReport::default()
        };
        let validator = self.validator();

        for flow in backup.flows {
            if self.registry.contains(&flow.id) && !options.overwrite {
                report.skipped.push(flow.id);
                continue;
            }
            if options.validate {
                if let Err(err) = validator.validate(&flow).into_result() {
                    report.failed.push(RestoreFailure {
                        flow_id: flow.id,
                        error: describe(&err),
                    });
                    continue;
                }
            }
            if let Some(storage) = &self.storage {
                if let Err(err) = storage.save_flow(&flow).await {
                    report.failed.push(RestoreFailure {
                        flow_id: flow.id,
                        error: err.to_string(),
                    });
                    continue;
                }
            }
            report.restored.push(flow.id.clone());
            self.registry.replace(flow);
        }

        if options.restore_executions {
            for execution in backup.executions {
                {
                    let mut history = self.history.lock();
                    if history.contains(&execution.execution_id) {
                        continue;
                    }
                    history.push(execution.clone());
                }
                if let Some(storage) = &self.storage {
                    if let Err(err) = storage.save_execution(&execution).await {
                        warn!(execution_id = %execution.execution_id, error = %err, "failed to persist restored execution");
                    }
                }
                report.executions_restored += 1;
            }
        }

        info!(
            restored = report.restored.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            executions = report.executions_restored,
            "flows restored"
        );
        self.events.emit(&ManagerEvent::new(FlowEventKind::FlowsRestored).with_data(json!({
            "restored": report.restored,
            "skipped": report.skipped,
            "failed": report.failed.len(),
        })));
        Ok(report)
    }
}

fn build_context(
    flow: &FlowConfig,
    execution_id: &str,
    input: Value,
    overrides: ContextOverrides,
) -> FlowContext {
    let input = match input {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("value".into(), other);
            map
        }
    };
    let mut ctx = FlowContext::new(execution_id, flow.id.clone()).with_input(input);
    ctx.variables = flow.variables.clone();
    ctx.variables.extend(overrides.variables);
    ctx.metadata = flow.metadata.clone();
    ctx.metadata.extend(overrides.metadata);
    ctx.parent_execution_id = overrides.parent_execution_id;
    ctx
}

fn rejected_result(ctx: &FlowContext, message: String) -> FlowExecutionResult {
    let mut result = FlowExecutionResult::for_context(ctx);
    if let Err(err) = result.start().and_then(|_| result.fail(message)) {
        warn!(execution_id = %ctx.execution_id, error = %err, "unexpected flow state transition");
    }
    result
}

fn describe(err: &LoomError) -> String {
    match err {
        LoomError::Validation(issues) => issues
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; "),
        other => other.to_string(),
    }
}
