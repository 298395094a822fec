use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{LoomError, Result};
use crate::state::FlowContext;

/// Flow 核心类型定义

/// 步骤调度方式
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Sequential,
    Parallel,
}

/// 重试策略：指数退避，可选上限
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub delay_ms: u64,
    pub backoff_multiplier: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 1000,
            backoff_multiplier: 2.0,
            max_delay_ms: None,
        }
    }
}

impl RetryConfig {
    pub const MAX_ATTEMPTS: u32 = 10;

    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay_ms: delay.as_millis() as u64,
            ..Self::default()
        }
    }

    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            delay_ms: 0,
            backoff_multiplier: 1.0,
            max_delay_ms: None,
        }
    }

    pub fn with_backoff(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay_ms = Some(max_delay.as_millis() as u64);
        self
    }

    /// Delay before the attempt following `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let mut delay = self.delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        if let Some(max) = self.max_delay_ms {
            delay = delay.min(max as f64);
        }
        Duration::from_millis(delay.max(0.0) as u64)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    Contains,
    Exists,
    NotExists,
}

/// 步骤执行条件，`field` 为上下文视图中的点分路径
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StepCondition {
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl StepCondition {
    pub fn new(field: impl Into<String>, operator: ConditionOperator, value: Option<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    pub fn equals(field: impl Into<String>, value: Value) -> Self {
        Self::new(field, ConditionOperator::Equals, Some(value))
    }

    pub fn exists(field: impl Into<String>) -> Self {
        Self::new(field, ConditionOperator::Exists, None)
    }
}

/// Flow 步骤
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FlowStep {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub step_type: String,
    /// 必填；JSON 中缺少 `config` 时反序列化失败
    pub config: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<StepCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub optional: bool,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl FlowStep {
    pub fn new(id: impl Into<String>, step_type: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            step_type: step_type.into(),
            config: empty_object(),
            input: None,
            output: None,
            conditions: Vec::new(),
            retry: None,
            timeout_ms: None,
            depends_on: Vec::new(),
            optional: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    pub fn with_input(mut self, key: impl Into<String>, value: Value) -> Self {
        self.input
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
        self
    }

    /// Maps a flow variable to a path into this step's output (`$` is the whole output).
    pub fn with_output(mut self, variable: impl Into<String>, path: impl Into<String>) -> Self {
        self.output
            .get_or_insert_with(Map::new)
            .insert(variable.into(), Value::String(path.into()));
        self
    }

    pub fn with_condition(mut self, condition: StepCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn depends_on(mut self, step_id: impl Into<String>) -> Self {
        self.depends_on.push(step_id.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }
}

/// Flow 定义，注册后不可变
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FlowConfig {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub steps: Vec<FlowStep>,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub variables: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl FlowConfig {
    pub fn step(&self, id: &str) -> Option<&FlowStep> {
        self.steps.iter().find(|step| step.id == id)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Paused,
}

impl ExecutionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionState::Pending => "PENDING",
            ExecutionState::Running => "RUNNING",
            ExecutionState::Completed => "COMPLETED",
            ExecutionState::Failed => "FAILED",
            ExecutionState::Cancelled => "CANCELLED",
            ExecutionState::Paused => "PAUSED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionState::Pending | ExecutionState::Running)
    }

    pub fn can_transition_to(&self, next: ExecutionState) -> bool {
        use ExecutionState::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Running, Paused)
        )
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Completed,
    Failed,
    Skipped,
    Paused,
}

/// 单个步骤的执行记录
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StepResult {
    pub step_id: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl StepResult {
    pub fn skipped(step_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            step_id: step_id.into(),
            status: StepStatus::Skipped,
            output: None,
            error: None,
            attempts: 0,
            started_at: Some(now),
            ended_at: Some(now),
        }
    }
}

/// 一次 flow 执行的结果与状态机
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FlowExecutionResult {
    pub execution_id: String,
    pub flow_id: String,
    pub state: ExecutionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub input: Map<String, Value>,
    #[serde(default)]
    pub output: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub steps: Vec<StepResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_execution_id: Option<String>,
    /// 以本次执行为父执行启动的子执行
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<String>,
}

impl FlowExecutionResult {
    pub fn new(execution_id: impl Into<String>, flow_id: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            flow_id: flow_id.into(),
            state: ExecutionState::Pending,
            started_at: None,
            ended_at: None,
            input: Map::new(),
            output: Map::new(),
            error: None,
            steps: Vec::new(),
            parent_execution_id: None,
            children: Vec::new(),
        }
    }

    /// Copies the context's input and lineage onto a fresh result.
    pub fn for_context(ctx: &FlowContext) -> Self {
        let mut result = Self::new(ctx.execution_id.clone(), ctx.flow_id.clone());
        result.input = ctx.input.clone();
        result.parent_execution_id = ctx.parent_execution_id.clone();
        result.children = ctx.children.clone();
        result
    }

    pub fn add_child(&mut self, execution_id: impl Into<String>) {
        let execution_id = execution_id.into();
        if !self.children.contains(&execution_id) {
            self.children.push(execution_id);
        }
    }

    pub fn transition(&mut self, next: ExecutionState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(LoomError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        let now = Utc::now();
        match next {
            ExecutionState::Running => self.started_at = Some(now),
            state if state.is_terminal() => {
                self.started_at.get_or_insert(now);
                self.ended_at = Some(now);
            }
            _ => {}
        }
        self.state = next;
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        self.transition(ExecutionState::Running)
    }

    pub fn complete(&mut self, output: Map<String, Value>) -> Result<()> {
        self.transition(ExecutionState::Completed)?;
        self.output = output;
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        self.transition(ExecutionState::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<()> {
        self.transition(ExecutionState::Cancelled)
    }

    pub fn pause(&mut self, reason: impl Into<String>) -> Result<()> {
        self.transition(ExecutionState::Paused)?;
        self.error = Some(reason.into());
        Ok(())
    }

    /// Only defined once an end time is set.
    pub fn duration(&self) -> Option<Duration> {
        let started = self.started_at?;
        let ended = self.ended_at?;
        (ended - started).to_std().ok()
    }

    pub fn is_success(&self) -> bool {
        self.state == ExecutionState::Completed
    }

    pub fn step(&self, step_id: &str) -> Option<&StepResult> {
        self.steps.iter().find(|step| step.step_id == step_id)
    }
}
