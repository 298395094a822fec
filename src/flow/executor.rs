use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::mapping::resolve_value;
use super::types::FlowStep;
use crate::agent::{collect_response, new_id, Agent, InvocationContext, Message};
use crate::error::{LoomError, Result};
use crate::state::{FlowContext, SessionState};
use crate::tools::{ToolContext, ToolOutcome, ToolSet};

/// 步骤执行结果：完成并产出值，或暂停等待外部输入
#[derive(Clone, Debug, PartialEq)]
pub enum StepOutcome {
    Completed(Value),
    Paused(String),
}

/// 按步骤类型注册的执行器
#[async_trait]
pub trait StepExecutor: Send + Sync {
    fn step_type(&self) -> &str;

    async fn execute(&self, step: &FlowStep, input: Value, ctx: &FlowContext)
        -> Result<StepOutcome>;
}

/// 步骤执行器注册表，类型必须显式注册
#[derive(Default)]
pub struct StepExecutorRegistry {
    executors: RwLock<HashMap<String, Arc<dyn StepExecutor>>>,
}

impl StepExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `delay` and `transform` executors.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        {
            let mut executors = registry.executors.write();
            executors.insert("delay".into(), Arc::new(DelayExecutor) as Arc<dyn StepExecutor>);
            executors.insert("transform".into(), Arc::new(TransformExecutor));
        }
        registry
    }

    pub fn register(&self, executor: Arc<dyn StepExecutor>) -> Result<()> {
        let step_type = executor.step_type().to_string();
        if step_type.trim().is_empty() {
            return Err(LoomError::Configuration(
                "step executor type must not be empty".into(),
            ));
        }
        let mut executors = self.executors.write();
        if executors.contains_key(&step_type) {
            return Err(LoomError::Configuration(format!(
                "executor for step type `{step_type}` already registered"
            )));
        }
        debug!(step_type = %step_type, "step executor registered");
        executors.insert(step_type, executor);
        Ok(())
    }

    pub fn get(&self, step_type: &str) -> Option<Arc<dyn StepExecutor>> {
        self.executors.read().get(step_type).cloned()
    }

    pub fn contains(&self, step_type: &str) -> bool {
        self.executors.read().contains_key(step_type)
    }

    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.executors.read().keys().cloned().collect();
        types.sort();
        types
    }
}

/// `delay`：等待 `config.duration_ms` 后原样返回输入
pub struct DelayExecutor;

#[async_trait]
impl StepExecutor for DelayExecutor {
    fn step_type(&self) -> &str {
        "delay"
    }

    async fn execute(
        &self,
        step: &FlowStep,
        input: Value,
        _ctx: &FlowContext,
    ) -> Result<StepOutcome> {
        let millis = step
            .config
            .get("duration_ms")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        if millis > 0 {
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
        Ok(StepOutcome::Completed(input))
    }
}

/// `transform`：`config.values` 解析路径后与输入合并，输入字段优先
pub struct TransformExecutor;

#[async_trait]
impl StepExecutor for TransformExecutor {
    fn step_type(&self) -> &str {
        "transform"
    }

    async fn execute(&self, step: &FlowStep, input: Value, ctx: &FlowContext) -> Result<StepOutcome> {
        let values = match step.config.get("values") {
            Some(values) => resolve_value(values, &ctx.view()),
            None => Value::Object(Map::new()),
        };
        let mut merged = match values {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(LoomError::Configuration(format!(
                    "transform step `{}` expects `values` to be an object, got {other}",
                    step.id
                )))
            }
        };
        match input {
            Value::Object(fields) => merged.extend(fields),
            Value::Null => {}
            other => {
                merged.insert("value".into(), other);
            }
        }
        Ok(StepOutcome::Completed(Value::Object(merged)))
    }
}

/// `tool`：调用 `config.tool` 指定的工具，参数为步骤输入
///
/// 长时间运行的工具返回 Pending 时，步骤暂停。
pub struct ToolStepExecutor {
    tools: ToolSet,
}

impl ToolStepExecutor {
    pub fn new(tools: ToolSet) -> Self {
        Self { tools }
    }
}

#[async_trait]
impl StepExecutor for ToolStepExecutor {
    fn step_type(&self) -> &str {
        "tool"
    }

    async fn execute(&self, step: &FlowStep, input: Value, ctx: &FlowContext) -> Result<StepOutcome> {
        let name = step.config_str("tool").ok_or_else(|| {
            LoomError::Configuration(format!("tool step `{}` is missing `config.tool`", step.id))
        })?;
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| LoomError::not_found("tool", name))?;

        let invocation = InvocationContext::new(ctx.execution_id.clone());
        let session = SessionState::new();
        let call_id = new_id("call");
        let outcome = tool
            .execute(
                input,
                ToolContext {
                    invocation: &invocation,
                    session: &session,
                    call_id: &call_id,
                },
            )
            .await
            .map_err(|err| match err {
                err @ LoomError::ToolExecution { .. } => err,
                other => LoomError::tool(name, other.to_string()),
            })?;

        Ok(match outcome {
            ToolOutcome::Completed(value) => StepOutcome::Completed(value),
            ToolOutcome::Pending(correlation_id) => {
                StepOutcome::Paused(format!("tool `{name}` pending as `{correlation_id}`"))
            }
        })
    }
}

/// `agent`：把输入交给 `config.agent` 指定的 agent，输出其最终文本
pub struct AgentStepExecutor {
    agents: HashMap<String, Arc<dyn Agent>>,
}

impl AgentStepExecutor {
    pub fn new(agents: impl IntoIterator<Item = Arc<dyn Agent>>) -> Self {
        Self {
            agents: agents
                .into_iter()
                .map(|agent| (agent.name().to_string(), agent))
                .collect(),
        }
    }

    fn message_text(input: &Value) -> String {
        if let Some(text) = input.as_str() {
            return text.to_string();
        }
        if let Some(text) = input.get("message").and_then(Value::as_str) {
            return text.to_string();
        }
        input.to_string()
    }
}

#[async_trait]
impl StepExecutor for AgentStepExecutor {
    fn step_type(&self) -> &str {
        "agent"
    }

    async fn execute(&self, step: &FlowStep, input: Value, ctx: &FlowContext) -> Result<StepOutcome> {
        let name = step.config_str("agent").ok_or_else(|| {
            LoomError::Configuration(format!("agent step `{}` is missing `config.agent`", step.id))
        })?;
        let agent = self
            .agents
            .get(name)
            .ok_or_else(|| LoomError::not_found("agent", name))?;

        let invocation = InvocationContext::new(ctx.execution_id.clone());
        let stream = agent.run(
            Message::user(Self::message_text(&input)),
            invocation,
            SessionState::new(),
        );
        let (events, response) = collect_response(stream).await?;
        debug!(step_id = %step.id, agent = name, events = events.len(), "agent step finished");
        Ok(StepOutcome::Completed(json!({
            "agent": name,
            "response": response.text_content(),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transform_merges_values() {
        let mut ctx = FlowContext::new("exec", "flow");
        ctx.set_variable("region", json!("eu"));
        let step = FlowStep::new("shape", "transform")
            .with_config(json!({ "values": { "region": "$variables.region", "kind": "report" } }));

        let outcome = TransformExecutor
            .execute(&step, json!({ "kind": "summary" }), &ctx)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            StepOutcome::Completed(json!({ "region": "eu", "kind": "summary" }))
        );
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let registry = StepExecutorRegistry::with_builtins();
        assert_eq!(registry.types(), vec!["delay".to_string(), "transform".to_string()]);
        let err = registry.register(Arc::new(DelayExecutor)).unwrap_err();
        assert!(matches!(err, LoomError::Configuration(_)));
        assert!(registry.get("unknown").is_none());
    }
}
