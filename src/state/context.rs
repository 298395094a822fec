use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Flow 执行上下文：一次执行的临时记录
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct FlowContext {
    pub execution_id: String,
    pub flow_id: String,
    #[serde(default)]
    pub input: Map<String, Value>,
    #[serde(default)]
    pub output: Map<String, Value>,
    #[serde(default)]
    pub variables: Map<String, Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// 已完成步骤的结果视图，供条件与输入映射读取
    #[serde(default)]
    pub steps: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_execution_id: Option<String>,
    #[serde(default)]
    pub children: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

impl FlowContext {
    pub fn new(execution_id: impl Into<String>, flow_id: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            flow_id: flow_id.into(),
            started_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    pub fn with_input(mut self, input: Map<String, Value>) -> Self {
        self.input = input;
        self
    }

    pub fn with_parent(mut self, parent_execution_id: impl Into<String>) -> Self {
        self.parent_execution_id = Some(parent_execution_id.into());
        self
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    /// 条件与映射使用的统一视图
    pub fn view(&self) -> Value {
        serde_json::json!({
            "input": self.input,
            "variables": self.variables,
            "steps": self.steps,
            "metadata": self.metadata,
            "output": self.output,
        })
    }
}
