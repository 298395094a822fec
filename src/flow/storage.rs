use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::types::{FlowConfig, FlowExecutionResult};
use crate::error::Result;

/// Flow 持久化接口
#[async_trait]
pub trait FlowStorage: Send + Sync {
    async fn save_flow(&self, flow: &FlowConfig) -> Result<()>;

    async fn load_flow(&self, flow_id: &str) -> Result<Option<FlowConfig>>;

    /// Returns whether a flow was deleted.
    async fn delete_flow(&self, flow_id: &str) -> Result<bool>;

    async fn list_flows(&self) -> Result<Vec<FlowConfig>>;

    async fn save_execution(&self, result: &FlowExecutionResult) -> Result<()>;

    async fn load_execution(&self, execution_id: &str) -> Result<Option<FlowExecutionResult>>;

    async fn list_executions(&self, flow_id: Option<&str>) -> Result<Vec<FlowExecutionResult>>;
}

/// 内存存储，用于测试与嵌入
#[derive(Default)]
pub struct MemoryFlowStorage {
    flows: RwLock<BTreeMap<String, FlowConfig>>,
    executions: RwLock<HashMap<String, FlowExecutionResult>>,
}

impl MemoryFlowStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FlowStorage for MemoryFlowStorage {
    async fn save_flow(&self, flow: &FlowConfig) -> Result<()> {
        self.flows.write().insert(flow.id.clone(), flow.clone());
        Ok(())
    }

    async fn load_flow(&self, flow_id: &str) -> Result<Option<FlowConfig>> {
        Ok(self.flows.read().get(flow_id).cloned())
    }

    async fn delete_flow(&self, flow_id: &str) -> Result<bool> {
        Ok(self.flows.write().remove(flow_id).is_some())
    }

    async fn list_flows(&self) -> Result<Vec<FlowConfig>> {
        Ok(self.flows.read().values().cloned().collect())
    }

    async fn save_execution(&self, result: &FlowExecutionResult) -> Result<()> {
        self.executions
            .write()
            .insert(result.execution_id.clone(), result.clone());
        Ok(())
    }

    async fn load_execution(&self, execution_id: &str) -> Result<Option<FlowExecutionResult>> {
        Ok(self.executions.read().get(execution_id).cloned())
    }

    async fn list_executions(&self, flow_id: Option<&str>) -> Result<Vec<FlowExecutionResult>> {
        let mut executions: Vec<FlowExecutionResult> = self
            .executions
            .read()
            .values()
            .filter(|result| flow_id.map_or(true, |id| result.flow_id == id))
            .cloned()
            .collect();
        executions.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(executions)
    }
}
