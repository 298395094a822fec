use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::types::FlowConfig;
use crate::error::{LoomError, Result};

/// Flow 注册表，按 flow id 索引
#[derive(Default)]
pub struct FlowRegistry {
    flows: RwLock<HashMap<String, Arc<FlowConfig>>>,
}

impl FlowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, flow: FlowConfig) -> Result<Arc<FlowConfig>> {
        let mut flows = self.flows.write();
        if flows.contains_key(&flow.id) {
            return Err(LoomError::Configuration(format!(
                "flow `{}` is already registered",
                flow.id
            )));
        }
        let flow = Arc::new(flow);
        flows.insert(flow.id.clone(), Arc::clone(&flow));
        Ok(flow)
    }

    /// Inserts or replaces, returning the previous definition.
    pub fn replace(&self, flow: FlowConfig) -> Option<Arc<FlowConfig>> {
        self.flows.write().insert(flow.id.clone(), Arc::new(flow))
    }

    pub fn remove(&self, flow_id: &str) -> Option<Arc<FlowConfig>> {
        self.flows.write().remove(flow_id)
    }

    pub fn get(&self, flow_id: &str) -> Option<Arc<FlowConfig>> {
        self.flows.read().get(flow_id).cloned()
    }

    pub fn contains(&self, flow_id: &str) -> bool {
        self.flows.read().contains_key(flow_id)
    }

    /// Sorted by flow id.
    pub fn list(&self) -> Vec<Arc<FlowConfig>> {
        let mut flows: Vec<Arc<FlowConfig>> = self.flows.read().values().cloned().collect();
        flows.sort_by(|a, b| a.id.cmp(&b.id));
        flows
    }

    pub fn len(&self) -> usize {
        self.flows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.read().is_empty()
    }
}
