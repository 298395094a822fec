use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{LoomError, Result};
use crate::llm::ToolDeclaration;
use crate::tools::tool::Tool;
use crate::utils::is_valid_identifier;

/// 工具集合：名称唯一，构造时校验
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolSet {
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Result<Self> {
        let mut index = HashMap::with_capacity(tools.len());
        for (position, tool) in tools.iter().enumerate() {
            let name = tool.name();
            if !is_valid_identifier(name) {
                return Err(LoomError::Configuration(format!(
                    "tool name `{name}` is not a valid identifier"
                )));
            }
            if index.insert(name.to_string(), position).is_some() {
                return Err(LoomError::Configuration(format!(
                    "duplicate tool name `{name}`"
                )));
            }
        }
        Ok(Self { tools, index })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.index
            .get(name)
            .map(|position| Arc::clone(&self.tools[*position]))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|tool| tool.name()).collect()
    }

    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        self.tools.iter().map(|tool| tool.declaration()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
