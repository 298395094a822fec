use std::time::Duration;

use serde_json::{Map, Value};

use super::types::{ExecutionMode, FlowConfig, FlowStep, RetryConfig};
use super::validation::FlowValidator;
use crate::error::Result;

/// Flow 构建器
pub struct FlowBuilder {
    config: FlowConfig,
}

impl FlowBuilder {
    pub fn new<T: Into<String>>(id: T) -> Self {
        let id = id.into();
        Self {
            config: FlowConfig {
                name: id.clone(),
                id,
                version: "1.0.0".into(),
                description: None,
                steps: Vec::new(),
                execution_mode: ExecutionMode::Sequential,
                retry: None,
                timeout_ms: None,
                variables: Map::new(),
                tags: Vec::new(),
                metadata: Map::new(),
            },
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.config.version = version.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.config.description = Some(description.into());
        self
    }

    pub fn step(mut self, step: FlowStep) -> Self {
        self.config.steps.push(step);
        self
    }

    pub fn parallel(mut self) -> Self {
        self.config.execution_mode = ExecutionMode::Parallel;
        self
    }

    pub fn execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.config.execution_mode = mode;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = Some(retry);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.config.variables.insert(name.into(), value);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.config.tags.push(tag.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.metadata.insert(key.into(), value);
        self
    }

    /// 构建并做结构校验（不检查步骤类型是否已注册）
    pub fn build(self) -> Result<FlowConfig> {
        FlowValidator::new().validate(&self.config).into_result()?;
        Ok(self.config)
    }

    pub fn build_unchecked(self) -> FlowConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LoomError;

    #[test]
    fn test_build_validates() {
        let flow = FlowBuilder::new("etl")
            .name("ETL")
            .step(FlowStep::new("extract", "delay"))
            .step(FlowStep::new("load", "delay").depends_on("extract"))
            .tag("nightly")
            .build()
            .unwrap();
        assert_eq!(flow.steps.len(), 2);
        assert_eq!(flow.version, "1.0.0");

        let err = FlowBuilder::new("empty").build().unwrap_err();
        match err {
            LoomError::Validation(issues) => assert_eq!(issues[0].path, "steps"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
