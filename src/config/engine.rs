use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::env::{
    EnvConfig, MAX_CONCURRENT_ENV, MAX_HISTORY_ENV, MAX_ITERATIONS_ENV, RUN_TIMEOUT_ENV,
};
use crate::error::{LoomError, Result};

/// Runner 配置
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunnerConfig {
    /// 外层迭代上限
    pub max_iterations: u32,
    /// 会话历史保留的最大消息数
    pub max_history_size: usize,
    /// 单次运行的墙钟超时（毫秒）
    pub timeout_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            max_history_size: 100,
            timeout_ms: 5 * 60 * 1000,
        }
    }
}

impl RunnerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_max_history_size(mut self, max_history_size: usize) -> Self {
        self.max_history_size = max_history_size;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(LoomError::Configuration("runner.max_iterations must be >= 1".into()));
        }
        if self.max_history_size == 0 {
            return Err(LoomError::Configuration(
                "runner.max_history_size must be >= 1".into(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(LoomError::Configuration("runner.timeout_ms must be > 0".into()));
        }
        Ok(())
    }
}

/// FlowManager 配置
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FlowManagerConfig {
    /// 同时执行的 flow 上限，超出时立即失败而不是排队
    pub max_concurrent_executions: usize,
    /// 保留的执行历史条数
    pub max_history: usize,
    /// parallel 模式下单次执行内同时运行的步骤数
    pub max_parallel_steps: usize,
    /// 步骤未声明超时时使用的默认值
    pub default_step_timeout_ms: Option<u64>,
}

impl Default for FlowManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_executions: 10,
            max_history: 1000,
            max_parallel_steps: 4,
            default_step_timeout_ms: None,
        }
    }
}

impl FlowManagerConfig {
    pub fn with_max_concurrent_executions(mut self, limit: usize) -> Self {
        self.max_concurrent_executions = limit;
        self
    }

    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history;
        self
    }

    pub fn with_max_parallel_steps(mut self, limit: usize) -> Self {
        self.max_parallel_steps = limit;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_executions == 0 {
            return Err(LoomError::Configuration(
                "flow_manager.max_concurrent_executions must be >= 1".into(),
            ));
        }
        if self.max_parallel_steps == 0 {
            return Err(LoomError::Configuration(
                "flow_manager.max_parallel_steps must be >= 1".into(),
            ));
        }
        if self.default_step_timeout_ms == Some(0) {
            return Err(LoomError::Configuration(
                "flow_manager.default_step_timeout_ms must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// 引擎整体配置，可从 JSON 加载并由环境变量覆盖
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub runner: RunnerConfig,
    pub flow_manager: FlowManagerConfig,
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| LoomError::Configuration(format!("failed to parse engine config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            LoomError::Configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&content)
    }

    /// 环境变量优先于文件配置
    pub fn apply_env_overrides(mut self) -> Result<Self> {
        if let Some(value) = EnvConfig::parse_optional(MAX_ITERATIONS_ENV)? {
            self.runner.max_iterations = value;
        }
        if let Some(value) = EnvConfig::parse_optional(MAX_HISTORY_ENV)? {
            self.runner.max_history_size = value;
        }
        if let Some(value) = EnvConfig::parse_optional(RUN_TIMEOUT_ENV)? {
            self.runner.timeout_ms = value;
        }
        if let Some(value) = EnvConfig::parse_optional(MAX_CONCURRENT_ENV)? {
            self.flow_manager.max_concurrent_executions = value;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        self.runner.validate()?;
        self.flow_manager.validate()
    }
}
