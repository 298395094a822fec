// 配置模块

mod engine;
mod env;

pub use engine::{EngineConfig, FlowManagerConfig, RunnerConfig};
pub use env::{
    EnvConfig, MAX_CONCURRENT_ENV, MAX_HISTORY_ENV, MAX_ITERATIONS_ENV, RUN_TIMEOUT_ENV,
};
