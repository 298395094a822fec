// Flow 模块 - 声明式步骤图的定义、校验与执行

pub mod builder;
pub mod conditions;
pub mod engine;
pub mod executor;
pub mod manager;
pub mod mapping;
pub mod registry;
pub mod storage;
pub mod types;
pub mod validation;

// 重新导出核心类型
pub use builder::FlowBuilder;
pub use conditions::{evaluate, evaluate_all, resolve_path};
pub use engine::{CancelFlag, FlowEngine};
pub use executor::{
    AgentStepExecutor, DelayExecutor, StepExecutor, StepExecutorRegistry, StepOutcome,
    ToolStepExecutor, TransformExecutor,
};
pub use manager::{
    ContextOverrides, EventBus, ExecutionHooks, ExecutionPage, ExecutionQuery, FlowBackup,
    FlowEventKind, FlowEventListener, FlowManager, FlowStats, HealthState, HealthStatus,
    ManagerEvent, RestoreFailure, RestoreOptions, RestoreReport, SortField, SortOrder,
    SubscriptionId,
};
pub use registry::FlowRegistry;
pub use storage::{FlowStorage, MemoryFlowStorage};
pub use types::{
    ConditionOperator, ExecutionMode, ExecutionState, FlowConfig, FlowExecutionResult, FlowStep,
    RetryConfig, StepCondition, StepResult, StepStatus,
};
pub use validation::{find_cycles, FlowValidator, ValidationIssue, ValidationReport};
