pub mod agent;
pub mod config;
pub mod error;
pub mod flow;
pub mod llm;
pub mod plugin;
pub mod runtime;
pub mod state;
pub mod tools;
pub mod utils;

pub use agent::{
    collect_events, collect_response, Agent, Event, EventKind, EventPayload, EventStream,
    FunctionCall, FunctionResponse, InvocationContext, LlmAgent, LlmAgentBuilder, LoopAgent,
    MemoryEntry, MemoryService, Message, MessageRole, ParallelAgent, Part, SequentialAgent,
    ToolCallStatus,
};
pub use config::{EngineConfig, FlowManagerConfig, RunnerConfig};
pub use error::{LoomError, Result};
pub use flow::{
    ContextOverrides, ExecutionMode, ExecutionQuery, ExecutionState, FlowBackup, FlowBuilder,
    FlowConfig, FlowEngine, FlowExecutionResult, FlowManager, FlowStep, FlowStorage,
    FlowValidator, MemoryFlowStorage, RestoreOptions, RetryConfig, StepExecutor,
    StepExecutorRegistry, StepOutcome, ValidationIssue,
};
pub use llm::{DynModelClient, EchoModelClient, ModelClient, ModelRequest, ModelResponse};
pub use plugin::{Plugin, PluginSet};
pub use runtime::{RunOutcome, Runner, RunnerEvent, RunnerListener, RunnerMetrics};
pub use state::{FlowContext, SessionState, SessionStore};
pub use tools::{AgentTool, FunctionTool, PendingToolCalls, Tool, ToolContext, ToolOutcome, ToolSet};
pub use utils::{logging, validation};
