#[allow(clippy::module_inception)]
mod agent;
mod context;
mod event;
mod llm_agent;
mod loop_agent;
mod message;
mod parallel;
mod sequential;
mod tooling;

pub use agent::{collect_events, collect_response, Agent, EventStream};
pub use context::{InvocationContext, MemoryEntry, MemoryService};
pub use event::{Event, EventKind, EventPayload};
pub use llm_agent::{LlmAgent, LlmAgentBuilder, DEFAULT_MAX_ITERATIONS};
pub use loop_agent::{LoopAgent, LoopCondition, LoopTransform};
pub use message::{
    new_id, FunctionCall, FunctionResponse, Message, MessageRole, Part, ToolCallStatus,
};
pub use parallel::ParallelAgent;
pub use sequential::SequentialAgent;
