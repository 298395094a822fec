mod builtin;
mod pending;
mod registry;
mod tool;

pub use builtin::{AgentTool, FunctionTool, MemorySearchTool};
pub use pending::PendingToolCalls;
pub use registry::ToolSet;
pub use tool::{Tool, ToolContext, ToolOutcome};
