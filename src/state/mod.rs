// 状态管理模块

mod context;
mod session;

pub use context::FlowContext;
pub use session::{SessionState, SessionStore};
