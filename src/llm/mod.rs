mod client;
mod echo;
mod types;

pub use client::{DynModelClient, ModelClient};
pub use echo::EchoModelClient;
pub use types::{ModelRequest, ModelResponse, ToolDeclaration};
