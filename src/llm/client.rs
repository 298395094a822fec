use std::sync::Arc;

use async_trait::async_trait;

use super::types::{ModelRequest, ModelResponse};
use crate::error::Result;

/// Model-invocation backend: prompt + tool schema in, generated content + tool calls out.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn generate(&self, request: ModelRequest) -> Result<ModelResponse>;
}

pub type DynModelClient = Arc<dyn ModelClient>;
