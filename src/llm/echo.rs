use async_trait::async_trait;

use super::client::ModelClient;
use super::types::{ModelRequest, ModelResponse};
use crate::agent::{Message, MessageRole};
use crate::error::Result;

/// Offline backend that answers with the text of the last user message.
#[derive(Default, Clone)]
pub struct EchoModelClient;

#[async_trait]
impl ModelClient for EchoModelClient {
    async fn generate(&self, request: ModelRequest) -> Result<ModelResponse> {
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|message| message.role == MessageRole::User)
            .map(|message| message.text_content())
            .unwrap_or_default();
        Ok(ModelResponse::new(Message::assistant(format!(
            "[Echo] {last_user}"
        ))))
    }
}
