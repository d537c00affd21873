use super::http::Transport;
use super::{ByteStream, Provider, ProviderConfig};
use crate::error::Result;
use crate::types::{ChatCompletionRequest, ChatCompletionResponse};
use async_trait::async_trait;

pub(crate) const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI's own API; requests are sent as-is.
#[derive(Clone)]
pub struct OpenAiProvider {
    transport: Transport,
}

impl OpenAiProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let organization = config.organization.clone();
        let transport = Transport::new("openai", DEFAULT_BASE_URL, config)?
            .with_header("OpenAI-Organization", organization);
        Ok(Self { transport })
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn base_url(&self) -> &str {
        self.transport.base_url()
    }

    #[tracing::instrument(level = "info", skip_all, fields(model = %req.model))]
    async fn create_chat_completion(
        &self,
        req: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse> {
        let mut req = req.clone();
        req.stream = false;
        req.stream_options = None;
        self.transport.send_json(&req).await
    }

    #[tracing::instrument(level = "info", skip_all, fields(model = %req.model))]
    async fn create_chat_completion_stream(
        &self,
        req: &ChatCompletionRequest,
    ) -> Result<ByteStream> {
        let mut req = req.clone();
        req.stream = true;
        self.transport.send_stream(&req).await
    }
}
