use super::http::Transport;
use super::{ByteStream, Provider, ProviderConfig};
use crate::error::Result;
use crate::types::{
    ChatCompletionRequest, ChatCompletionResponse, Message, ResponseFormat, Role, StreamOptions,
    Tool, ToolCall, ToolChoice,
};
use async_trait::async_trait;
use serde::Serialize;

pub(crate) const DEFAULT_BASE_URL: &str = "https://api.deepseek.com";

/// DeepSeek accepts text-only messages and none of the thinking extensions.
#[derive(Clone)]
pub struct DeepSeekProvider {
    transport: Transport,
}

impl DeepSeekProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        Ok(Self {
            transport: Transport::new("deepseek", DEFAULT_BASE_URL, config)?,
        })
    }
}

#[derive(Debug, Serialize)]
struct DeepSeekRequest<'a> {
    model: &'a str,
    messages: Vec<DeepSeekMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    stop: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<&'a ResponseFormat>,
    #[serde(skip_serializing_if = "<[Tool]>::is_empty")]
    tools: &'a [Tool],
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'a ToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    logprobs: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_logprobs: Option<u32>,
}

#[derive(Debug, Serialize)]
struct DeepSeekMessage<'a> {
    role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "<[ToolCall]>::is_empty")]
    tool_calls: &'a [ToolCall],
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
}

impl<'a> From<&'a Message> for DeepSeekMessage<'a> {
    fn from(m: &'a Message) -> Self {
        Self {
            role: m.role,
            // Image parts are dropped; only the first text part survives.
            content: m.content.as_ref().map(|c| c.as_text()),
            name: m.name.as_deref(),
            tool_calls: &m.tool_calls,
            tool_call_id: m.tool_call_id.as_deref(),
        }
    }
}

impl<'a> DeepSeekRequest<'a> {
    fn new(req: &'a ChatCompletionRequest, stream: bool) -> Self {
        Self {
            model: &req.model,
            messages: req.messages.iter().map(DeepSeekMessage::from).collect(),
            max_tokens: req.max_tokens,
            temperature: req.temperature,
            top_p: req.top_p,
            stream,
            stop: &req.stop,
            presence_penalty: req.presence_penalty,
            frequency_penalty: req.frequency_penalty,
            response_format: req.response_format.as_ref(),
            tools: &req.tools,
            tool_choice: req.tool_choice.as_ref(),
            stream_options: if stream { req.stream_options } else { None },
            logprobs: req.logprobs,
            top_logprobs: req.top_logprobs,
        }
    }
}

#[async_trait]
impl Provider for DeepSeekProvider {
    fn name(&self) -> &str {
        "deepseek"
    }

    fn base_url(&self) -> &str {
        self.transport.base_url()
    }

    #[tracing::instrument(level = "info", skip_all, fields(model = %req.model))]
    async fn create_chat_completion(
        &self,
        req: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse> {
        self.transport
            .send_json(&DeepSeekRequest::new(req, false))
            .await
    }

    #[tracing::instrument(level = "info", skip_all, fields(model = %req.model))]
    async fn create_chat_completion_stream(
        &self,
        req: &ChatCompletionRequest,
    ) -> Result<ByteStream> {
        self.transport
            .send_stream(&DeepSeekRequest::new(req, true))
            .await
    }
}
