use super::http::Transport;
use super::{ByteStream, Provider, ProviderConfig};
use crate::error::{LlmError, Result};
use crate::stream::StreamReader;
use crate::types::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, Choice, Message,
    MessageContent, Role, ToolCall, ToolCallFragment,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;

pub(crate) const DEFAULT_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";

const THINKING_INTERRUPTED: &str =
    "[thinking interrupted] the reasoning phase timed out before an answer was produced.";

/// DashScope's OpenAI-compatible mode, including the Qwen thinking extensions.
#[derive(Clone)]
pub struct AliCloudProvider {
    transport: Transport,
    timeouts: PhaseTimeouts,
}

impl AliCloudProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let timeouts = PhaseTimeouts::from_config(&config);
        Ok(Self {
            transport: Transport::new("alicloud", DEFAULT_BASE_URL, config)?,
            timeouts,
        })
    }

    /// Thinking mode is only served over SSE.
    async fn complete_via_stream(
        &self,
        req: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse> {
        tracing::debug!("thinking enabled; folding streamed response");
        let body = self.create_chat_completion_stream(req).await?;
        fold_stream(StreamReader::new(body), self.timeouts).await
    }
}

#[async_trait]
impl Provider for AliCloudProvider {
    fn name(&self) -> &str {
        "alicloud"
    }

    fn base_url(&self) -> &str {
        self.transport.base_url()
    }

    #[tracing::instrument(level = "info", skip_all, fields(model = %req.model))]
    async fn create_chat_completion(
        &self,
        req: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse> {
        if req.is_thinking_enabled() {
            return self.complete_via_stream(req).await;
        }
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

/// Limits applied while folding a thinking stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PhaseTimeouts {
    /// Total time allowed before the first answer token.
    thinking: Duration,
    /// Silence allowed once the answer has started.
    output: Duration,
    /// Wait allowed for any single chunk.
    read: Duration,
}

impl PhaseTimeouts {
    fn from_config(config: &ProviderConfig) -> Self {
        Self {
            thinking: Duration::from_secs(config.thinking_timeout_secs),
            output: Duration::from_secs(config.output_timeout_secs),
            read: Duration::from_secs(config.read_timeout_secs),
        }
    }
}

/// Which limit bounds the current wait.
#[derive(Debug, Clone, Copy)]
enum Wait {
    Thinking,
    Output,
    Read,
}

/// Reads a thinking stream to the end. A stall after text has arrived yields
/// a partial response tagged `timeout_partial` or `output_timeout`.
async fn fold_stream(
    mut reader: StreamReader<ChatCompletionChunk>,
    limits: PhaseTimeouts,
) -> Result<ChatCompletionResponse> {
    let started = Instant::now();
    let mut folded = FoldedResponse::default();

    loop {
        let (limit, wait) = if folded.answering() {
            if limits.output <= limits.read {
                (limits.output, Wait::Output)
            } else {
                (limits.read, Wait::Read)
            }
        } else {
            let left = limits.thinking.saturating_sub(started.elapsed());
            if left <= limits.read {
                (left, Wait::Thinking)
            } else {
                (limits.read, Wait::Read)
            }
        };

        match tokio::time::timeout(limit, reader.advance()).await {
            Ok(true) => {
                if let Some(chunk) = reader.take_current() {
                    folded.push(chunk);
                }
            }
            Ok(false) => break,
            Err(_) => {
                tracing::warn!(?wait, ?limit, "alicloud thinking stream stalled");
                return match wait {
                    Wait::Thinking => Err(LlmError::Timeout(format!(
                        "alicloud: thinking exceeded {:?}",
                        limits.thinking
                    ))),
                    Wait::Output => folded.partial("output_timeout"),
                    Wait::Read if folded.has_text() => folded.partial("timeout_partial"),
                    Wait::Read => Err(LlmError::Timeout(format!(
                        "alicloud: no stream data within {limit:?}"
                    ))),
                };
            }
        }
    }

    if let Some(err) = reader.take_error() {
        return Err(err);
    }
    folded.finish()
}

/// Accumulates streamed chunks into one non-streaming response.
#[derive(Default)]
struct FoldedResponse {
    first: Option<ChatCompletionChunk>,
    content: String,
    reasoning: String,
    /// Keyed by the vendor's `index`.
    tool_calls: BTreeMap<u32, ToolCall>,
    last_slot: Option<u32>,
    finish_reason: Option<String>,
    usage: Option<crate::types::Usage>,
}

impl FoldedResponse {
    fn push(&mut self, chunk: ChatCompletionChunk) {
        if let Some(reason) = chunk.finish_reason() {
            self.finish_reason = Some(reason.to_string());
        }
        if chunk.usage.is_some() {
            self.usage = chunk.usage.clone();
        }
        if let Some(delta) = chunk.delta() {
            if let Some(text) = &delta.content {
                self.content.push_str(text);
            }
            if let Some(text) = &delta.reasoning_content {
                self.reasoning.push_str(text);
            }
            for frag in &delta.tool_calls {
                self.merge_fragment(frag);
            }
        }
        if self.first.is_none() {
            self.first = Some(chunk);
        }
    }

    fn merge_fragment(&mut self, frag: &ToolCallFragment) {
        let slot = match frag.index {
            Some(index) => index,
            None => self.slot_without_index(&frag.id),
        };
        self.last_slot = Some(slot);

        let call = self
            .tool_calls
            .entry(slot)
            .or_insert_with(|| ToolCall::new("", "", ""));
        if !frag.id.is_empty() {
            call.id = frag.id.clone();
        }
        if !frag.kind.is_empty() {
            call.kind = frag.kind.clone();
        }
        if !frag.function.name.is_empty() {
            call.function.name = frag.function.name.clone();
        }
        call.function.arguments.push_str(&frag.function.arguments);
    }

    /// Same id reuses its slot, a new id opens the next one, and an empty id
    /// continues the most recent call.
    fn slot_without_index(&self, id: &str) -> u32 {
        if !id.is_empty() {
            if let Some((slot, _)) = self.tool_calls.iter().find(|(_, call)| call.id == id) {
                return *slot;
            }
            return self
                .tool_calls
                .last_key_value()
                .map_or(0, |(slot, _)| slot.saturating_add(1));
        }
        self.last_slot.unwrap_or(0)
    }

    /// The answer phase starts with the first content or tool-call delta.
    fn answering(&self) -> bool {
        !self.content.is_empty() || !self.tool_calls.is_empty()
    }

    fn has_text(&self) -> bool {
        !self.content.is_empty() || !self.reasoning.is_empty()
    }

    fn partial(mut self, reason: &str) -> Result<ChatCompletionResponse> {
        if self.content.is_empty() && !self.reasoning.is_empty() {
            self.content = THINKING_INTERRUPTED.to_string();
        }
        self.finish_reason = Some(reason.to_string());
        self.finish()
    }

    fn finish(self) -> Result<ChatCompletionResponse> {
        let first = self.first.ok_or_else(|| {
            LlmError::ResponseFormat("thinking stream ended without any chunk".to_string())
        })?;
        let message = Message {
            role: Role::Assistant,
            content: Some(MessageContent::Text(self.content)),
            name: None,
            tool_calls: self.tool_calls.into_values().collect(),
            tool_call_id: None,
            reasoning_content: Some(self.reasoning).filter(|r| !r.is_empty()),
        };
        Ok(ChatCompletionResponse {
            id: first.id,
            object: "chat.completion".to_string(),
            created: first.created,
            model: first.model,
            choices: vec![Choice {
                index: 0,
                message,
                finish_reason: self.finish_reason,
            }],
            usage: self.usage,
            system_fingerprint: None,
        })
    }
}
