//! OpenAI-compatible chat-completion client over several vendors.
//!
//! Pure HTTP: wire types, SSE chunk decoding, a pull-style stream reader,
//! vendor adapters and request validation.

mod client;
mod error;
pub mod providers;
pub mod stream;
pub mod types;
mod validate;

pub use client::{ClientConfig, UnifiedClient};
pub use error::{LlmError, Result};
pub use providers::{
    ByteStream, Provider, ProviderConfig, ProviderFactory, ProviderKind, ProviderRegistry,
};
pub use stream::{Frame, StreamReader, decode_line};
pub use types::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ContentPart, Message,
    MessageContent, Role, Tool, ToolCall, ToolCallFragment, ToolChoice, Usage,
};
pub use validate::{validate_request, validate_tool_name};
