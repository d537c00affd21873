use crate::error::{Result, ToolError};
use anyllm_client::{Message, ToolCall};
use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::future::join_all;
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;

/// One piece of streamed handler output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamChunk {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub done: bool,
}

impl StreamChunk {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            done: true,
            ..Self::default()
        }
    }

    pub fn done(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            error: None,
            done: true,
        }
    }
}

/// Lazy, finite and not restartable.
pub type ChunkStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send>>;

pub type ChunkSender = mpsc::Sender<StreamChunk>;

/// Producer side for handlers that generate chunks from a spawned task. The
/// stream ends once every sender is dropped.
pub fn chunk_channel(capacity: usize) -> (ChunkSender, ChunkStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        let chunk = rx.recv().await?;
        Some((chunk, rx))
    });
    (tx, stream.boxed())
}

#[async_trait]
pub trait ToolCallHandler: Send + Sync {
    async fn handle_tool_call(&self, call: &ToolCall) -> Result<String>;
}

#[async_trait]
pub trait StreamingToolCallHandler: Send + Sync {
    async fn handle_tool_call_stream(&self, call: &ToolCall) -> Result<ChunkStream>;

    /// Handlers that only stream for some inputs or configurations say so here.
    fn can_stream(&self) -> bool {
        true
    }
}

/// Both shapes at once; implemented for every type that has both.
pub trait UnifiedToolCallHandler: ToolCallHandler + StreamingToolCallHandler {}

impl<T: ToolCallHandler + StreamingToolCallHandler + ?Sized> UnifiedToolCallHandler for T {}

/// Adapts an async closure into a [`ToolCallHandler`].
pub struct FnHandler<F>(F);

pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(ToolCall) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String>> + Send + 'static,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> ToolCallHandler for FnHandler<F>
where
    F: Fn(ToolCall) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String>> + Send + 'static,
{
    async fn handle_tool_call(&self, call: &ToolCall) -> Result<String> {
        (self.0)(call.clone()).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolCallResult {
    pub tool_call_id: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolCallResult {
    fn ok(tool_call_id: &str, content: String) -> Self {
        Self {
            tool_call_id: tool_call_id.to_string(),
            content,
            error: None,
        }
    }

    fn failed(tool_call_id: &str, error: &ToolError) -> Self {
        Self {
            tool_call_id: tool_call_id.to_string(),
            content: String::new(),
            error: Some(error.to_string()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// The `tool` role message answering this call.
    pub fn to_tool_message(&self) -> Message {
        let content = match &self.error {
            Some(err) => format!("Error: {err}"),
            None => self.content.clone(),
        };
        Message::tool(&self.tool_call_id, content)
    }
}

#[derive(Clone)]
enum Registered {
    Plain(Arc<dyn ToolCallHandler>),
    Streaming(Arc<dyn StreamingToolCallHandler>),
    Unified(Arc<dyn UnifiedToolCallHandler>),
}

/// Function name -> handler. Safe to share across tasks.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    handlers: Arc<DashMap<String, Registered>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H: ToolCallHandler + 'static>(&self, name: impl Into<String>, handler: H) {
        self.insert(name.into(), Registered::Plain(Arc::new(handler)));
    }

    pub fn register_streaming<H: StreamingToolCallHandler + 'static>(
        &self,
        name: impl Into<String>,
        handler: H,
    ) {
        self.insert(name.into(), Registered::Streaming(Arc::new(handler)));
    }

    pub fn register_unified<H: UnifiedToolCallHandler + 'static>(
        &self,
        name: impl Into<String>,
        handler: H,
    ) {
        self.insert(name.into(), Registered::Unified(Arc::new(handler)));
    }

    fn insert(&self, name: String, handler: Registered) {
        if self.handlers.insert(name.clone(), handler).is_some() {
            tracing::debug!(function = %name, "replaced tool handler");
        }
    }

    fn lookup(&self, name: &str) -> Option<Registered> {
        self.handlers.get(name).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn function_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.handlers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn can_handle_streaming(&self, name: &str) -> bool {
        match self.lookup(name) {
            Some(Registered::Streaming(h)) => h.can_stream(),
            Some(Registered::Unified(h)) => h.can_stream(),
            Some(Registered::Plain(_)) | None => false,
        }
    }

    /// Runs one call to completion. Failures are reported in the result.
    #[tracing::instrument(level = "info", skip_all, fields(tool_call_id = %call.id, function = %call.function.name))]
    pub async fn handle(&self, call: &ToolCall) -> ToolCallResult {
        let outcome = match self.lookup(&call.function.name) {
            None => Err(ToolError::UnknownFunction(call.function.name.clone())),
            Some(Registered::Plain(h)) => h.handle_tool_call(call).await.map(|c| (c, None)),
            Some(Registered::Unified(h)) => h.handle_tool_call(call).await.map(|c| (c, None)),
            Some(Registered::Streaming(h)) => match h.handle_tool_call_stream(call).await {
                Ok(stream) => Ok(drain(stream).await),
                Err(e) => Err(e),
            },
        };

        match outcome {
            Ok((content, None)) => ToolCallResult::ok(&call.id, content),
            Ok((content, Some(error))) => {
                tracing::warn!(%error, "streaming tool handler reported an error");
                ToolCallResult {
                    tool_call_id: call.id.clone(),
                    content,
                    error: Some(error),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "tool handler failed");
                ToolCallResult::failed(&call.id, &e)
            }
        }
    }

    /// Streams one call. Plain handlers yield a single final chunk; a missing
    /// function or a handler error yields a single error chunk.
    #[tracing::instrument(level = "info", skip_all, fields(tool_call_id = %call.id, function = %call.function.name))]
    pub async fn handle_streaming(&self, call: &ToolCall) -> ChunkStream {
        let streamed = match self.lookup(&call.function.name) {
            None => Err(ToolError::UnknownFunction(call.function.name.clone())),
            Some(Registered::Streaming(h)) => h.handle_tool_call_stream(call).await,
            Some(Registered::Unified(h)) if h.can_stream() => h.handle_tool_call_stream(call).await,
            Some(Registered::Unified(h)) => {
                return single(h.handle_tool_call(call).await);
            }
            Some(Registered::Plain(h)) => {
                return single(h.handle_tool_call(call).await);
            }
        };
        match streamed {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "streaming tool handler failed");
                single(Err(e))
            }
        }
    }

    /// Dispatches every call concurrently; results keep the input order.
    pub async fn handle_all(&self, calls: &[ToolCall]) -> Vec<ToolCallResult> {
        join_all(calls.iter().map(|call| self.handle(call))).await
    }
}

fn single(result: Result<String>) -> ChunkStream {
    let chunk = match result {
        Ok(content) => StreamChunk::done(content),
        Err(e) => StreamChunk::error(e.to_string()),
    };
    futures_util::stream::once(async move { chunk }).boxed()
}

/// Concatenates streamed content, keeping the first reported error.
async fn drain(mut stream: ChunkStream) -> (String, Option<String>) {
    let mut content = String::new();
    let mut error = None;
    while let Some(chunk) = stream.next().await {
        content.push_str(&chunk.content);
        if error.is_none() {
            error = chunk.error;
        }
        if chunk.done {
            break;
        }
    }
    (content, error)
}
