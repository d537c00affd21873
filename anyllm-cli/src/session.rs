//! Streamed chat turns and the tool-calling loop.

use crate::config::AppConfig;
use anyllm_client::types::FINISH_REASON_TOOL_CALLS;
use anyllm_client::{
    ChatCompletionChunk, ChatCompletionRequest, Message, StreamReader, Tool, ToolCall,
    ToolChoice, UnifiedClient,
};
use anyllm_tools::{FunctionRegistry, ToolCallAccumulator, ToolCallResult};
use futures_util::StreamExt;
use std::io::Write;

/// What one streamed assistant turn produced.
#[derive(Debug, Default)]
pub struct TurnOutput {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<String>,
}

pub fn request(cfg: &AppConfig, messages: Vec<Message>, tools: Vec<Tool>) -> ChatCompletionRequest {
    let mut req = ChatCompletionRequest::new(&cfg.model, messages);
    req.temperature = cfg.temperature;
    if !tools.is_empty() {
        req = req.with_tools(tools).with_tool_choice(ToolChoice::Auto);
    }
    req
}

/// Drains one streamed turn, echoing text to `out`.
///
/// A `tool_calls` finish reason can arrive while argument bytes are still in
/// flight, so reading continues until the stream itself ends and only then
/// are buffers finalized.
pub async fn drain_turn(
    mut reader: StreamReader<ChatCompletionChunk>,
    out: &mut impl Write,
) -> anyhow::Result<TurnOutput> {
    let acc = ToolCallAccumulator::new();
    let mut turn = TurnOutput::default();

    while reader.advance().await {
        let Some(chunk) = reader.take_current() else {
            continue;
        };
        if let Some(delta) = chunk.delta() {
            if let Some(reasoning) = delta.reasoning_content.as_deref() {
                tracing::trace!(reasoning, "reasoning delta");
            }
            if let Some(text) = delta.content.as_deref() {
                write!(out, "{text}")?;
                out.flush()?;
                turn.text.push_str(text);
            }
        }
        acc.process_delta(chunk.tool_call_fragments());

        if let Some(reason) = chunk.finish_reason() {
            if reason == FINISH_REASON_TOOL_CALLS && acc.has_pending_tool_calls() {
                tracing::debug!(
                    pending = acc.pending_count(),
                    "finish signal arrived before the last fragments; still reading"
                );
            }
            turn.finish_reason = Some(reason.to_string());
        }
    }
    if let Some(err) = reader.take_error() {
        return Err(err.into());
    }

    turn.tool_calls = acc.finalize_stream();
    if acc.has_pending_tool_calls() {
        for (id, info) in acc.pending_tool_calls_debug_info() {
            tracing::warn!(tool_call_id = %id, %info, "dropping incomplete tool call");
        }
    }
    Ok(turn)
}

pub async fn run_chat(
    client: &UnifiedClient,
    cfg: &AppConfig,
    prompt: &str,
    out: &mut impl Write,
) -> anyhow::Result<TurnOutput> {
    let messages = vec![Message::system(cfg.system_prompt.as_str()), Message::user(prompt)];
    let reader = client
        .create_chat_completion_stream(&request(cfg, messages, Vec::new()))
        .await?;
    let turn = drain_turn(reader, out).await?;
    writeln!(out)?;
    Ok(turn)
}

/// Streams turns until the model stops asking for tools or `max_turns` runs out.
pub async fn run_tools(
    client: &UnifiedClient,
    registry: &FunctionRegistry,
    tools: Vec<Tool>,
    cfg: &AppConfig,
    prompt: &str,
    out: &mut impl Write,
) -> anyhow::Result<Vec<Message>> {
    let mut messages = vec![Message::system(cfg.system_prompt.as_str()), Message::user(prompt)];

    for turn_no in 1..=cfg.max_turns {
        let req = request(cfg, messages.clone(), tools.clone());
        let reader = client.create_chat_completion_stream(&req).await?;
        let turn = drain_turn(reader, out).await?;
        tracing::info!(
            turn = turn_no,
            tool_calls = turn.tool_calls.len(),
            finish_reason = ?turn.finish_reason,
            "assistant turn finished"
        );

        if turn.tool_calls.is_empty() {
            writeln!(out)?;
            messages.push(Message::assistant(turn.text));
            return Ok(messages);
        }

        messages.push(Message::assistant_tool_calls(turn.text, turn.tool_calls.clone()));
        for result in dispatch(registry, &turn.tool_calls, out).await? {
            messages.push(result.to_tool_message());
        }
    }

    tracing::warn!(max_turns = cfg.max_turns, "stopping after max_turns");
    writeln!(out, "\n[stopped after {} turns]", cfg.max_turns)?;
    Ok(messages)
}

/// Streams output of streaming-capable handlers as it arrives; the rest run
/// concurrently. Results follow call order.
async fn dispatch(
    registry: &FunctionRegistry,
    calls: &[ToolCall],
    out: &mut impl Write,
) -> anyhow::Result<Vec<ToolCallResult>> {
    let (streamed, plain): (Vec<&ToolCall>, Vec<&ToolCall>) = calls
        .iter()
        .partition(|c| registry.can_handle_streaming(&c.function.name));
    let plain: Vec<ToolCall> = plain.into_iter().cloned().collect();
    let mut plain_results = registry.handle_all(&plain).await.into_iter();

    let mut results = Vec::with_capacity(calls.len());
    for call in calls {
        if !streamed.iter().any(|s| s.id == call.id) {
            if let Some(result) = plain_results.next() {
                writeln!(out, "\n[{}] {}", call.function.name, result.to_tool_message().text())?;
                results.push(result);
            }
            continue;
        }

        write!(out, "\n[{}] ", call.function.name)?;
        let mut stream = registry.handle_streaming(call).await;
        let mut content = String::new();
        let mut error = None;
        while let Some(chunk) = stream.next().await {
            write!(out, "{}", chunk.content)?;
            out.flush()?;
            content.push_str(&chunk.content);
            if error.is_none() {
                error = chunk.error;
            }
            if chunk.done {
                break;
            }
        }
        writeln!(out)?;
        results.push(ToolCallResult {
            tool_call_id: call.id.clone(),
            content,
            error,
        });
    }
    Ok(results)
}
