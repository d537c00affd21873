use anyllm_client::{ChatCompletionChunk, StreamReader, ToolCall, ToolCallFragment};
use anyllm_tools::{
    FunctionRegistry, Parsed, ToolCallAccumulator, ToolError, handler_fn, parse_arguments,
    parse_arguments_safely,
};
use bytes::Bytes;
use serde::Deserialize;

type Body = futures_util::stream::Iter<std::vec::IntoIter<Result<Bytes, std::io::Error>>>;

fn body(parts: Vec<String>) -> Body {
    futures_util::stream::iter(parts.into_iter().map(|p| Ok(Bytes::from(p))).collect::<Vec<_>>())
}

#[derive(Debug, Deserialize, PartialEq)]
struct WeatherArgs {
    city: String,
}

fn weather_registry() -> FunctionRegistry {
    let registry = FunctionRegistry::new();
    registry.register(
        "get_weather",
        handler_fn(|call: ToolCall| async move {
            let args: WeatherArgs = parse_arguments(&call)?;
            Ok(format!("Sunny in {}", args.city))
        }),
    );
    registry
}

#[tokio::test]
async fn bare_fragments_reassemble_and_dispatch() {
    let lines = vec![
        "data: {\"id\":\"c1\",\"type\":\"function\",\"function\":{\"name\":\"get_weather\",\"arguments\":\"\"}}\n".to_string(),
        "data: {\"id\":\"\",\"function\":{\"arguments\":\"{\\\"city\\\":\"}}\n".to_string(),
        "\n".to_string(),
        "data: {\"id\":\"\",\"function\":{\"arguments\":\"\\\"NYC\\\"}\"}}\n".to_string(),
        "data: [DONE]\n".to_string(),
    ];
    let mut reader = StreamReader::<ToolCallFragment>::new(body(lines));
    let acc = ToolCallAccumulator::new();

    let mut seen = 0;
    while reader.advance().await {
        let frag = reader.take_current().unwrap();
        acc.process_delta(&[frag]);
        seen += 1;
        if seen == 2 {
            let pending = acc.pending_tool_calls();
            assert_eq!(pending["c1"], r#"{"city":"#);
            let partial: Parsed<WeatherArgs> =
                parse_arguments_safely(&ToolCall::new("c1", "get_weather", &pending["c1"])).unwrap();
            assert_eq!(partial, Parsed::Incomplete);
        }
    }
    assert!(reader.error().is_none());
    assert_eq!(seen, 3);

    let calls = acc.finalize_stream();
    assert_eq!(
        calls,
        vec![ToolCall::new("c1", "get_weather", r#"{"city":"NYC"}"#)]
    );
    let parsed: Parsed<WeatherArgs> = parse_arguments_safely(&calls[0]).unwrap();
    assert_eq!(parsed, Parsed::Complete(WeatherArgs { city: "NYC".into() }));

    let results = weather_registry().handle_all(&calls).await;
    assert_eq!(results[0].content, "Sunny in NYC");
    let msg = results[0].to_tool_message();
    assert_eq!(msg.tool_call_id.as_deref(), Some("c1"));
}

fn chunk_line(fragments: serde_json::Value, finish: Option<&str>) -> String {
    let chunk = serde_json::json!({
        "id": "s1",
        "choices": [{"index": 0, "delta": {"tool_calls": fragments}, "finish_reason": finish}]
    });
    format!("data: {chunk}\n\n")
}

#[tokio::test]
async fn finish_signal_before_last_fragment_is_not_the_end() {
    let parts = vec![
        chunk_line(
            serde_json::json!([{"index": 0, "id": "c1", "type": "function", "function": {"name": "get_weather", "arguments": "{\"ci"}}]),
            None,
        ),
        // Finish arrives while the buffer is still open.
        chunk_line(
            serde_json::json!([{"index": 0, "function": {"arguments": "ty\":\"Par"}}]),
            Some("tool_calls"),
        ),
        chunk_line(serde_json::json!([{"index": 0, "function": {"arguments": "is\"}"}}]), None),
        "data: [DONE]\n".to_string(),
    ];
    let mut reader = StreamReader::<ChatCompletionChunk>::new(body(parts));
    let acc = ToolCallAccumulator::new();

    let mut finished_with_pending = false;
    while reader.advance().await {
        let chunk = reader.take_current().unwrap();
        acc.process_delta(chunk.tool_call_fragments());
        if chunk.finish_reason() == Some("tool_calls") && acc.has_pending_tool_calls() {
            finished_with_pending = true;
        }
    }
    assert!(finished_with_pending);

    let calls = acc.finalize_stream();
    assert_eq!(calls.len(), 1);
    let results = weather_registry().handle_all(&calls).await;
    assert_eq!(results[0].content, "Sunny in Paris");
}

#[tokio::test]
async fn truncated_stream_leaves_call_pending() {
    let parts = vec![
        "data: {\"id\":\"c9\",\"function\":{\"name\":\"get_weather\",\"arguments\":\"{\\\"city\\\":\\\"Li\"}}\n".to_string(),
    ];
    let mut reader = StreamReader::<ToolCallFragment>::new(body(parts));
    let acc = ToolCallAccumulator::new();
    while reader.advance().await {
        acc.process_delta(&[reader.take_current().unwrap()]);
    }
    assert!(acc.finalize_stream().is_empty());
    assert_eq!(acc.pending_count(), 1);

    let forced = acc.force_complete_tool_call("c9").unwrap();
    let result = weather_registry().handle(&forced).await;
    assert!(result.error.unwrap().contains("incomplete arguments"));
}

#[tokio::test]
async fn dispatch_isolation_between_calls() {
    let registry = FunctionRegistry::new();
    registry.register(
        "a",
        handler_fn(|_call| async { Err(ToolError::ExecutionFailed("a exploded".into())) }),
    );
    registry.register("b", handler_fn(|_call| async { Ok("b ok".to_string()) }));

    let calls = vec![ToolCall::new("1", "a", "{}"), ToolCall::new("2", "b", "{}")];
    let results = registry.handle_all(&calls).await;
    assert_eq!(results[0].error.as_deref(), Some("execution failed: a exploded"));
    assert_eq!(results[0].to_tool_message().text(), "Error: execution failed: a exploded");
    assert_eq!(results[1].content, "b ok");
    assert!(results[1].error.is_none());

    // b alone behaves the same as alongside a failing sibling
    let alone = registry.handle(&calls[1]).await;
    assert_eq!(alone, results[1]);
}
