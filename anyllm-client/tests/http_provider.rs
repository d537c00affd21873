use anyllm_client::{
    ChatCompletionRequest, ClientConfig, LlmError, Message, ProviderKind, ProviderRegistry,
    UnifiedClient,
};
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
struct Seen {
    requests: Arc<Mutex<Vec<(HeaderMap, Value)>>>,
}

const SSE_BODY: &str = concat!(
    ": ping\n",
    "data: {\"id\":\"s1\",\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"tool_calls\":[{\"index\":0,\"id\":\"c1\",\"type\":\"function\",\"function\":{\"name\":\"get_weather\",\"arguments\":\"\"}}]}}]}\n\n",
    "data: {\"id\":\"s1\",\"choices\":[{\"index\":0,\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"{\\\"city\\\":\"}}]}}]}\n\n",
    "data: {\"id\":\"s1\",\"choices\":[{\"index\":0,\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"\\\"NYC\\\"}\"}}]},\"finish_reason\":\"tool_calls\"}]}\n\n",
    "data: [DONE]\n\n",
);

async fn completions(State(seen): State<Seen>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    let streaming = body["stream"].as_bool().unwrap_or(false);
    seen.requests.lock().unwrap().push((headers, body));
    if streaming {
        return ([(header::CONTENT_TYPE, "text/event-stream")], SSE_BODY).into_response();
    }
    Json(json!({
        "id": "r1",
        "object": "chat.completion",
        "model": "m",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": "pong"}, "finish_reason": "stop"}],
        "usage": {"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2}
    }))
    .into_response()
}

async fn rejected() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": {"message": "Incorrect API key", "type": "invalid_request_error", "code": "invalid_api_key"}})),
    )
        .into_response()
}

async fn spawn_server() -> (String, Seen) {
    let seen = Seen::default();
    let app = Router::new()
        .route("/v1/chat/completions", post(completions))
        .route("/denied/chat/completions", post(rejected))
        .with_state(seen.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), seen)
}

fn client(kind: ProviderKind, base_url: String) -> UnifiedClient {
    let mut config = ClientConfig::new(kind, "sk-test");
    config.base_url = Some(base_url);
    config.organization = Some("org-1".into());
    config.extra_headers.insert("x-trace".into(), "abc".into());
    UnifiedClient::new(&ProviderRegistry::with_builtin(), config).unwrap()
}

#[tokio::test]
async fn non_streaming_completion_round_trips_with_headers() {
    let (base, seen) = spawn_server().await;
    let client = client(ProviderKind::OpenAi, format!("{base}/v1"));
    let req = ChatCompletionRequest::new("m", vec![Message::user("ping")]);

    let resp = client.create_chat_completion(&req).await.unwrap();
    assert_eq!(resp.first_message().unwrap().text(), "pong");
    assert_eq!(resp.usage.unwrap().total_tokens, 2);

    let requests = seen.requests.lock().unwrap();
    let (headers, body) = &requests[0];
    assert_eq!(headers[header::AUTHORIZATION], "Bearer sk-test");
    assert_eq!(headers["openai-organization"], "org-1");
    assert_eq!(headers["x-trace"], "abc");
    assert!(body.get("stream").is_none());
}

#[tokio::test]
async fn streamed_tool_call_reaches_the_reader() {
    let (base, _seen) = spawn_server().await;
    let client = client(ProviderKind::DeepSeek, format!("{base}/v1"));
    let req = ChatCompletionRequest::new("m", vec![Message::user("weather in NYC?")]);

    let mut reader = client.create_chat_completion_stream(&req).await.unwrap();
    let mut arguments = String::new();
    let mut finish = None;
    while reader.advance().await {
        let chunk = reader.current().unwrap();
        for frag in chunk.tool_call_fragments() {
            arguments.push_str(&frag.function.arguments);
        }
        if let Some(reason) = chunk.finish_reason() {
            finish = Some(reason.to_string());
        }
    }
    assert!(reader.error().is_none());
    assert_eq!(arguments, r#"{"city":"NYC"}"#);
    assert_eq!(finish.as_deref(), Some("tool_calls"));
}

#[tokio::test]
async fn thinking_request_is_folded_from_stream() {
    let (base, seen) = spawn_server().await;
    let client = client(ProviderKind::AliCloud, format!("{base}/v1"));
    let req = ChatCompletionRequest::new("qwen-plus", vec![Message::user("weather?")])
        .with_enable_thinking(true);

    let resp = client.create_chat_completion(&req).await.unwrap();
    let msg = resp.first_message().unwrap();
    assert_eq!(msg.tool_calls.len(), 1);
    assert_eq!(msg.tool_calls[0].function.arguments, r#"{"city":"NYC"}"#);
    assert_eq!(seen.requests.lock().unwrap()[0].1["stream"], true);
}

#[tokio::test]
async fn error_envelope_becomes_api_error() {
    let (base, _seen) = spawn_server().await;
    let client = client(ProviderKind::OpenAi, format!("{base}/denied"));
    let req = ChatCompletionRequest::new("m", vec![Message::user("ping")]);

    match client.create_chat_completion(&req).await {
        Err(LlmError::Api { status, message }) => {
            assert_eq!(status, 401);
            assert!(message.contains("Incorrect API key"));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(client.create_chat_completion_stream(&req).await.is_err());
}
