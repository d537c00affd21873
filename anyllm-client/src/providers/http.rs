use super::{ByteStream, ProviderConfig};
use crate::error::{LlmError, Result};
use futures_util::StreamExt;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::time::Duration;

const CHAT_COMPLETIONS_PATH: &str = "/chat/completions";

/// Shared `POST {base}/chat/completions` plumbing for OpenAI-compatible vendors.
#[derive(Clone)]
pub(crate) struct Transport {
    http: reqwest::Client,
    vendor: &'static str,
    base_url: String,
    api_key: String,
    headers: BTreeMap<String, String>,
}

impl Transport {
    pub(crate) fn new(
        vendor: &'static str,
        default_base_url: &str,
        config: ProviderConfig,
    ) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(LlmError::Config(format!("{vendor}: api key is required")));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(%e, "reqwest client build failed; falling back to default client");
                reqwest::Client::new()
            });
        let base_url = config
            .base_url
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| default_base_url.to_string())
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            http,
            vendor,
            base_url,
            api_key: config.api_key,
            headers: config.extra_headers,
        })
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn with_header(mut self, name: &str, value: Option<String>) -> Self {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            self.headers.insert(name.to_string(), value);
        }
        self
    }

    async fn post<B: Serialize + ?Sized>(&self, body: &B, accept: &str) -> Result<reqwest::Response> {
        let url = format!("{}{CHAT_COMPLETIONS_PATH}", self.base_url);
        let mut builder = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .header(reqwest::header::ACCEPT, accept)
            .json(body);
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        tracing::warn!(vendor = self.vendor, status = status.as_u16(), "chat completion rejected");
        Err(api_error(status.as_u16(), &body))
    }

    pub(crate) async fn send_json<B, T>(&self, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.post(body, "application/json").await?;
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            LlmError::ResponseFormat(format!("{} response json error={e} body={text}", self.vendor))
        })
    }

    pub(crate) async fn send_stream<B: Serialize + ?Sized>(&self, body: &B) -> Result<ByteStream> {
        let response = self.post(body, "text/event-stream").await?;
        Ok(response.bytes_stream().boxed())
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
    #[serde(default)]
    request_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default)]
    param: Option<String>,
}

/// Builds an [`LlmError::Api`] from a non-2xx body, falling back to the raw text.
pub(crate) fn api_error(status: u16, body: &str) -> LlmError {
    let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) else {
        return LlmError::Api {
            status,
            message: body.trim().to_string(),
        };
    };

    let err = envelope.error;
    let mut message = err.message;
    if let Some(kind) = err.kind.filter(|k| !k.is_empty()) {
        message.push_str(&format!(" (type={kind})"));
    }
    match err.code {
        Some(serde_json::Value::String(code)) if !code.is_empty() => {
            message.push_str(&format!(" (code={code})"));
        }
        Some(serde_json::Value::Number(code)) => message.push_str(&format!(" (code={code})")),
        _ => {}
    }
    if let Some(param) = err.param.filter(|p| !p.is_empty()) {
        message.push_str(&format!(" (param={param})"));
    }
    if let Some(id) = envelope.request_id.filter(|id| !id.is_empty()) {
        message.push_str(&format!(" (request_id={id})"));
    }
    LlmError::Api { status, message }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_openai_error_envelope() {
        let body = r#"{"error":{"message":"Incorrect API key","type":"invalid_request_error","code":"invalid_api_key","param":null}}"#;
        match api_error(401, body) {
            LlmError::Api { status, message } => {
                assert_eq!(status, 401);
                assert!(message.starts_with("Incorrect API key"));
                assert!(message.contains("code=invalid_api_key"));
                assert!(!message.contains("param="));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn keeps_request_id_and_raw_fallback() {
        let body = r#"{"error":{"message":"busy","code":503},"request_id":"req-1"}"#;
        let err = api_error(503, body);
        assert!(err.is_transient());
        assert!(err.to_string().contains("request_id=req-1"));

        match api_error(502, "  bad gateway \n") {
            LlmError::Api { message, .. } => assert_eq!(message, "bad gateway"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn empty_key_and_default_base_url() {
        assert!(matches!(
            Transport::new("openai", "https://x", ProviderConfig::new("  ")),
            Err(LlmError::Config(_))
        ));
        let t = Transport::new("openai", "https://x/v1", ProviderConfig::new("k")).unwrap();
        assert_eq!(t.base_url(), "https://x/v1");
    }
}
