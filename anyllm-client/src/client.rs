use crate::error::Result;
use crate::providers::{
    Provider, ProviderConfig, ProviderKind, ProviderRegistry, default_output_timeout_secs,
    default_read_timeout_secs, default_thinking_timeout_secs,
};
use crate::stream::StreamReader;
use crate::types::{ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse};
use crate::validate::validate_request;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

fn default_provider() -> ProviderKind {
    ProviderKind::DeepSeek
}

fn default_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_provider")]
    pub provider: ProviderKind,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub extra_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub organization: Option<String>,
    /// Skip [`validate_request`] before sending.
    #[serde(default)]
    pub disable_request_validation: bool,
    #[serde(default = "default_thinking_timeout_secs")]
    pub thinking_timeout_secs: u64,
    #[serde(default = "default_output_timeout_secs")]
    pub output_timeout_secs: u64,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_key: String::new(),
            base_url: None,
            timeout_secs: default_timeout_secs(),
            extra_headers: BTreeMap::new(),
            organization: None,
            disable_request_validation: false,
            thinking_timeout_secs: default_thinking_timeout_secs(),
            output_timeout_secs: default_output_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
        }
    }
}

impl ClientConfig {
    pub fn new(provider: ProviderKind, api_key: impl Into<String>) -> Self {
        Self {
            provider,
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    fn provider_config(&self) -> ProviderConfig {
        ProviderConfig {
            api_key: self.api_key.clone(),
            base_url: self.base_url.clone(),
            timeout_secs: self.timeout_secs,
            extra_headers: self.extra_headers.clone(),
            organization: self.organization.clone(),
            thinking_timeout_secs: self.thinking_timeout_secs,
            output_timeout_secs: self.output_timeout_secs,
            read_timeout_secs: self.read_timeout_secs,
        }
    }
}

/// One entry point over any registered vendor.
#[derive(Clone)]
pub struct UnifiedClient {
    provider: Arc<dyn Provider>,
    validate: bool,
}

impl UnifiedClient {
    #[tracing::instrument(level = "debug", skip_all, fields(provider = %config.provider))]
    pub fn new(registry: &ProviderRegistry, config: ClientConfig) -> Result<Self> {
        let provider = registry.create(config.provider, config.provider_config())?;
        Ok(Self {
            provider,
            validate: !config.disable_request_validation,
        })
    }

    pub fn from_provider(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            validate: true,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn base_url(&self) -> &str {
        self.provider.base_url()
    }

    #[tracing::instrument(level = "info", skip_all, fields(provider = %self.provider.name()))]
    pub async fn create_chat_completion(
        &self,
        req: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse> {
        if self.validate {
            validate_request(req)?;
        }
        self.provider.create_chat_completion(req).await
    }

    /// Streams the completion; `stream` is forced on regardless of the request.
    #[tracing::instrument(level = "info", skip_all, fields(provider = %self.provider.name()))]
    pub async fn create_chat_completion_stream(
        &self,
        req: &ChatCompletionRequest,
    ) -> Result<StreamReader<ChatCompletionChunk>> {
        let mut req = req.clone();
        req.stream = true;
        if self.validate {
            validate_request(&req)?;
        }
        let body = self.provider.create_chat_completion_stream(&req).await?;
        Ok(StreamReader::new(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::providers::ByteStream;
    use crate::types::{ChatCompletionResponse, Message};
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures_util::StreamExt;
    use std::sync::Mutex;

    /// Records the last request and replays a canned SSE body.
    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<ChatCompletionRequest>>,
    }

    #[async_trait]
    impl Provider for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        fn base_url(&self) -> &str {
            "memory://"
        }

        async fn create_chat_completion(
            &self,
            req: &ChatCompletionRequest,
        ) -> Result<ChatCompletionResponse> {
            self.seen.lock().unwrap().push(req.clone());
            Ok(serde_json::from_str(
                r#"{"id":"r","choices":[{"index":0,"message":{"role":"assistant","content":"ok"}}]}"#,
            )?)
        }

        async fn create_chat_completion_stream(
            &self,
            req: &ChatCompletionRequest,
        ) -> Result<ByteStream> {
            self.seen.lock().unwrap().push(req.clone());
            let body = "data: {\"id\":\"c\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"hi\"}}]}\n\ndata: [DONE]\n";
            Ok(futures_util::stream::iter(vec![Ok(Bytes::from_static(body.as_bytes()))]).boxed())
        }
    }

    #[tokio::test]
    async fn validation_runs_before_the_provider() {
        let provider = Arc::new(Recording::default());
        let client = UnifiedClient::from_provider(provider.clone());
        let bad = ChatCompletionRequest::new("", vec![Message::user("hi")]);
        assert!(matches!(
            client.create_chat_completion(&bad).await,
            Err(LlmError::InvalidInput(_))
        ));
        assert!(provider.seen.lock().unwrap().is_empty());

        let ok = ChatCompletionRequest::new("m", vec![Message::user("hi")]);
        let resp = client.create_chat_completion(&ok).await.unwrap();
        assert_eq!(resp.first_message().unwrap().text(), "ok");
    }

    #[tokio::test]
    async fn stream_forces_stream_flag_and_iterates() {
        let provider = Arc::new(Recording::default());
        let client = UnifiedClient::from_provider(provider.clone());
        let req = ChatCompletionRequest::new("m", vec![Message::user("hi")]);

        let mut reader = client.create_chat_completion_stream(&req).await.unwrap();
        assert!(reader.advance().await);
        assert_eq!(
            reader.current().and_then(|c| c.delta()).and_then(|d| d.content.as_deref()),
            Some("hi")
        );
        assert!(!reader.advance().await);
        assert!(reader.error().is_none());
        assert!(provider.seen.lock().unwrap()[0].stream);
    }

    #[test]
    fn new_uses_registry_and_config() {
        let registry = ProviderRegistry::with_builtin();
        let mut config = ClientConfig::new(ProviderKind::AliCloud, "sk");
        config.base_url = Some("http://127.0.0.1:1/v1".into());
        let client = UnifiedClient::new(&registry, config).unwrap();
        assert_eq!(client.provider_name(), "alicloud");
        assert_eq!(client.base_url(), "http://127.0.0.1:1/v1");

        let missing_key = ClientConfig::new(ProviderKind::OpenAi, "");
        assert!(UnifiedClient::new(&registry, missing_key).is_err());
    }

    #[test]
    fn config_deserializes_from_toml_like_json() {
        let cfg: ClientConfig =
            serde_json::from_str(r#"{"provider":"alicloud","api_key":"k","disable_request_validation":true}"#)
                .unwrap();
        assert_eq!(cfg.provider, ProviderKind::AliCloud);
        assert_eq!(cfg.timeout_secs, 120);
        assert!(cfg.disable_request_validation);
        assert_eq!(cfg.thinking_timeout_secs, 300);

        let cfg: ClientConfig =
            serde_json::from_str(r#"{"output_timeout_secs":5,"read_timeout_secs":2}"#).unwrap();
        let provider = cfg.provider_config();
        assert_eq!(provider.thinking_timeout_secs, 300);
        assert_eq!(provider.output_timeout_secs, 5);
        assert_eq!(provider.read_timeout_secs, 2);
    }
}
