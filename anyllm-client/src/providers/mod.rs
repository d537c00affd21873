//! Vendor adapters behind one OpenAI-compatible interface.
//!
//! Providers are produced by an explicit [`ProviderRegistry`]; nothing is
//! registered implicitly.

mod alicloud;
mod deepseek;
mod http;
mod openai;

pub use alicloud::AliCloudProvider;
pub use deepseek::DeepSeekProvider;
pub use openai::OpenAiProvider;

use crate::error::{LlmError, Result};
use crate::types::{ChatCompletionRequest, ChatCompletionResponse};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

/// Raw response body of a streaming request, still SSE-framed.
pub type ByteStream = Pin<Box<dyn Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send>>;

pub type ProviderFactory = Arc<dyn Fn(ProviderConfig) -> Result<Arc<dyn Provider>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    DeepSeek,
    AliCloud,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::DeepSeek => "deepseek",
            Self::AliCloud => "alicloud",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAi => openai::DEFAULT_BASE_URL,
            Self::DeepSeek => deepseek::DEFAULT_BASE_URL,
            Self::AliCloud => alicloud::DEFAULT_BASE_URL,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "deepseek" => Ok(Self::DeepSeek),
            "alicloud" | "dashscope" => Ok(Self::AliCloud),
            other => Err(LlmError::UnsupportedProvider(other.to_string())),
        }
    }
}

fn default_timeout_secs() -> u64 {
    120
}

pub(crate) fn default_thinking_timeout_secs() -> u64 {
    300
}

pub(crate) fn default_output_timeout_secs() -> u64 {
    60
}

pub(crate) fn default_read_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub api_key: String,
    /// Overrides the vendor's default endpoint root.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub extra_headers: BTreeMap<String, String>,
    /// OpenAI only.
    #[serde(default)]
    pub organization: Option<String>,
    /// AliCloud thinking mode: total budget before the first answer token.
    #[serde(default = "default_thinking_timeout_secs")]
    pub thinking_timeout_secs: u64,
    /// AliCloud thinking mode: longest silence once the answer has started.
    #[serde(default = "default_output_timeout_secs")]
    pub output_timeout_secs: u64,
    /// AliCloud thinking mode: longest wait for any single line.
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
}

impl ProviderConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            timeout_secs: default_timeout_secs(),
            extra_headers: BTreeMap::new(),
            organization: None,
            thinking_timeout_secs: default_thinking_timeout_secs(),
            output_timeout_secs: default_output_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    fn base_url(&self) -> &str;

    async fn create_chat_completion(
        &self,
        req: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse>;

    /// Sends the request with `stream = true` and hands back the raw body.
    async fn create_chat_completion_stream(&self, req: &ChatCompletionRequest)
    -> Result<ByteStream>;
}

/// Maps provider kinds to constructors.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    factories: HashMap<ProviderKind, ProviderFactory>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the OpenAI, DeepSeek and AliCloud adapters.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(ProviderKind::OpenAi, |cfg| {
            Ok(Arc::new(OpenAiProvider::new(cfg)?) as Arc<dyn Provider>)
        });
        registry.register(ProviderKind::DeepSeek, |cfg| {
            Ok(Arc::new(DeepSeekProvider::new(cfg)?) as Arc<dyn Provider>)
        });
        registry.register(ProviderKind::AliCloud, |cfg| {
            Ok(Arc::new(AliCloudProvider::new(cfg)?) as Arc<dyn Provider>)
        });
        registry
    }

    /// Replaces any factory already registered for `kind`.
    pub fn register<F>(&mut self, kind: ProviderKind, factory: F)
    where
        F: Fn(ProviderConfig) -> Result<Arc<dyn Provider>> + Send + Sync + 'static,
    {
        self.factories.insert(kind, Arc::new(factory));
    }

    #[tracing::instrument(level = "debug", skip(self, config), fields(provider = %kind))]
    pub fn create(&self, kind: ProviderKind, config: ProviderConfig) -> Result<Arc<dyn Provider>> {
        let factory = self
            .factories
            .get(&kind)
            .ok_or_else(|| LlmError::UnsupportedProvider(kind.to_string()))?;
        factory(config)
    }

    pub fn supported(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<_> = self.factories.keys().copied().collect();
        kinds.sort();
        kinds
    }
}
