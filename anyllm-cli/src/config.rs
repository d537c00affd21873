//! `anyllm.toml` loader.

use anyllm_client::{ClientConfig, ProviderKind};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "anyllm.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub client: ClientConfig,
    /// Empty means the provider's default model.
    #[serde(default)]
    pub model: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    #[serde(default)]
    pub temperature: Option<f32>,
}

fn default_system_prompt() -> String {
    "You are a helpful assistant. Use the provided tools when they help answer the question."
        .to_string()
}

fn default_max_turns() -> usize {
    5
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            model: String::new(),
            system_prompt: default_system_prompt(),
            max_turns: default_max_turns(),
            temperature: None,
        }
    }
}

pub fn default_model(provider: ProviderKind) -> &'static str {
    match provider {
        ProviderKind::OpenAi => "gpt-4o-mini",
        ProviderKind::DeepSeek => "deepseek-chat",
        ProviderKind::AliCloud => "qwen-plus",
    }
}

impl AppConfig {
    /// Reads `path` (or `./anyllm.toml`). A missing file yields defaults; env
    /// overrides apply either way.
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let path = path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        let mut cfg = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Self::parse(&contents, &path)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "config file not found; using defaults");
                Self::default()
            }
            Err(e) => return Err(anyhow::anyhow!("read config {}: {e}", path.display())),
        };

        cfg.apply_env_overrides(|key| std::env::var(key).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    fn parse(contents: &str, path: &Path) -> anyhow::Result<Self> {
        toml::from_str(contents).map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))
    }

    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| var(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = get("ANYLLM_PROVIDER") {
            match v.parse() {
                Ok(kind) => self.client.provider = kind,
                Err(e) => tracing::warn!(error = %e, "ignoring ANYLLM_PROVIDER"),
            }
        }
        if let Some(v) = get("ANYLLM_API_KEY") {
            self.client.api_key = v;
        }
        if let Some(v) = get("ANYLLM_BASE_URL") {
            self.client.base_url = Some(v);
        }
        if let Some(v) = get("ANYLLM_MODEL") {
            self.model = v;
        }
        if self.model.trim().is_empty() {
            self.model = default_model(self.client.provider).to_string();
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.max_turns == 0 {
            return Err(anyhow::anyhow!("max_turns must be > 0"));
        }
        if self.client.timeout_secs == 0 {
            return Err(anyhow::anyhow!("client.timeout_secs must be > 0"));
        }
        let phases = [
            ("thinking_timeout_secs", self.client.thinking_timeout_secs),
            ("output_timeout_secs", self.client.output_timeout_secs),
            ("read_timeout_secs", self.client.read_timeout_secs),
        ];
        if let Some((name, _)) = phases.iter().find(|(_, secs)| *secs == 0) {
            return Err(anyhow::anyhow!("client.{name} must be > 0"));
        }
        Ok(())
    }

    /// Copy safe to print.
    pub fn redacted(&self) -> Self {
        let mut cfg = self.clone();
        cfg.client.api_key = redact(&cfg.client.api_key);
        cfg
    }
}

fn redact(key: &str) -> String {
    if key.is_empty() {
        return String::new();
    }
    let tail: String = key.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
    if key.chars().count() <= 8 {
        "****".to_string()
    } else {
        format!("****{tail}")
    }
}
