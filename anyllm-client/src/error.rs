use thiserror::Error;

pub type Result<T> = std::result::Result<T, LlmError>;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("api error: status={status} {message}")]
    Api { status: u16, message: String },

    #[error("unexpected response format: {0}")]
    ResponseFormat(String),

    #[error("stream parse error: {0}")]
    StreamParse(String),

    /// The vendor sent its keep-alive comment as the whole line.
    #[error("service unavailable")]
    ServiceUnavailable,

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("config error: {0}")]
    Config(String),
}

impl LlmError {
    /// Transient failures worth retrying the whole request for.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ServiceUnavailable | Self::Timeout(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(e: serde_json::Error) -> Self {
        Self::ResponseFormat(e.to_string())
    }
}
