use thiserror::Error;

#[derive(Debug, Error)]
pub enum AtelierError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("{message}")]
    Provider { message: String, retryable: bool },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("failed to parse json: {0}")]
    Json(#[from] serde_json::Error),
}

impl AtelierError {
    pub fn provider(message: impl Into<String>, retryable: bool) -> Self {
        Self::Provider {
            message: message.into(),
            retryable,
        }
    }

    /// Whether the retry envelope may re-attempt the call that produced this
    /// error: provider failures flagged retryable (5xx/429 classification
    /// happens where the response is read) and network-level connect/timeout
    /// failures. Everything else terminates the request.
    pub fn retryable(&self) -> bool {
        match self {
            Self::Provider { retryable, .. } => *retryable,
            Self::Http(err) => err.is_timeout() || err.is_connect(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, AtelierError>;
