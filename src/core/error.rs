use thiserror::Error;

/// Failure of one fetch attempt. Contained by the strategy chain; callers of `search`
/// only ever see these rendered into a per-source note.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Transient transport failure. Retryable.
    #[error("network error: {0}")]
    Network(String),
    /// The source refused us. Needs a different strategy, not a retry.
    #[error("blocked: {reason}")]
    Blocked { reason: String },
    /// A challenge page that could not be resolved.
    #[error("captcha challenge: {0}")]
    Captcha(String),
    /// Content arrived but no listing could be normalized from it.
    #[error("parse error: {0}")]
    Parse(String),
    /// Attempt deadline exceeded.
    #[error("timed out: {0}")]
    Timeout(String),
    /// The strategy cannot run in this environment (e.g. no browser installed).
    #[error("strategy unavailable: {0}")]
    Unsupported(String),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Network(_))
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout(e.to_string())
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("query text must not be empty")]
    Empty,
    #[error("unknown characteristic '{0}' (expected brand, color, size, material, category, type or model)")]
    UnknownCharacteristic(String),
}
