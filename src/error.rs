use std::time::Duration;

/// Transport-level failure below the HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("HTTP {0}")]
    Http(u16),

    #[error("{0}")]
    Other(String),
}

/// Everything the exchange client and normalizer can fail with.
///
/// Cloneable so the refresh cache can keep the last failure next to the
/// last good value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExchangeError {
    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("unknown symbol: {0}")]
    NotFound(String),

    #[error("invalid interval: {0}")]
    InvalidInterval(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ExchangeError {
    pub fn kind(&self) -> &'static str {
        match self {
            ExchangeError::Network(NetworkError::Timeout) => "timeout",
            ExchangeError::Network(_) => "network",
            ExchangeError::RateLimited { .. } => "rate_limited",
            ExchangeError::NotFound(_) => "not_found",
            ExchangeError::InvalidInterval(_) => "invalid_interval",
            ExchangeError::Malformed(_) => "malformed",
        }
    }

    /// Permanent failures are not retried until the key is evicted or invalidated.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ExchangeError::NotFound(_) | ExchangeError::InvalidInterval(_)
        )
    }

    pub(crate) fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            NetworkError::Timeout.into()
        } else if err.is_connect() {
            NetworkError::Connect(err.to_string()).into()
        } else if let Some(status) = err.status() {
            NetworkError::Http(status.as_u16()).into()
        } else {
            NetworkError::Other(err.to_string()).into()
        }
    }
}
