//! Error types for the context relay

use thiserror::Error;

/// Result type alias for context relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Main error type for the context relay
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Circuit breaker error: {0}")]
    Breaker(#[from] crate::breaker::BreakerError),

    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised by the tiered cache
#[derive(Error, Debug)]
pub enum CacheError {
    /// A distributed-tier round trip failed. Degrades to tier-1 or loader.
    #[error("Distributed tier error: {0}")]
    Tier(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by source resolvers and their upstream clients
#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Upstream returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Missing credentials or endpoint. Not a failure: triggers the
    /// deterministic fallback path instead.
    #[error("Not configured: {0}")]
    NotConfigured(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by the streaming relay
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Upstream transport failed: {0}")]
    Transport(String),

    #[error("Completion upstream unavailable: {0}")]
    Unavailable(String),

    /// The consumer dropped its end of the channel mid-stream.
    #[error("Stream consumer went away")]
    Cancelled,
}

impl RelayError {
    /// Classify an error as transient for retry purposes.
    ///
    /// Transient: timeouts, connection resets, 5xx responses, and network
    /// failures. A breaker-open rejection is deliberately not transient;
    /// retrying it locally would defeat the cool-down.
    pub fn is_transient(&self) -> bool {
        match self {
            RelayError::Retrieval(RetrievalError::Network(e)) => {
                e.is_timeout() || e.is_connect() || e.is_request()
            }
            RelayError::Retrieval(RetrievalError::Api { status, .. }) => *status >= 500,
            RelayError::Retrieval(RetrievalError::Timeout(_)) => true,
            RelayError::Retrieval(RetrievalError::Upstream(msg)) => {
                let msg = msg.to_lowercase();
                msg.contains("timeout")
                    || msg.contains("connection reset")
                    || msg.contains("connection refused")
                    || msg.contains("temporarily unavailable")
            }
            RelayError::Breaker(crate::breaker::BreakerError::Timeout { .. }) => true,
            _ => false,
        }
    }
}

impl From<config::ConfigError> for RelayError {
    fn from(err: config::ConfigError) -> Self {
        RelayError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_5xx_is_transient() {
        let err = RelayError::Retrieval(RetrievalError::Api {
            status: 503,
            message: "service unavailable".to_string(),
        });
        assert!(err.is_transient());
    }

    #[test]
    fn test_api_4xx_is_not_transient() {
        let err = RelayError::Retrieval(RetrievalError::Api {
            status: 401,
            message: "unauthorized".to_string(),
        });
        assert!(!err.is_transient());
    }

    #[test]
    fn test_message_pattern_classification() {
        let err = RelayError::Retrieval(RetrievalError::Upstream(
            "Connection reset by peer".to_string(),
        ));
        assert!(err.is_transient());

        let err = RelayError::Retrieval(RetrievalError::InvalidInput("empty query".to_string()));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_breaker_open_is_not_transient() {
        let err = RelayError::Breaker(crate::breaker::BreakerError::Open {
            name: "live_search".to_string(),
            retry_after_ms: 1000,
        });
        assert!(!err.is_transient());
    }
}
