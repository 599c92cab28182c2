//! Transport error types.

use std::time::Duration;

/// Failure of a single HTTP exchange.
///
/// The transport never retries; [`TransportError::is_retryable`] tells the
/// pipeline whether another attempt can help.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// TCP connect failed.
    #[error("failed to connect to {host}: {source}")]
    Connect {
        /// Target host.
        host: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The connection could not be established within the open timeout.
    #[error("timed out after {timeout:?} connecting to {host}")]
    ConnectTimeout {
        /// Target host.
        host: String,
        /// The open timeout that elapsed.
        timeout: Duration,
    },

    /// No connection slot became free within the open timeout.
    #[error("connection pool for {host} exhausted after waiting {waited:?}")]
    PoolExhausted {
        /// Target host.
        host: String,
        /// How long the checkout waited.
        waited: Duration,
    },

    /// The peer stalled longer than the read timeout.
    #[error("read timed out after {0:?}")]
    ReadTimeout(Duration),

    /// TLS setup or handshake failed.
    #[error("TLS error: {0}")]
    Tls(String),

    /// HTTP protocol error on an established connection.
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// The configured proxy refused or could not be used.
    #[error("proxy error: {0}")]
    Proxy(String),

    /// The request could not be turned into an HTTP message.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The request body was a stream that an earlier attempt already consumed.
    #[error("request body stream was already consumed")]
    BodyConsumed,

    /// Other I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether the same request may succeed on another attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. }
                | Self::ConnectTimeout { .. }
                | Self::PoolExhausted { .. }
                | Self::ReadTimeout(_)
                | Self::Http(_)
                | Self::Io(_)
        )
    }
}
