//! Error types for the Stowage core.

/// Core error type for request drafting and endpoint resolution.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A header name or value could not be represented on the wire.
    #[error("invalid header {name}: {reason}")]
    InvalidHeader {
        /// Header name as supplied by the caller.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// No hostname is known for the region and service prefix.
    #[error("no endpoint for service {prefix} in region {region}")]
    UnknownEndpoint {
        /// Region name.
        region: String,
        /// Service endpoint prefix, e.g. `s3`.
        prefix: String,
    },

    /// The endpoint table could not be decoded.
    #[error("invalid endpoint table: {0}")]
    EndpointTable(#[from] serde_json::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Convenience result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
