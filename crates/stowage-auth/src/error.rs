//! Error types for request signing.

/// Errors raised while signing a request or a POST policy.
///
/// All of these are fatal for the call: retrying with the same inputs
/// would fail the same way.
#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    /// The access key or secret key is empty.
    #[error("missing credentials: access key id and secret access key are required")]
    MissingCredentials,

    /// The request has no host to sign.
    #[error("request has no host")]
    MissingHost,

    /// A header value cannot take part in a canonical string.
    #[error("header {0} is not valid UTF-8")]
    InvalidHeader(String),

    /// Presigned URL lifetime outside the accepted range.
    #[error("expiry of {0} seconds is outside 1..=604800")]
    InvalidExpiry(u64),

    /// The POST policy could not be encoded.
    #[error("failed to encode post policy: {0}")]
    Policy(#[from] serde_json::Error),

    /// A header added by the signer was rejected.
    #[error(transparent)]
    Request(#[from] stowage_core::CoreError),
}
