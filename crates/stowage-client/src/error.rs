//! Client error types.

use std::fmt;

use http::StatusCode;
use stowage_auth::SigningError;
use stowage_http::TransportError;
use stowage_xml::XmlError;

/// Error reported by the service in a response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceError {
    /// HTTP status.
    pub status: StatusCode,
    /// Service error code, such as `NoSuchBucket`.
    pub code: String,
    /// Human readable message.
    pub message: String,
    /// Request id assigned by the service.
    pub request_id: Option<String>,
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code, self.status.as_u16())?;
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if let Some(id) = &self.request_id {
            write!(f, " [request id {id}]")?;
        }
        Ok(())
    }
}

/// A successful response body that could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// The XML body did not match its grammar.
    #[error(transparent)]
    Xml(#[from] XmlError),

    /// The JSON body was malformed.
    #[error("invalid JSON response: {0}")]
    Json(#[from] serde_json::Error),

    /// The decoded document lacks something a typed output needs.
    #[error("unexpected response shape: {0}")]
    Shape(String),
}

/// Errors returned by [`crate::Client`].
///
/// Every error produced while running a call records how many attempts were
/// made before it was returned.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The request could not be signed.
    #[error("signing failed after {attempts} attempt(s): {source}")]
    Signing {
        /// Underlying signing error.
        #[source]
        source: SigningError,
        /// Attempts made.
        attempts: u32,
    },

    /// The exchange failed at the transport level.
    #[error("transport failed after {attempts} attempt(s): {source}")]
    Transport {
        /// Underlying transport error.
        #[source]
        source: TransportError,
        /// Attempts made.
        attempts: u32,
    },

    /// The service kept rate limiting the call.
    #[error("throttled after {attempts} attempt(s): {error}")]
    Throttling {
        /// Last error returned.
        error: ServiceError,
        /// Attempts made.
        attempts: u32,
    },

    /// The service kept failing with a server error.
    #[error("server fault after {attempts} attempt(s): {error}")]
    ServerFault {
        /// Last error returned.
        error: ServiceError,
        /// Attempts made.
        attempts: u32,
    },

    /// The service rejected the request.
    #[error("client fault: {error}")]
    ClientFault {
        /// Error returned.
        error: ServiceError,
        /// Attempts made.
        attempts: u32,
    },

    /// The service rejected the signature or credentials.
    #[error("authentication rejected: {error}")]
    Fatal {
        /// Error returned.
        error: ServiceError,
        /// Attempts made.
        attempts: u32,
    },

    /// A successful response body could not be parsed.
    #[error("failed to parse response after {attempts} attempt(s): {source}")]
    Parse {
        /// Underlying parse error.
        #[source]
        source: ParseError,
        /// Attempts made.
        attempts: u32,
    },

    /// A retry was needed but the request body could not be replayed.
    #[error("request body cannot be replayed for a retry after {attempts} attempt(s): {source}")]
    NonRetryableBody {
        /// Attempts made.
        attempts: u32,
        /// The failure that would have been retried.
        #[source]
        source: Box<ClientError>,
    },

    /// A multipart upload failed.
    #[error(transparent)]
    Multipart(#[from] MultipartError),

    /// The request could not be built from the operation and its parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Attempts made before this error was returned; zero when no request was sent.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Signing { attempts, .. }
            | Self::Transport { attempts, .. }
            | Self::Throttling { attempts, .. }
            | Self::ServerFault { attempts, .. }
            | Self::ClientFault { attempts, .. }
            | Self::Fatal { attempts, .. }
            | Self::Parse { attempts, .. }
            | Self::NonRetryableBody { attempts, .. } => *attempts,
            Self::Multipart(MultipartError::Part { source, .. }) => source.attempts(),
            Self::Multipart(_) | Self::InvalidRequest(_) | Self::Config(_) => 0,
        }
    }

    /// The service error, when the service returned one.
    #[must_use]
    pub fn service_error(&self) -> Option<&ServiceError> {
        match self {
            Self::Throttling { error, .. }
            | Self::ServerFault { error, .. }
            | Self::ClientFault { error, .. }
            | Self::Fatal { error, .. } => Some(error),
            Self::NonRetryableBody { source, .. } => source.service_error(),
            _ => None,
        }
    }

    /// The service error code, when the service returned one.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.service_error().map(|e| e.code.as_str())
    }
}

impl From<stowage_core::CoreError> for ClientError {
    fn from(err: stowage_core::CoreError) -> Self {
        match err {
            stowage_core::CoreError::UnknownEndpoint { .. }
            | stowage_core::CoreError::EndpointTable(_)
            | stowage_core::CoreError::Config(_) => Self::Config(err.to_string()),
            stowage_core::CoreError::InvalidHeader { .. } => Self::InvalidRequest(err.to_string()),
        }
    }
}

/// Errors specific to a multipart upload session.
#[derive(Debug, thiserror::Error)]
pub enum MultipartError {
    /// Completion was requested while part numbers are missing.
    #[error("cannot complete upload {upload_id}: missing part(s) {missing:?}")]
    PartSequence {
        /// Upload id.
        upload_id: String,
        /// Part numbers in `1..=N` that have no completed upload.
        missing: Vec<u32>,
    },

    /// Parts failed and were not uploaded again.
    #[error("cannot complete upload {upload_id}: part(s) {failed:?} failed")]
    FailedParts {
        /// Upload id.
        upload_id: String,
        /// Part numbers whose last upload failed.
        failed: Vec<u32>,
    },

    /// The session was already completed or aborted.
    #[error("upload {upload_id} is {state} and accepts no further requests")]
    Closed {
        /// Upload id.
        upload_id: String,
        /// Terminal state.
        state: &'static str,
    },

    /// Completion was requested with no parts.
    #[error("cannot complete upload {0} without any parts")]
    NoParts(String),

    /// A part number outside `1..=10000`.
    #[error("invalid part number {0}")]
    InvalidPartNumber(u32),

    /// A part upload failed after exhausting its retries.
    #[error("part {part_number} of upload {upload_id} failed: {source}")]
    Part {
        /// Upload id.
        upload_id: String,
        /// Part that failed.
        part_number: u32,
        /// Error from the part upload call.
        #[source]
        source: Box<ClientError>,
    },

    /// The part upload response lacked an `ETag`.
    #[error("part {0} response carried no ETag")]
    MissingETag(u32),

    /// Reading the upload source failed.
    #[error("failed to read upload source: {0}")]
    Source(#[from] std::io::Error),
}
