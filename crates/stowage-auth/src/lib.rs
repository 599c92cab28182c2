//! Request signing for Stowage.
//!
//! Every supported protocol is a variant of [`SigningProtocol`] and is
//! applied through [`sign`], which takes the draft request, a credential
//! snapshot and a [`SigningContext`] carrying the timestamp. The signer never
//! reads the wall clock, so a fixed context always produces the same output.
//!
//! # Modules
//!
//! - [`canonical`] - canonical request construction for v4
//! - [`sigv4`] - the v4 HMAC-chain signer
//! - [`sigv2`] - query-string v2 signer
//! - [`sigv3`] - v3 and v3-over-HTTPS header signers
//! - [`s3`] - legacy storage header signer
//! - [`presigned`] - presigned URLs and POST policies

pub mod canonical;
mod cloudfront;
pub mod error;
pub mod presigned;
pub mod s3;
pub mod sigv2;
pub mod sigv3;
pub mod sigv4;

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use stowage_core::{Credentials, Request, SignedRequest};
use tracing::debug;

pub use error::SigningError;
pub use presigned::{PolicyCondition, PostPolicy, PresignedPostFields, presign_url, sign_post_policy};

/// The signing protocols a request can be signed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SigningProtocol {
    /// Query-string v2 (`Signature` query parameter).
    V2,
    /// v3 over a full canonical string (`X-Amzn-Authorization`).
    V3,
    /// v3 signing only the `date` header, for TLS connections.
    #[serde(rename = "v3https")]
    V3Https,
    /// v4 canonical request with a scoped HMAC-SHA256 key.
    #[default]
    V4,
    /// Legacy storage header signer (`Authorization: AWS AKID:sig`).
    S3,
    /// HMAC-SHA1 of the `date` header.
    #[serde(rename = "cloudfront")]
    CloudFront,
}

impl SigningProtocol {
    /// Wire name of the protocol.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::V2 => "v2",
            Self::V3 => "v3",
            Self::V3Https => "v3https",
            Self::V4 => "v4",
            Self::S3 => "s3",
            Self::CloudFront => "cloudfront",
        }
    }

    /// Sign `request` in place and return the artifact that was applied.
    pub fn sign(
        self,
        mut request: Request,
        credentials: &Credentials,
        context: &SigningContext,
    ) -> Result<SignedRequest, SigningError> {
        ensure_signable(&request, credentials)?;
        let artifact = match self {
            Self::V2 => sigv2::sign(&mut request, credentials, context)?,
            Self::V3 => sigv3::sign(&mut request, credentials, context)?,
            Self::V3Https => sigv3::sign_https(&mut request, credentials, context)?,
            Self::V4 => sigv4::sign(&mut request, credentials, context)?,
            Self::S3 => s3::sign(&mut request, credentials, context)?,
            Self::CloudFront => cloudfront::sign(&mut request, credentials, context)?,
        };
        debug!(
            protocol = %self,
            method = %request.method,
            host = %request.host,
            path = %request.path,
            "signed request"
        );
        Ok(SignedRequest { request, artifact })
    }
}

impl fmt::Display for SigningProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SigningProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "v2" | "2" => Ok(Self::V2),
            "v3" | "3" => Ok(Self::V3),
            "v3https" => Ok(Self::V3Https),
            "v4" | "4" => Ok(Self::V4),
            "s3" => Ok(Self::S3),
            "cloudfront" => Ok(Self::CloudFront),
            other => Err(format!("unknown signature version: {other}")),
        }
    }
}

/// Everything besides the request and credentials that a signature depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningContext {
    /// Protocol to sign with.
    pub protocol: SigningProtocol,
    /// Service name used in the credential scope, e.g. `s3`.
    pub service: String,
    /// Region used in the credential scope.
    pub region: String,
    /// Instant the request is signed for.
    pub timestamp: DateTime<Utc>,
}

impl SigningContext {
    /// Create a signing context.
    #[must_use]
    pub fn new(
        protocol: SigningProtocol,
        service: impl Into<String>,
        region: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            protocol,
            service: service.into(),
            region: region.into(),
            timestamp,
        }
    }
}

/// Sign `request` with the protocol named in `context`.
///
/// # Examples
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use http::Method;
/// use stowage_auth::{SigningContext, SigningProtocol, sign};
/// use stowage_core::{Credentials, Request, Scheme};
///
/// let mut request = Request::new(Method::GET, Scheme::Https, "storage.example.com");
/// request.path = "/bucket/key".to_owned();
/// let context = SigningContext::new(
///     SigningProtocol::V4,
///     "s3",
///     "us-east-1",
///     Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
/// );
///
/// let signed = sign(request, &Credentials::new("AKIDEXAMPLE", "secret"), &context).unwrap();
/// assert!(signed.request.header("authorization").unwrap().starts_with("AWS4-HMAC-SHA256"));
/// ```
pub fn sign(
    request: Request,
    credentials: &Credentials,
    context: &SigningContext,
) -> Result<SignedRequest, SigningError> {
    context.protocol.sign(request, credentials, context)
}

/// Base64 MD5 digest, as sent in `content-md5`.
#[must_use]
pub fn content_md5(body: &[u8]) -> String {
    BASE64.encode(Md5::digest(body))
}

/// RFC 7231 date, e.g. `Mon, 01 Jan 2024 00:00:00 GMT`.
#[must_use]
pub fn http_date(timestamp: &DateTime<Utc>) -> String {
    timestamp.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub(crate) fn ensure_signable(
    request: &Request,
    credentials: &Credentials,
) -> Result<(), SigningError> {
    if !credentials.is_complete() {
        return Err(SigningError::MissingCredentials);
    }
    if request.host.is_empty() {
        return Err(SigningError::MissingHost);
    }
    Ok(())
}
