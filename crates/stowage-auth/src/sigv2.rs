//! Signature Version 2 for query-string services.
//!
//! The signer appends `AWSAccessKeyId`, `SignatureMethod`, `SignatureVersion`,
//! `Timestamp` (and `SecurityToken` with temporary credentials) to the query,
//! then signs:
//!
//! ```text
//! HTTP-Verb + "\n" +
//! Host + "\n" +
//! Path + "\n" +
//! CanonicalQueryString
//! ```
//!
//! `Signature = Base64(HMAC-SHA256(SecretKey, StringToSign))` is appended as
//! the last query parameter.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use stowage_core::{AuthArtifact, Credentials, Request};
use tracing::debug;

use crate::SigningContext;
use crate::canonical::build_canonical_query;
use crate::error::SigningError;
use crate::sigv4::hmac_sha256;

/// Build the v2 string to sign.
#[must_use]
pub fn build_string_to_sign(method: &str, host: &str, path: &str, canonical_query: &str) -> String {
    let path = if path.is_empty() { "/" } else { path };
    format!("{method}\n{}\n{path}\n{canonical_query}", host.to_lowercase())
}

pub(crate) fn sign(
    request: &mut Request,
    credentials: &Credentials,
    context: &SigningContext,
) -> Result<AuthArtifact, SigningError> {
    let mut added = vec![
        (
            "AWSAccessKeyId".to_owned(),
            credentials.access_key_id.clone(),
        ),
        ("SignatureMethod".to_owned(), "HmacSHA256".to_owned()),
        ("SignatureVersion".to_owned(), "2".to_owned()),
        (
            "Timestamp".to_owned(),
            context.timestamp.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        ),
    ];
    if let Some(token) = &credentials.session_token {
        added.push(("SecurityToken".to_owned(), token.clone()));
    }
    request.query.extend(added.iter().cloned());

    let string_to_sign = build_string_to_sign(
        request.method.as_str(),
        &request.host_header(),
        &request.path,
        &build_canonical_query(&request.query),
    );
    debug!(string_to_sign = ?string_to_sign, "built v2 string to sign");

    let signature = BASE64.encode(hmac_sha256(
        credentials.secret_access_key.as_bytes(),
        string_to_sign.as_bytes(),
    ));
    request.push_query("Signature", signature.clone());
    added.push(("Signature".to_owned(), signature));

    Ok(AuthArtifact::Query(added))
}
