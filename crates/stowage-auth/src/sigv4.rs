//! Signature Version 4 signing.
//!
//! 1. Hash the payload (or mark it `UNSIGNED-PAYLOAD` for single-pass streams).
//! 2. Add `host`, `x-amz-date`, `x-amz-content-sha256` and, with temporary
//!    credentials, `x-amz-security-token`.
//! 3. Build the canonical request over `host`, `content-type`, `content-md5`
//!    and every `x-amz-*` header.
//! 4. Derive the scoped signing key and sign the string to sign.
//! 5. Emit the `Authorization` header.

use chrono::{DateTime, Utc};
use hmac::{Hmac, KeyInit, Mac};
use sha2::{Digest, Sha256};
use stowage_core::{AuthArtifact, ByteSource, Credentials, Request};
use tracing::debug;

use crate::SigningContext;
use crate::canonical::{
    build_canonical_query, build_canonical_request, build_signed_headers_string, collect_headers,
};
use crate::error::SigningError;

/// Signing algorithm name.
pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// SHA-256 of zero bytes.
pub const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Payload hash marker for bodies that are not hashed.
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

const CONTENT_SHA256: &str = "x-amz-content-sha256";
const SECURITY_TOKEN: &str = "x-amz-security-token";

type HmacSha256 = Hmac<Sha256>;

/// `YYYYMMDDTHHMMSSZ` timestamp used in `x-amz-date`.
#[must_use]
pub fn format_amz_date(timestamp: &DateTime<Utc>) -> String {
    timestamp.format("%Y%m%dT%H%M%SZ").to_string()
}

/// `date/region/service/aws4_request`.
#[must_use]
pub fn credential_scope(timestamp: &DateTime<Utc>, region: &str, service: &str) -> String {
    format!("{}/{region}/{service}/aws4_request", timestamp.format("%Y%m%d"))
}

/// Build the v4 string to sign.
///
/// ```
/// use stowage_auth::sigv4::build_string_to_sign;
///
/// let sts = build_string_to_sign(
///     "20130524T000000Z",
///     "20130524/us-east-1/s3/aws4_request",
///     "7344ae5b7ee6c3e7e6b0fe0640412a37625d1fbfff95c48bbb2dc43964946972",
/// );
/// assert!(sts.starts_with("AWS4-HMAC-SHA256\n20130524T000000Z\n"));
/// ```
#[must_use]
pub fn build_string_to_sign(
    timestamp: &str,
    credential_scope: &str,
    canonical_request_hash: &str,
) -> String {
    format!("{ALGORITHM}\n{timestamp}\n{credential_scope}\n{canonical_request_hash}")
}

/// Derive the scoped signing key.
///
/// ```text
/// DateKey              = HMAC-SHA256("AWS4" + secret_key, date)
/// DateRegionKey        = HMAC-SHA256(DateKey, region)
/// DateRegionServiceKey = HMAC-SHA256(DateRegionKey, service)
/// SigningKey           = HMAC-SHA256(DateRegionServiceKey, "aws4_request")
/// ```
#[must_use]
pub fn derive_signing_key(secret_key: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let date_key = hmac_sha256(format!("AWS4{secret_key}").as_bytes(), date.as_bytes());
    let date_region_key = hmac_sha256(&date_key, region.as_bytes());
    let date_region_service_key = hmac_sha256(&date_region_key, service.as_bytes());
    hmac_sha256(&date_region_service_key, b"aws4_request")
}

/// Hex-encoded HMAC-SHA256 of `data` under `signing_key`.
#[must_use]
pub fn compute_signature(signing_key: &[u8], data: &str) -> String {
    hex::encode(hmac_sha256(signing_key, data.as_bytes()))
}

/// Hex-encoded SHA-256 of a payload.
///
/// ```
/// use stowage_auth::sigv4::{EMPTY_SHA256, hash_payload};
///
/// assert_eq!(hash_payload(b""), EMPTY_SHA256);
/// ```
#[must_use]
pub fn hash_payload(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

/// Payload hash for a body source.
#[must_use]
pub fn payload_hash(body: &ByteSource) -> String {
    match body.as_bytes() {
        Some([]) => EMPTY_SHA256.to_owned(),
        Some(bytes) => hash_payload(bytes),
        None => UNSIGNED_PAYLOAD.to_owned(),
    }
}

/// Whether a header takes part in the v4 signature.
#[must_use]
pub fn is_signed_header(name: &str) -> bool {
    matches!(name, "host" | "content-type" | "content-md5") || name.starts_with("x-amz-")
}

/// Sign `request` in place with an `Authorization` header.
pub(crate) fn sign(
    request: &mut Request,
    credentials: &Credentials,
    context: &SigningContext,
) -> Result<AuthArtifact, SigningError> {
    let amz_date = format_amz_date(&context.timestamp);
    let scope = credential_scope(&context.timestamp, &context.region, &context.service);

    let payload = match request.header(CONTENT_SHA256) {
        Some(existing) => existing.to_owned(),
        None => payload_hash(&request.body),
    };

    let mut added = vec![
        ("host".to_owned(), request.host_header()),
        ("x-amz-date".to_owned(), amz_date.clone()),
        (CONTENT_SHA256.to_owned(), payload.clone()),
    ];
    if let Some(token) = &credentials.session_token {
        added.push((SECURITY_TOKEN.to_owned(), token.clone()));
    }
    for (name, value) in &added {
        request.insert_header(name, value)?;
    }

    let headers = collect_headers(request, is_signed_header)?;
    let header_refs: Vec<(&str, &str)> = headers
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    let signed: Vec<&str> = header_refs.iter().map(|(k, _)| *k).collect();

    let canonical_request = build_canonical_request(
        request.method.as_str(),
        &request.path,
        &build_canonical_query(&request.query),
        &header_refs,
        &signed,
        &payload,
    );
    debug!(canonical_request = %canonical_request, "built v4 canonical request");

    let canonical_hash = hash_payload(canonical_request.as_bytes());
    let string_to_sign = build_string_to_sign(&amz_date, &scope, &canonical_hash);
    let signing_key = derive_signing_key(
        &credentials.secret_access_key,
        &context.timestamp.format("%Y%m%d").to_string(),
        &context.region,
        &context.service,
    );
    let signature = compute_signature(&signing_key, &string_to_sign);

    let authorization = format!(
        "{ALGORITHM} Credential={}/{scope}, SignedHeaders={}, Signature={signature}",
        credentials.access_key_id,
        build_signed_headers_string(&signed),
    );
    request.insert_header("authorization", &authorization)?;
    added.push(("authorization".to_owned(), authorization));

    Ok(AuthArtifact::Headers(added))
}

pub(crate) fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can accept keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}
