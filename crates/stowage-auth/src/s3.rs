//! Legacy storage header signer (`Authorization: AWS AKID:Signature`).
//!
//! `Signature = Base64(HMAC-SHA1(SecretKey, StringToSign))` where:
//!
//! ```text
//! StringToSign = HTTP-Verb + "\n" +
//!                Content-MD5 + "\n" +
//!                Content-Type + "\n" +
//!                Date + "\n" +
//!                CanonicalizedAmzHeaders +
//!                CanonicalizedResource
//! ```

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, KeyInit, Mac};
use sha1::Sha1;
use stowage_core::{AuthArtifact, Credentials, Request};
use tracing::debug;

use crate::SigningContext;
use crate::canonical::collapse_whitespace;
use crate::error::SigningError;

type HmacSha1 = Hmac<Sha1>;

/// Query parameters that identify a sub-resource and are therefore signed.
pub const SUB_RESOURCES: &[&str] = &[
    "acl",
    "cors",
    "delete",
    "lifecycle",
    "location",
    "logging",
    "notification",
    "partNumber",
    "policy",
    "requestPayment",
    "response-cache-control",
    "response-content-disposition",
    "response-content-encoding",
    "response-content-language",
    "response-content-type",
    "response-expires",
    "restore",
    "tagging",
    "torrent",
    "uploadId",
    "uploads",
    "versionId",
    "versioning",
    "versions",
    "website",
];

/// Build the legacy string to sign for a request.
#[must_use]
pub fn build_string_to_sign(request: &Request) -> String {
    let method = request.method.as_str();
    let content_md5 = request.header("content-md5").unwrap_or_default();
    let content_type = request.header("content-type").unwrap_or_default();
    // An x-amz-date header replaces the Date line, which is then left empty.
    let date = if request.headers.contains_key("x-amz-date") {
        ""
    } else {
        request.header("date").unwrap_or_default()
    };

    let amz_headers = build_canonicalized_amz_headers(request);
    let resource = build_canonicalized_resource(request);

    format!("{method}\n{content_md5}\n{content_type}\n{date}\n{amz_headers}{resource}")
}

/// `name:value\n` for every `x-amz-*` header, sorted by name.
fn build_canonicalized_amz_headers(request: &Request) -> String {
    let mut amz_headers: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for (name, value) in &request.headers {
        let name = name.as_str();
        if name.starts_with("x-amz-") {
            let value = collapse_whitespace(value.to_str().unwrap_or_default().trim());
            amz_headers.entry(name).or_default().push(value);
        }
    }

    let mut result = String::new();
    for (name, values) in &amz_headers {
        result.push_str(name);
        result.push(':');
        result.push_str(&values.join(","));
        result.push('\n');
    }
    result
}

/// Bucket-qualified path plus sorted sub-resource parameters.
fn build_canonicalized_resource(request: &Request) -> String {
    let path = match (&request.bucket, request.virtual_hosted) {
        (Some(bucket), true) => format!("/{bucket}{}", request.path),
        _ => request.path.clone(),
    };

    let mut sub_params: Vec<(&str, &str)> = request
        .query
        .iter()
        .filter(|(k, _)| SUB_RESOURCES.contains(&k.as_str()))
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    sub_params.sort_by(|a, b| a.0.cmp(b.0));

    if sub_params.is_empty() {
        return path;
    }
    let params: Vec<String> = sub_params
        .iter()
        .map(|(k, v)| {
            if v.is_empty() {
                (*k).to_owned()
            } else {
                format!("{k}={v}")
            }
        })
        .collect();
    format!("{path}?{}", params.join("&"))
}

/// Base64 HMAC-SHA1 of `data`.
#[must_use]
pub fn hmac_sha1_base64(secret_key: &str, data: &str) -> String {
    let mut mac =
        HmacSha1::new_from_slice(secret_key.as_bytes()).expect("HMAC can accept any key length");
    mac.update(data.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

pub(crate) fn sign(
    request: &mut Request,
    credentials: &Credentials,
    context: &SigningContext,
) -> Result<AuthArtifact, SigningError> {
    let mut added = Vec::new();
    if !request.headers.contains_key("x-amz-date") {
        added.push(("date".to_owned(), crate::http_date(&context.timestamp)));
    }
    if let Some(token) = &credentials.session_token {
        added.push(("x-amz-security-token".to_owned(), token.clone()));
    }
    for (name, value) in &added {
        request.insert_header(name, value)?;
    }

    let string_to_sign = build_string_to_sign(request);
    debug!(string_to_sign = ?string_to_sign, "built legacy string to sign");

    let authorization = format!(
        "AWS {}:{}",
        credentials.access_key_id,
        hmac_sha1_base64(&credentials.secret_access_key, &string_to_sign)
    );
    request.insert_header("authorization", &authorization)?;
    added.push(("authorization".to_owned(), authorization));

    Ok(AuthArtifact::Headers(added))
}
