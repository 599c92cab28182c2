//! Signature Version 3, in its plain and HTTPS-only flavours.
//!
//! Plain v3 signs the SHA-256 digest of:
//!
//! ```text
//! HTTP-Verb + "\n" +
//! Path + "\n" +
//! QueryString + "\n" +
//! CanonicalHeaders + "\n" +
//! "\n" +
//! Body
//! ```
//!
//! where the canonical headers are `host` and every `x-amz-*` header. The
//! HTTPS flavour only signs the `date` header value, relying on TLS for the
//! rest.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha2::{Digest, Sha256};
use stowage_core::{AuthArtifact, Credentials, Request};
use tracing::debug;

use crate::SigningContext;
use crate::canonical::{build_canonical_headers, build_canonical_query, collect_headers};
use crate::error::SigningError;
use crate::sigv4::hmac_sha256;

/// Header carrying v3 authentication.
pub const AUTH_HEADER: &str = "x-amzn-authorization";

fn is_signed_header(name: &str) -> bool {
    name == "host" || name.starts_with("x-amz-")
}

/// Build the plain v3 string to sign.
#[must_use]
pub fn build_string_to_sign(
    method: &str,
    path: &str,
    canonical_query: &str,
    canonical_headers: &str,
    body: &[u8],
) -> String {
    format!(
        "{method}\n{path}\n{canonical_query}\n{canonical_headers}\n\n{}",
        String::from_utf8_lossy(body)
    )
}

pub(crate) fn sign(
    request: &mut Request,
    credentials: &Credentials,
    context: &SigningContext,
) -> Result<AuthArtifact, SigningError> {
    let date = crate::http_date(&context.timestamp);
    let mut added = vec![
        ("host".to_owned(), request.host_header()),
        ("x-amz-date".to_owned(), date),
    ];
    if let Some(token) = &credentials.session_token {
        added.push(("x-amz-security-token".to_owned(), token.clone()));
    }
    for (name, value) in &added {
        request.insert_header(name, value)?;
    }

    let headers = collect_headers(request, is_signed_header)?;
    let header_refs: Vec<(&str, &str)> = headers
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    let mut signed: Vec<&str> = header_refs.iter().map(|(k, _)| *k).collect();
    signed.sort_unstable();
    signed.dedup();

    let body = request.body.as_bytes().unwrap_or_default();
    let string_to_sign = build_string_to_sign(
        request.method.as_str(),
        if request.path.is_empty() { "/" } else { &request.path },
        &build_canonical_query(&request.query),
        &build_canonical_headers(&header_refs, &signed),
        body,
    );
    debug!(string_to_sign = ?string_to_sign, "built v3 string to sign");

    let digest = Sha256::digest(string_to_sign.as_bytes());
    let signature = BASE64.encode(hmac_sha256(
        credentials.secret_access_key.as_bytes(),
        &digest,
    ));
    let authorization = format!(
        "AWS3 AWSAccessKeyId={},Algorithm=HmacSHA256,SignedHeaders={},Signature={signature}",
        credentials.access_key_id,
        signed.join(";"),
    );
    request.insert_header(AUTH_HEADER, &authorization)?;
    added.push((AUTH_HEADER.to_owned(), authorization));

    Ok(AuthArtifact::Headers(added))
}

pub(crate) fn sign_https(
    request: &mut Request,
    credentials: &Credentials,
    context: &SigningContext,
) -> Result<AuthArtifact, SigningError> {
    let date = crate::http_date(&context.timestamp);
    let mut added = vec![("date".to_owned(), date.clone())];
    if let Some(token) = &credentials.session_token {
        added.push(("x-amz-security-token".to_owned(), token.clone()));
    }
    for (name, value) in &added {
        request.insert_header(name, value)?;
    }

    let signature = BASE64.encode(hmac_sha256(
        credentials.secret_access_key.as_bytes(),
        date.as_bytes(),
    ));
    let authorization = format!(
        "AWS3-HTTPS AWSAccessKeyId={},Algorithm=HmacSHA256,Signature={signature}",
        credentials.access_key_id,
    );
    request.insert_header(AUTH_HEADER, &authorization)?;
    added.push((AUTH_HEADER.to_owned(), authorization));

    Ok(AuthArtifact::Headers(added))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use http::Method;
    use stowage_core::{ByteSource, Scheme};

    use super::*;
    use crate::SigningProtocol;

    fn context(protocol: SigningProtocol) -> SigningContext {
        SigningContext::new(
            protocol,
            "service",
            "us-east-1",
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_should_sign_v3_request_matching_fixture() {
        let mut req = Request::new(Method::POST, Scheme::Http, "service.example.com");
        req.body = ByteSource::from("{}");

        sign(
            &mut req,
            &Credentials::new("AKIDEXAMPLE", "secret"),
            &context(SigningProtocol::V3),
        )
        .unwrap();

        assert_eq!(
            req.header(AUTH_HEADER),
            Some(
                "AWS3 AWSAccessKeyId=AKIDEXAMPLE,Algorithm=HmacSHA256,\
                 SignedHeaders=host;x-amz-date,\
                 Signature=Ct5/Ht6vIcQJYRy1x2R4prt5ze+4Fh8PDbqiIoKWNj0="
            )
        );
        assert_eq!(req.header("x-amz-date"), Some("Mon, 01 Jan 2024 00:00:00 GMT"));
    }

    #[test]
    fn test_should_sign_v3_https_date_only() {
        let mut req = Request::new(Method::POST, Scheme::Https, "service.example.com");

        sign_https(
            &mut req,
            &Credentials::new("AKIDEXAMPLE", "secret"),
            &context(SigningProtocol::V3Https),
        )
        .unwrap();

        assert_eq!(req.header("date"), Some("Mon, 01 Jan 2024 00:00:00 GMT"));
        assert_eq!(
            req.header(AUTH_HEADER),
            Some(
                "AWS3-HTTPS AWSAccessKeyId=AKIDEXAMPLE,Algorithm=HmacSHA256,\
                 Signature=DUIs1qgYeGtfMJhDnUQSWB7GFDUjl1kHZsY5Ycmaz7Q="
            )
        );
    }
}
