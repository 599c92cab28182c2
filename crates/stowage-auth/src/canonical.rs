//! Canonical request construction for the v4 signer.
//!
//! ```text
//! HTTPRequestMethod\n
//! CanonicalURI\n
//! CanonicalQueryString\n
//! CanonicalHeaders\n\n
//! SignedHeaders\n
//! HashedPayload
//! ```
//!
//! Every component is normalized so that the string is byte-for-byte what the
//! server rebuilds from the request it receives.

use percent_encoding::percent_decode_str;
use stowage_core::{Request, uri_encode};

use crate::error::SigningError;

/// Join the six components of a canonical request.
///
/// ```
/// use stowage_auth::canonical::build_canonical_request;
///
/// let canonical = build_canonical_request(
///     "GET",
///     "/photos/cat 1.jpg",
///     "",
///     &[("host", "photos.storage.example.com")],
///     &["host"],
///     "UNSIGNED-PAYLOAD",
/// );
/// assert_eq!(
///     canonical,
///     "GET\n/photos/cat%201.jpg\n\nhost:photos.storage.example.com\n\nhost\nUNSIGNED-PAYLOAD"
/// );
/// ```
#[must_use]
pub fn build_canonical_request(
    method: &str,
    path: &str,
    query: &str,
    headers: &[(&str, &str)],
    signed_headers: &[&str],
    payload_hash: &str,
) -> String {
    let uri = build_canonical_uri(path);
    let header_block = build_canonical_headers(headers, signed_headers);
    let signed = build_signed_headers_string(signed_headers);
    let parts: [&str; 7] = [method, &uri, query, &header_block, "", &signed, payload_hash];
    parts.join("\n")
}

/// Percent-encode each path segment, decoding it first so an encoded path
/// comes out unchanged.
///
/// ```
/// use stowage_auth::canonical::build_canonical_uri;
///
/// assert_eq!(build_canonical_uri("/a%20b"), "/a%20b");
/// assert_eq!(build_canonical_uri("/a b"), "/a%20b");
/// assert_eq!(build_canonical_uri(""), "/");
/// ```
#[must_use]
pub fn build_canonical_uri(path: &str) -> String {
    if path.is_empty() {
        return "/".to_owned();
    }
    let mut out = String::with_capacity(path.len());
    for (i, segment) in path.split('/').enumerate() {
        if i > 0 {
            out.push('/');
        }
        out.push_str(&uri_encode(&percent_decode_str(segment).decode_utf8_lossy()));
    }
    out
}

/// Encode and sort raw query pairs, by name then by value.
///
/// ```
/// use stowage_auth::canonical::build_canonical_query;
///
/// let pairs = vec![
///     ("prefix".to_owned(), "photos/".to_owned()),
///     ("max-keys".to_owned(), "10".to_owned()),
/// ];
/// assert_eq!(build_canonical_query(&pairs), "max-keys=10&prefix=photos%2F");
/// ```
#[must_use]
pub fn build_canonical_query(pairs: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = pairs
        .iter()
        .map(|(name, value)| (uri_encode(name), uri_encode(value)))
        .collect();
    encoded.sort_unstable();
    encoded
        .into_iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Lowercased `name:value` lines for the signed headers, sorted by name.
///
/// Values are trimmed with whitespace runs collapsed; a repeated header
/// contributes its values comma-joined in arrival order. No trailing newline.
#[must_use]
pub fn build_canonical_headers(headers: &[(&str, &str)], signed_headers: &[&str]) -> String {
    let wanted = sorted_names(signed_headers);
    let mut lines = Vec::with_capacity(wanted.len());
    for name in wanted {
        let values: Vec<String> = headers
            .iter()
            .filter(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
            .map(|(_, value)| collapse_whitespace(value))
            .collect();
        if !values.is_empty() {
            lines.push(format!("{name}:{}", values.join(",")));
        }
    }
    lines.join("\n")
}

/// `host;x-amz-date` style list of signed header names.
///
/// ```
/// use stowage_auth::canonical::build_signed_headers_string;
///
/// assert_eq!(build_signed_headers_string(&["x-amz-date", "host", "host"]), "host;x-amz-date");
/// ```
#[must_use]
pub fn build_signed_headers_string(signed_headers: &[&str]) -> String {
    sorted_names(signed_headers).join(";")
}

fn sorted_names<'a>(names: &[&'a str]) -> Vec<&'a str> {
    let mut names = names.to_vec();
    names.sort_unstable();
    names.dedup();
    names
}

/// Trim and collapse every whitespace run to one space.
#[must_use]
pub fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Collect `(lowercase name, value)` for every header accepted by `include`.
pub(crate) fn collect_headers(
    request: &Request,
    include: impl Fn(&str) -> bool,
) -> Result<Vec<(String, String)>, SigningError> {
    let mut out = Vec::new();
    for (name, value) in &request.headers {
        let name = name.as_str();
        if !include(name) {
            continue;
        }
        let value = value
            .to_str()
            .map_err(|_| SigningError::InvalidHeader(name.to_owned()))?;
        out.push((name.to_owned(), value.to_owned()));
    }
    Ok(out)
}
