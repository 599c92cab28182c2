//! Percent-encoding shared by request drafting and the signers.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

/// Everything except the RFC 3986 unreserved characters
/// (`A-Z`, `a-z`, `0-9`, `-`, `_`, `.`, `~`) is encoded.
pub const URI_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Percent-encode a string using [`URI_ENCODE_SET`].
#[must_use]
pub fn uri_encode(input: &str) -> String {
    utf8_percent_encode(input, URI_ENCODE_SET).to_string()
}

/// Percent-encode an object key or path, keeping `/` separators.
///
/// ```
/// use stowage_core::uri_encode_path;
///
/// assert_eq!(uri_encode_path("photos/2024 summer.jpg"), "photos/2024%20summer.jpg");
/// ```
#[must_use]
pub fn uri_encode_path(path: &str) -> String {
    path.split('/').map(uri_encode).collect::<Vec<_>>().join("/")
}

/// Encode `(name, value)` pairs into a query string, keeping their order.
///
/// A pair with an empty value is emitted as a bare `name=`.
#[must_use]
pub fn encode_query_pairs<K, V>(pairs: &[(K, V)]) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", uri_encode(k.as_ref()), uri_encode(v.as_ref())))
        .collect::<Vec<_>>()
        .join("&")
}
