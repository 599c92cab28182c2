//! Client configuration.
//!
//! Provides [`ClientConfig`], the read-only settings a [`crate::Client`]
//! snapshots at construction. Values can be built in code, deserialized, or
//! loaded from environment variables.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stowage_auth::SigningProtocol;
use stowage_core::{Credentials, Region, Scheme};
use stowage_http::{Timeouts, TransportConfig};
use typed_builder::TypedBuilder;

/// Default throttling error codes.
///
/// Only the codes storage services are known to send for rate limiting. The
/// list is a starting point; services with their own codes extend it through
/// [`ClientConfig::throttling_codes`].
pub const DEFAULT_THROTTLING_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "RequestThrottled",
    "SlowDown",
];

/// Client configuration.
///
/// # Examples
///
/// ```
/// use stowage_client::ClientConfig;
///
/// let config = ClientConfig::builder()
///     .access_key_id("AKIDEXAMPLE".to_owned())
///     .secret_access_key("secret".to_owned())
///     .endpoint(Some("localhost:9000".to_owned()))
///     .use_ssl(false)
///     .force_path_style(true)
///     .build();
/// assert_eq!(config.max_retries, 3);
/// assert_eq!(config.multipart_min_part_size, 5 * 1024 * 1024);
/// ```
#[derive(Clone, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    /// Access key id.
    #[builder(default)]
    pub access_key_id: String,

    /// Secret access key.
    #[builder(default)]
    pub secret_access_key: String,

    /// Session token for temporary credentials.
    #[builder(default)]
    pub session_token: Option<String>,

    /// Region requests are scoped to.
    #[builder(default = String::from(Region::DEFAULT))]
    pub region: String,

    /// Host (optionally `host:port`) used instead of the bundled endpoint table.
    #[builder(default)]
    pub endpoint: Option<String>,

    /// Use HTTPS.
    #[builder(default = true)]
    pub use_ssl: bool,

    /// Always address buckets in the path rather than the host name.
    #[builder(default = false)]
    pub force_path_style: bool,

    /// Signing protocol.
    #[builder(default)]
    pub signature_version: SigningProtocol,

    /// Retries allowed after the first attempt.
    #[builder(default = 3)]
    pub max_retries: u32,

    /// Per-operation overrides of `max_retries`, keyed by operation name.
    #[builder(default)]
    pub operation_max_retries: BTreeMap<String, u32>,

    /// Backoff unit: the first retry waits this long.
    #[builder(default = 300)]
    pub retry_base_delay_ms: u64,

    /// Longest backoff between two attempts.
    #[builder(default = 20_000)]
    pub retry_max_delay_ms: u64,

    /// Error codes treated as throttling.
    #[builder(default = default_throttling_codes())]
    pub throttling_codes: Vec<String>,

    /// Open timeout in milliseconds.
    #[builder(default = 15_000)]
    pub open_timeout_ms: u64,

    /// Read timeout in milliseconds.
    #[builder(default = 60_000)]
    pub read_timeout_ms: u64,

    /// Idle connection timeout in milliseconds.
    #[builder(default = 60_000)]
    pub idle_timeout_ms: u64,

    /// Concurrent connections per host.
    #[builder(default = stowage_http::DEFAULT_MAX_CONNECTIONS_PER_HOST)]
    pub max_connections_per_host: usize,

    /// Uploads larger than this go through multipart.
    #[builder(default = 16 * 1024 * 1024)]
    pub multipart_threshold: u64,

    /// Smallest part size, except for the last part.
    #[builder(default = 5 * 1024 * 1024)]
    pub multipart_min_part_size: u64,

    /// Most parts one upload may have.
    #[builder(default = 10_000)]
    pub multipart_max_parts: u32,

    /// Parts uploaded at once by `upload_large_object`.
    #[builder(default = 4)]
    pub multipart_concurrency: usize,

    /// Verify TLS certificates.
    #[builder(default = true)]
    pub verify_tls: bool,

    /// HTTP proxy URI.
    #[builder(default)]
    pub proxy_uri: Option<String>,
}

fn default_throttling_codes() -> Vec<String> {
    DEFAULT_THROTTLING_CODES.iter().map(|c| (*c).to_owned()).collect()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("use_ssl", &self.use_ssl)
            .field("force_path_style", &self.force_path_style)
            .field("signature_version", &self.signature_version)
            .field("max_retries", &self.max_retries)
            .field("operation_max_retries", &self.operation_max_retries)
            .field("retry_base_delay_ms", &self.retry_base_delay_ms)
            .field("retry_max_delay_ms", &self.retry_max_delay_ms)
            .field("throttling_codes", &self.throttling_codes)
            .field("open_timeout_ms", &self.open_timeout_ms)
            .field("read_timeout_ms", &self.read_timeout_ms)
            .field("idle_timeout_ms", &self.idle_timeout_ms)
            .field("max_connections_per_host", &self.max_connections_per_host)
            .field("multipart_threshold", &self.multipart_threshold)
            .field("multipart_min_part_size", &self.multipart_min_part_size)
            .field("multipart_max_parts", &self.multipart_max_parts)
            .field("multipart_concurrency", &self.multipart_concurrency)
            .field("verify_tls", &self.verify_tls)
            .field("proxy_uri", &self.proxy_uri)
            .finish()
    }
}

impl ClientConfig {
    /// Load configuration from environment variables.
    ///
    /// Reads the following environment variables (falling back to defaults):
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `AWS_ACCESS_KEY_ID` | empty |
    /// | `AWS_SECRET_ACCESS_KEY` | empty |
    /// | `AWS_SESSION_TOKEN` | none |
    /// | `AWS_REGION` | `us-east-1` |
    /// | `S3_ENDPOINT` | bundled endpoint table |
    /// | `S3_USE_SSL` | `true` |
    /// | `S3_FORCE_PATH_STYLE` | `false` |
    /// | `S3_SIGNATURE_VERSION` | `v4` |
    /// | `MAX_RETRIES` | `3` |
    /// | `HTTP_OPEN_TIMEOUT_MS` | `15000` |
    /// | `HTTP_READ_TIMEOUT_MS` | `60000` |
    /// | `HTTP_IDLE_TIMEOUT_MS` | `60000` |
    /// | `HTTP_MAX_CONNECTIONS_PER_HOST` | `16` |
    /// | `SSL_VERIFY_PEER` | `true` |
    /// | `HTTPS_PROXY` | none |
    ///
    /// Unparsable numbers and signature versions are ignored.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(v) = lookup("AWS_ACCESS_KEY_ID") {
            config.access_key_id = v;
        }
        if let Some(v) = lookup("AWS_SECRET_ACCESS_KEY") {
            config.secret_access_key = v;
        }
        if let Some(v) = lookup("AWS_SESSION_TOKEN") {
            config.session_token = Some(v).filter(|t| !t.is_empty());
        }
        if let Some(v) = lookup("AWS_REGION") {
            config.region = v;
        }
        if let Some(v) = lookup("S3_ENDPOINT") {
            config.endpoint = Some(v).filter(|e| !e.is_empty());
        }
        if let Some(v) = lookup("S3_USE_SSL") {
            config.use_ssl = parse_bool(&v);
        }
        if let Some(v) = lookup("S3_FORCE_PATH_STYLE") {
            config.force_path_style = parse_bool(&v);
        }
        if let Some(v) = lookup("S3_SIGNATURE_VERSION") {
            if let Ok(protocol) = v.parse() {
                config.signature_version = protocol;
            }
        }
        if let Some(v) = lookup("MAX_RETRIES") {
            if let Ok(n) = v.parse() {
                config.max_retries = n;
            }
        }
        if let Some(v) = lookup("HTTP_OPEN_TIMEOUT_MS") {
            if let Ok(n) = v.parse() {
                config.open_timeout_ms = n;
            }
        }
        if let Some(v) = lookup("HTTP_READ_TIMEOUT_MS") {
            if let Ok(n) = v.parse() {
                config.read_timeout_ms = n;
            }
        }
        if let Some(v) = lookup("HTTP_IDLE_TIMEOUT_MS") {
            if let Ok(n) = v.parse() {
                config.idle_timeout_ms = n;
            }
        }
        if let Some(v) = lookup("HTTP_MAX_CONNECTIONS_PER_HOST") {
            if let Ok(n) = v.parse() {
                config.max_connections_per_host = n;
            }
        }
        if let Some(v) = lookup("SSL_VERIFY_PEER") {
            config.verify_tls = parse_bool(&v);
        }
        if let Some(v) = lookup("HTTPS_PROXY") {
            config.proxy_uri = Some(v).filter(|p| !p.is_empty());
        }

        config
    }

    /// The configured credentials.
    #[must_use]
    pub fn credentials(&self) -> Credentials {
        let credentials = Credentials::new(&self.access_key_id, &self.secret_access_key);
        match &self.session_token {
            Some(token) => credentials.with_session_token(token),
            None => credentials,
        }
    }

    /// URL scheme for requests.
    #[must_use]
    pub fn scheme(&self) -> Scheme {
        if self.use_ssl { Scheme::Https } else { Scheme::Http }
    }

    /// Transport timeouts.
    #[must_use]
    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            open: Duration::from_millis(self.open_timeout_ms),
            read: Duration::from_millis(self.read_timeout_ms),
            idle: Duration::from_millis(self.idle_timeout_ms),
        }
    }

    /// Settings for the pooled HTTP transport.
    #[must_use]
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            max_connections_per_host: self.max_connections_per_host,
            verify_tls: self.verify_tls,
            proxy_uri: self.proxy_uri.clone(),
        }
    }

    /// Retry budget for one operation.
    #[must_use]
    pub fn max_retries_for(&self, operation: &str) -> u32 {
        self.operation_max_retries
            .get(operation)
            .copied()
            .unwrap_or(self.max_retries)
    }
}

/// Parse a string as a boolean, accepting `"1"` and `"true"` (case-insensitive).
fn parse_bool(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}
