//! The draft request and its body source.

use std::fmt;
use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;
use http::{HeaderMap, HeaderName, HeaderValue, Method};

use crate::encoding::encode_query_pairs;
use crate::error::{CoreError, CoreResult};
use crate::types::{Region, Scheme};

/// A boxed single-pass stream of body chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Request body.
///
/// `Empty` and `Bytes` can be replayed for every attempt. A `Stream` can be
/// handed to the transport exactly once; after that the source is consumed
/// and any further attempt must fail rather than send a partial body.
#[derive(Default)]
pub enum ByteSource {
    /// No body.
    #[default]
    Empty,
    /// A fully buffered body.
    Bytes(Bytes),
    /// A single-pass body with an optional known length.
    Stream {
        /// The stream, `None` once it has been taken.
        stream: Option<ByteStream>,
        /// Declared length in bytes, sent as `content-length` when known.
        length: Option<u64>,
    },
}

impl ByteSource {
    /// Wrap a single-pass stream.
    pub fn from_stream<S>(stream: S, length: Option<u64>) -> Self
    where
        S: Stream<Item = std::io::Result<Bytes>> + Send + 'static,
    {
        Self::Stream {
            stream: Some(Box::pin(stream)),
            length,
        }
    }

    /// Whether the body can be sent again from the start.
    #[must_use]
    pub fn is_rewindable(&self) -> bool {
        !matches!(self, Self::Stream { .. })
    }

    /// Whether a single-pass stream has already been handed out.
    #[must_use]
    pub fn is_consumed(&self) -> bool {
        matches!(self, Self::Stream { stream: None, .. })
    }

    /// Length in bytes when known up front.
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        match self {
            Self::Empty => Some(0),
            Self::Bytes(b) => Some(b.len() as u64),
            Self::Stream { length, .. } => *length,
        }
    }

    /// The buffered contents, or `None` for a stream.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Empty => Some(&[]),
            Self::Bytes(b) => Some(b),
            Self::Stream { .. } => None,
        }
    }

    /// Produce the body for one attempt.
    ///
    /// Buffered bodies are cheaply cloned. A stream is moved out, leaving this
    /// source consumed. Returns `None` when the stream was already taken.
    pub fn take_for_attempt(&mut self) -> Option<Self> {
        match self {
            Self::Empty => Some(Self::Empty),
            Self::Bytes(b) => Some(Self::Bytes(b.clone())),
            Self::Stream { stream, length } => stream.take().map(|s| Self::Stream {
                stream: Some(s),
                length: *length,
            }),
        }
    }
}

impl fmt::Debug for ByteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Self::Stream { stream, length } => f
                .debug_struct("Stream")
                .field("consumed", &stream.is_none())
                .field("length", length)
                .finish(),
        }
    }
}

impl From<Bytes> for ByteSource {
    fn from(data: Bytes) -> Self {
        if data.is_empty() {
            Self::Empty
        } else {
            Self::Bytes(data)
        }
    }
}

impl From<Vec<u8>> for ByteSource {
    fn from(data: Vec<u8>) -> Self {
        Bytes::from(data).into()
    }
}

impl From<String> for ByteSource {
    fn from(data: String) -> Self {
        Bytes::from(data).into()
    }
}

impl From<&'static str> for ByteSource {
    fn from(data: &'static str) -> Self {
        Bytes::from_static(data.as_bytes()).into()
    }
}

/// A request being drafted, signed and sent.
///
/// `path` is already percent-encoded. `query` keeps raw values in insertion
/// order and is encoded when the request line is rendered.
#[derive(Debug)]
pub struct Request {
    /// HTTP method.
    pub method: Method,
    /// URL scheme.
    pub scheme: Scheme,
    /// Host name without port.
    pub host: String,
    /// Explicit port, `None` for the scheme default.
    pub port: Option<u16>,
    /// Encoded absolute path.
    pub path: String,
    /// Ordered query multimap with raw values.
    pub query: Vec<(String, String)>,
    /// Case-insensitive header multimap.
    pub headers: HeaderMap,
    /// Request body.
    pub body: ByteSource,
    /// Region the request is scoped to.
    pub region: Region,
    /// Service endpoint prefix such as `s3`.
    pub endpoint_prefix: String,
    /// Target bucket, used by the legacy storage signer to build its resource.
    pub bucket: Option<String>,
    /// Whether the bucket is addressed through the host name.
    pub virtual_hosted: bool,
}

impl Request {
    /// Create a request for `/` on the given host.
    #[must_use]
    pub fn new(method: Method, scheme: Scheme, host: impl Into<String>) -> Self {
        Self {
            method,
            scheme,
            host: host.into(),
            port: None,
            path: "/".to_owned(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: ByteSource::Empty,
            region: Region::default(),
            endpoint_prefix: "s3".to_owned(),
            bucket: None,
            virtual_hosted: false,
        }
    }

    /// Append a query parameter.
    pub fn push_query(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.query.push((name.into(), value.into()));
    }

    /// Set a header, replacing any previous values.
    pub fn insert_header(&mut self, name: &str, value: &str) -> CoreResult<()> {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| CoreError::InvalidHeader {
                name: name.to_owned(),
                reason: e.to_string(),
            })?;
        let header_value = HeaderValue::from_str(value).map_err(|e| CoreError::InvalidHeader {
            name: name.to_owned(),
            reason: e.to_string(),
        })?;
        self.headers.insert(header_name, header_value);
        Ok(())
    }

    /// Get a header as a string, if present and valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Port the connection goes to.
    #[must_use]
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.scheme.default_port())
    }

    /// Value of the `Host` header: the host plus a non-default port.
    #[must_use]
    pub fn host_header(&self) -> String {
        match self.port {
            Some(port) if port != self.scheme.default_port() => format!("{}:{port}", self.host),
            _ => self.host.clone(),
        }
    }

    /// Encoded query string without the leading `?`.
    #[must_use]
    pub fn query_string(&self) -> String {
        encode_query_pairs(&self.query)
    }

    /// Origin-form request target.
    #[must_use]
    pub fn path_and_query(&self) -> String {
        if self.query.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, self.query_string())
        }
    }

    /// Absolute URL of the request.
    #[must_use]
    pub fn url(&self) -> String {
        format!(
            "{}://{}{}",
            self.scheme,
            self.host_header(),
            self.path_and_query()
        )
    }

    /// Copy the request for one send attempt.
    ///
    /// Returns `None` when the body is a stream that an earlier attempt
    /// already consumed.
    pub fn fork_attempt(&mut self) -> Option<Self> {
        let body = self.body.take_for_attempt()?;
        Some(Self {
            method: self.method.clone(),
            scheme: self.scheme,
            host: self.host.clone(),
            port: self.port,
            path: self.path.clone(),
            query: self.query.clone(),
            headers: self.headers.clone(),
            body,
            region: self.region.clone(),
            endpoint_prefix: self.endpoint_prefix.clone(),
            bucket: self.bucket.clone(),
            virtual_hosted: self.virtual_hosted,
        })
    }
}

/// Authentication material a signer attached to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthArtifact {
    /// Headers added to the request.
    Headers(Vec<(String, String)>),
    /// Query parameters appended to the request.
    Query(Vec<(String, String)>),
}

/// A request with its authentication material applied.
///
/// The artifact is already present in `request`; it is kept alongside for
/// inspection and logging.
#[derive(Debug)]
pub struct SignedRequest {
    /// The signed request, ready for the transport.
    pub request: Request,
    /// What the signer added.
    pub artifact: AuthArtifact,
}
