//! Operation table.
//!
//! Every storage operation maps to a static [`OperationSpec`] describing its
//! HTTP method, wire protocol, addressing, sub-resource and the grammars of
//! its request and response bodies. Specs for other services (REST+JSON or
//! JSON-RPC) are plain values and can be run with
//! [`crate::Client::call_spec`].

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use http::Method;
use stowage_core::ByteSource;
use stowage_xml::{Grammar, Value};

use crate::shapes;

/// Wire protocol of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Resource path addressing with XML bodies.
    RestXml,
    /// Resource path addressing with JSON bodies.
    RestJson,
    /// `POST /` with the operation named in `x-amz-target`.
    JsonRpc {
        /// Prefix of the target header, such as `DynamoDB_20120810`.
        target_prefix: &'static str,
        /// JSON content type version, such as `1.0`.
        json_version: &'static str,
    },
}

/// What an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// The service root.
    Service,
    /// A bucket.
    Bucket,
    /// An object within a bucket.
    Object,
}

/// How a successful response body is decoded.
#[derive(Debug, Clone, Copy)]
pub enum ResponseShape {
    /// The body is ignored.
    Empty,
    /// XML parsed with the grammar.
    Xml(&'static Grammar),
    /// JSON document.
    Json,
    /// Raw bytes.
    Blob,
}

/// Static description of an operation.
#[derive(Debug, Clone)]
pub struct OperationSpec {
    /// Operation name, used for logging, retry overrides and JSON-RPC targets.
    pub name: &'static str,
    /// Service endpoint prefix, used for host lookup and the signing scope.
    pub service: &'static str,
    /// HTTP method.
    pub method: Method,
    /// Wire protocol.
    pub protocol: Protocol,
    /// What the operation addresses.
    pub target: Target,
    /// Sub-resource query parameter, such as `acl` or `uploads`.
    pub subresource: Option<&'static str>,
    /// Root element and grammar of an XML request body.
    pub request: Option<(&'static str, &'static Grammar)>,
    /// Response decoding.
    pub response: ResponseShape,
    /// Whether the result may be served from a [`crate::CallScope`] cache.
    pub cacheable: bool,
}

impl OperationSpec {
    /// A REST+XML spec with no sub-resource, request body or caching.
    #[must_use]
    pub fn rest_xml(name: &'static str, method: Method, target: Target) -> Self {
        Self {
            name,
            service: "s3",
            method,
            protocol: Protocol::RestXml,
            target,
            subresource: None,
            request: None,
            response: ResponseShape::Empty,
            cacheable: false,
        }
    }

    /// A JSON-RPC spec.
    #[must_use]
    pub fn json_rpc(name: &'static str, target_prefix: &'static str, json_version: &'static str) -> Self {
        Self {
            name,
            service: "s3",
            method: Method::POST,
            protocol: Protocol::JsonRpc {
                target_prefix,
                json_version,
            },
            target: Target::Service,
            subresource: None,
            request: None,
            response: ResponseShape::Json,
            cacheable: false,
        }
    }

    /// Set the service endpoint prefix.
    #[must_use]
    pub fn service(mut self, service: &'static str) -> Self {
        self.service = service;
        self
    }

    /// Set the sub-resource.
    #[must_use]
    pub fn subresource(mut self, name: &'static str) -> Self {
        self.subresource = Some(name);
        self
    }

    /// Set the XML request body shape.
    #[must_use]
    pub fn request(mut self, root: &'static str, grammar: &'static Grammar) -> Self {
        self.request = Some((root, grammar));
        self
    }

    /// Set the response shape.
    #[must_use]
    pub fn response(mut self, shape: ResponseShape) -> Self {
        self.response = shape;
        self
    }

    /// Allow caching in a call scope.
    #[must_use]
    pub fn cacheable(mut self) -> Self {
        self.cacheable = true;
        self
    }

    /// Set the protocol.
    #[must_use]
    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }
}

/// Storage operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `GET /`
    ListBuckets,
    /// `PUT /{bucket}`
    CreateBucket,
    /// `DELETE /{bucket}`
    DeleteBucket,
    /// `HEAD /{bucket}`
    HeadBucket,
    /// `GET /{bucket}?acl`
    GetBucketAcl,
    /// `PUT /{bucket}?acl`
    PutBucketAcl,
    /// `GET /{bucket}?location`
    GetBucketLocation,
    /// `GET /{bucket}`
    ListObjects,
    /// `PUT /{bucket}/{key}`
    PutObject,
    /// `GET /{bucket}/{key}`
    GetObject,
    /// `HEAD /{bucket}/{key}`
    HeadObject,
    /// `DELETE /{bucket}/{key}`
    DeleteObject,
    /// `PUT /{bucket}/{key}` with `x-amz-copy-source`
    CopyObject,
    /// `POST /{bucket}/{key}?uploads`
    CreateMultipartUpload,
    /// `PUT /{bucket}/{key}?partNumber&uploadId`
    UploadPart,
    /// `POST /{bucket}/{key}?uploadId`
    CompleteMultipartUpload,
    /// `DELETE /{bucket}/{key}?uploadId`
    AbortMultipartUpload,
    /// `GET /{bucket}/{key}?uploadId`
    ListParts,
    /// `GET /{bucket}?uploads`
    ListMultipartUploads,
}

impl Operation {
    /// Every operation.
    pub const ALL: [Self; 19] = [
        Self::ListBuckets,
        Self::CreateBucket,
        Self::DeleteBucket,
        Self::HeadBucket,
        Self::GetBucketAcl,
        Self::PutBucketAcl,
        Self::GetBucketLocation,
        Self::ListObjects,
        Self::PutObject,
        Self::GetObject,
        Self::HeadObject,
        Self::DeleteObject,
        Self::CopyObject,
        Self::CreateMultipartUpload,
        Self::UploadPart,
        Self::CompleteMultipartUpload,
        Self::AbortMultipartUpload,
        Self::ListParts,
        Self::ListMultipartUploads,
    ];

    /// Operation name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ListBuckets => "ListBuckets",
            Self::CreateBucket => "CreateBucket",
            Self::DeleteBucket => "DeleteBucket",
            Self::HeadBucket => "HeadBucket",
            Self::GetBucketAcl => "GetBucketAcl",
            Self::PutBucketAcl => "PutBucketAcl",
            Self::GetBucketLocation => "GetBucketLocation",
            Self::ListObjects => "ListObjects",
            Self::PutObject => "PutObject",
            Self::GetObject => "GetObject",
            Self::HeadObject => "HeadObject",
            Self::DeleteObject => "DeleteObject",
            Self::CopyObject => "CopyObject",
            Self::CreateMultipartUpload => "CreateMultipartUpload",
            Self::UploadPart => "UploadPart",
            Self::CompleteMultipartUpload => "CompleteMultipartUpload",
            Self::AbortMultipartUpload => "AbortMultipartUpload",
            Self::ListParts => "ListParts",
            Self::ListMultipartUploads => "ListMultipartUploads",
        }
    }

    /// The operation's spec.
    #[must_use]
    pub fn spec(self) -> OperationSpec {
        use ResponseShape::{Blob, Xml};
        use Target::{Bucket, Object, Service};

        let name = self.as_str();
        match self {
            Self::ListBuckets => OperationSpec::rest_xml(name, Method::GET, Service)
                .response(Xml(&shapes::LIST_BUCKETS))
                .cacheable(),
            Self::CreateBucket => OperationSpec::rest_xml(name, Method::PUT, Bucket)
                .request("CreateBucketConfiguration", &shapes::LOCATION),
            Self::DeleteBucket => OperationSpec::rest_xml(name, Method::DELETE, Bucket),
            Self::HeadBucket => OperationSpec::rest_xml(name, Method::HEAD, Bucket).cacheable(),
            Self::GetBucketAcl => OperationSpec::rest_xml(name, Method::GET, Bucket)
                .subresource("acl")
                .response(Xml(&shapes::ACCESS_CONTROL_POLICY))
                .cacheable(),
            Self::PutBucketAcl => OperationSpec::rest_xml(name, Method::PUT, Bucket)
                .subresource("acl")
                .request("AccessControlPolicy", &shapes::ACCESS_CONTROL_POLICY),
            Self::GetBucketLocation => OperationSpec::rest_xml(name, Method::GET, Bucket)
                .subresource("location")
                .response(Xml(&shapes::LOCATION))
                .cacheable(),
            Self::ListObjects => OperationSpec::rest_xml(name, Method::GET, Bucket)
                .response(Xml(&shapes::LIST_OBJECTS))
                .cacheable(),
            Self::PutObject => OperationSpec::rest_xml(name, Method::PUT, Object),
            Self::GetObject => OperationSpec::rest_xml(name, Method::GET, Object).response(Blob),
            Self::HeadObject => OperationSpec::rest_xml(name, Method::HEAD, Object).cacheable(),
            Self::DeleteObject => OperationSpec::rest_xml(name, Method::DELETE, Object),
            Self::CopyObject => OperationSpec::rest_xml(name, Method::PUT, Object)
                .response(Xml(&shapes::COPY_OBJECT)),
            Self::CreateMultipartUpload => OperationSpec::rest_xml(name, Method::POST, Object)
                .subresource("uploads")
                .response(Xml(&shapes::INITIATE_MULTIPART)),
            Self::UploadPart => OperationSpec::rest_xml(name, Method::PUT, Object),
            Self::CompleteMultipartUpload => OperationSpec::rest_xml(name, Method::POST, Object)
                .request("CompleteMultipartUpload", &shapes::COMPLETE_MULTIPART_REQUEST)
                .response(Xml(&shapes::COMPLETE_MULTIPART)),
            Self::AbortMultipartUpload => OperationSpec::rest_xml(name, Method::DELETE, Object),
            Self::ListParts => OperationSpec::rest_xml(name, Method::GET, Object)
                .response(Xml(&shapes::LIST_PARTS)),
            Self::ListMultipartUploads => OperationSpec::rest_xml(name, Method::GET, Bucket)
                .subresource("uploads")
                .response(Xml(&shapes::LIST_MULTIPART_UPLOADS)),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| format!("unknown operation: {s}"))
    }
}

/// Parameters of one call.
///
/// ```
/// use stowage_client::Params;
///
/// let params = Params::new()
///     .bucket("photos")
///     .key("2024/cat.jpg")
///     .header("content-type", "image/jpeg")
///     .body("...");
/// assert_eq!(params.bucket.as_deref(), Some("photos"));
/// ```
#[derive(Debug, Default)]
pub struct Params {
    /// Bucket name.
    pub bucket: Option<String>,
    /// Object key, unencoded.
    pub key: Option<String>,
    /// Query parameters, in order.
    pub query: Vec<(String, String)>,
    /// Extra request headers.
    pub headers: Vec<(String, String)>,
    /// Raw request body.
    pub body: ByteSource,
    /// Structured XML request body, encoded with the operation's request grammar.
    pub xml: Option<Value>,
    /// JSON request body for JSON protocols.
    pub json: Option<serde_json::Value>,
}

impl Params {
    /// Empty parameters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bucket.
    #[must_use]
    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    /// Set the object key.
    #[must_use]
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Append a query parameter.
    #[must_use]
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Append a query parameter when a value is given.
    #[must_use]
    pub fn query_opt(self, name: impl Into<String>, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(value) => self.query(name, value),
            None => self,
        }
    }

    /// Add a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the raw body.
    #[must_use]
    pub fn body(mut self, body: impl Into<ByteSource>) -> Self {
        self.body = body.into();
        self
    }

    /// Set a buffered body.
    #[must_use]
    pub fn bytes(self, body: Bytes) -> Self {
        self.body(body)
    }

    /// Set a structured XML body.
    #[must_use]
    pub fn xml(mut self, value: Value) -> Self {
        self.xml = Some(value);
        self
    }

    /// Set a JSON body.
    #[must_use]
    pub fn json(mut self, value: serde_json::Value) -> Self {
        self.json = Some(value);
        self
    }

    /// Whether the call can be cached: only when no body is sent.
    pub(crate) fn cache_key(&self, operation: &str) -> Option<String> {
        if !matches!(self.body, ByteSource::Empty) || self.xml.is_some() || self.json.is_some() {
            return None;
        }
        let mut key = format!(
            "{operation}|{}|{}",
            self.bucket.as_deref().unwrap_or_default(),
            self.key.as_deref().unwrap_or_default()
        );
        for (name, value) in &self.query {
            key.push_str(&format!("|{name}={value}"));
        }
        for (name, value) in &self.headers {
            key.push_str(&format!("|{}:{value}", name.to_ascii_lowercase()));
        }
        Some(key)
    }
}
