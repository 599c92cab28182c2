//! The transport seam and its pooled HTTP implementation.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::header::{CONTENT_LENGTH, HOST};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use stowage_core::{Request, SignedRequest};
use tokio::sync::Notify;
use tracing::debug;

use crate::body::{RequestBody, ResponseBody};
use crate::connector::{Connector, Proxy};
use crate::error::TransportError;
use crate::pool::{ConnectionPool, DEFAULT_MAX_CONNECTIONS_PER_HOST, PoolKey};

/// Timeouts applied to one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Upper bound on checkout: waiting for a slot plus connecting.
    pub open: Duration,
    /// Longest stall tolerated while the request body is written, before the
    /// response head and between response body chunks.
    pub read: Duration,
    /// Idle connections unused for longer than this are not reused.
    pub idle: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            open: Duration::from_secs(15),
            read: Duration::from_secs(60),
            idle: Duration::from_secs(60),
        }
    }
}

/// Status, headers and body of one exchange.
#[derive(Debug)]
pub struct RawResponse {
    /// HTTP status.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body, not yet read.
    pub body: ResponseBody,
}

impl RawResponse {
    /// Build a response from parts.
    #[must_use]
    pub fn new(status: StatusCode, headers: HeaderMap, body: ResponseBody) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Get a header as a string.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Sends a signed request and reports the outcome of that single exchange.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Perform one exchange. Never retries.
    async fn send(
        &self,
        request: SignedRequest,
        timeouts: &Timeouts,
    ) -> Result<RawResponse, TransportError>;
}

/// Settings for [`HttpTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Bound on concurrent connections per `(scheme, host, port)`.
    pub max_connections_per_host: usize,
    /// Verify server certificates and host names.
    pub verify_tls: bool,
    /// HTTP proxy for every connection.
    pub proxy_uri: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_connections_per_host: DEFAULT_MAX_CONNECTIONS_PER_HOST,
            verify_tls: true,
            proxy_uri: None,
        }
    }
}

/// HTTP/1.1 transport over a [`ConnectionPool`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    pool: ConnectionPool,
}

impl HttpTransport {
    /// Create a transport.
    pub fn new(config: &TransportConfig) -> Result<Self, TransportError> {
        let proxy = config.proxy_uri.as_deref().map(Proxy::parse).transpose()?;
        let connector = Connector::new(config.verify_tls, proxy)?;
        Ok(Self {
            pool: ConnectionPool::new(connector, config.max_connections_per_host),
        })
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        signed: SignedRequest,
        timeouts: &Timeouts,
    ) -> Result<RawResponse, TransportError> {
        let request = signed.request;
        let key = PoolKey::for_request(&request);
        let absolute = self.pool.connector().uses_absolute_form(key.scheme);
        let progress = Arc::new(Notify::new());
        let http_request = to_http_request(request, absolute)?
            .map(|body| body.with_progress(progress.clone()));

        let mut connection = self.pool.checkout(&key, timeouts).await?;
        let reused = connection.is_reused();
        let response =
            until_stalled(connection.send(http_request), &progress, timeouts.read).await?;

        let (parts, incoming) = response.into_parts();
        debug!(key = %key, status = parts.status.as_u16(), reused, "received response");
        Ok(RawResponse {
            status: parts.status,
            headers: parts.headers,
            body: ResponseBody::wire(incoming, connection, timeouts.read),
        })
    }
}

/// Await `exchange`, failing once `read` passes without `progress` firing.
async fn until_stalled<T>(
    exchange: impl Future<Output = Result<T, TransportError>>,
    progress: &Notify,
    read: Duration,
) -> Result<T, TransportError> {
    tokio::pin!(exchange);
    loop {
        tokio::select! {
            result = &mut exchange => return result,
            () = progress.notified() => {}
            () = tokio::time::sleep(read) => return Err(TransportError::ReadTimeout(read)),
        }
    }
}

/// Render a draft request as an HTTP message.
fn to_http_request(
    request: Request,
    absolute: bool,
) -> Result<http::Request<RequestBody>, TransportError> {
    let target = if absolute {
        request.url()
    } else {
        request.path_and_query()
    };
    let length = request.body.content_length();
    let host = request.host_header();
    let sends_length = length.is_some_and(|len| len > 0)
        || matches!(request.method, Method::PUT | Method::POST);

    let mut http_request = http::Request::builder()
        .method(request.method)
        .uri(target)
        .body(RequestBody::try_from(request.body)?)
        .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;

    let headers = http_request.headers_mut();
    *headers = request.headers;
    if !headers.contains_key(HOST) {
        let value =
            HeaderValue::from_str(&host).map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        headers.insert(HOST, value);
    }
    if let Some(len) = length {
        if sends_length && !headers.contains_key(CONTENT_LENGTH) {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
        }
    }
    Ok(http_request)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use stowage_core::{AuthArtifact, ByteSource, Scheme};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    const REPLY: &[u8] = b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nok";

    fn find_head_end(buf: &[u8]) -> Option<usize> {
        buf.windows(4).position(|w| w == b"\r\n\r\n")
    }

    /// Minimal keep-alive server answering every request head with `REPLY`.
    async fn spawn_server() -> (u16, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepts = Arc::new(AtomicUsize::new(0));
        let counter = accepts.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 1024];
                    loop {
                        let n = match socket.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => n,
                        };
                        buf.extend_from_slice(&chunk[..n]);
                        while let Some(end) = find_head_end(&buf) {
                            buf.drain(..end + 4);
                            if socket.write_all(REPLY).await.is_err() {
                                return;
                            }
                        }
                    }
                });
            }
        });
        (port, accepts)
    }

    fn get(port: u16) -> SignedRequest {
        let mut request = Request::new(Method::GET, Scheme::Http, "127.0.0.1");
        request.port = Some(port);
        request.path = "/bucket/key".to_owned();
        SignedRequest {
            request,
            artifact: AuthArtifact::Headers(Vec::new()),
        }
    }

    fn transport(max: usize) -> HttpTransport {
        HttpTransport::new(&TransportConfig {
            max_connections_per_host: max,
            ..TransportConfig::default()
        })
        .unwrap()
    }

    fn short_timeouts() -> Timeouts {
        Timeouts {
            open: Duration::from_millis(200),
            read: Duration::from_millis(200),
            idle: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_should_reuse_connection_after_body_is_read() {
        let (port, accepts) = spawn_server().await;
        let transport = transport(4);
        let timeouts = short_timeouts();

        for _ in 0..3 {
            let response = transport.send(get(port), &timeouts).await.unwrap();
            assert_eq!(response.status, StatusCode::OK);
            assert_eq!(&response.body.collect().await.unwrap()[..], b"ok");
        }

        assert_eq!(accepts.load(Ordering::SeqCst), 1);
        let key = PoolKey::for_request(&get(port).request);
        assert_eq!(transport.pool().idle_count(&key), 1);
    }

    #[tokio::test]
    async fn test_should_evict_connection_when_body_is_dropped_unread() {
        let (port, accepts) = spawn_server().await;
        let transport = transport(4);
        let timeouts = short_timeouts();

        let response = transport.send(get(port), &timeouts).await.unwrap();
        drop(response);
        let response = transport.send(get(port), &timeouts).await.unwrap();
        response.body.collect().await.unwrap();

        assert_eq!(accepts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_should_not_reuse_connection_idle_past_timeout() {
        let (port, accepts) = spawn_server().await;
        let transport = transport(4);
        let timeouts = Timeouts {
            idle: Duration::from_millis(10),
            ..short_timeouts()
        };

        let response = transport.send(get(port), &timeouts).await.unwrap();
        response.body.collect().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let response = transport.send(get(port), &timeouts).await.unwrap();
        response.body.collect().await.unwrap();

        assert_eq!(accepts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_should_fail_with_pool_exhausted_when_slot_is_busy() {
        let (port, _accepts) = spawn_server().await;
        let transport = transport(1);
        let timeouts = Timeouts {
            open: Duration::from_millis(50),
            ..short_timeouts()
        };

        let held = transport.send(get(port), &timeouts).await.unwrap();
        let err = transport.send(get(port), &timeouts).await.unwrap_err();
        assert!(matches!(err, TransportError::PoolExhausted { .. }));
        assert!(err.is_retryable());

        held.body.collect().await.unwrap();
        let response = transport.send(get(port), &timeouts).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_should_time_out_when_server_stalls() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let timeouts = Timeouts {
            read: Duration::from_millis(50),
            ..short_timeouts()
        };
        let err = transport(1).send(get(port), &timeouts).await.unwrap_err();
        assert!(matches!(err, TransportError::ReadTimeout(_)));
    }

    #[tokio::test]
    async fn test_should_not_time_out_slow_but_steady_upload() {
        const BODY_LEN: usize = 80;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                if let Some(end) = find_head_end(&buf) {
                    if buf.len() >= end + 4 + BODY_LEN {
                        break;
                    }
                }
                let n = socket.read(&mut chunk).await.unwrap();
                assert!(n > 0, "client closed before sending the whole body");
                buf.extend_from_slice(&chunk[..n]);
            }
            socket.write_all(REPLY).await.unwrap();
        });

        let chunks = futures::stream::unfold(0, |sent| async move {
            if sent == 8 {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(30)).await;
            Some((Ok::<_, std::io::Error>(bytes::Bytes::from(vec![b'x'; 10])), sent + 1))
        });
        let mut request = Request::new(Method::PUT, Scheme::Http, "127.0.0.1");
        request.port = Some(port);
        request.path = "/bucket/slow".to_owned();
        request.body = ByteSource::from_stream(chunks, Some(BODY_LEN as u64));
        let signed = SignedRequest {
            request,
            artifact: AuthArtifact::Headers(Vec::new()),
        };

        let timeouts = Timeouts {
            read: Duration::from_millis(100),
            ..short_timeouts()
        };
        let started = std::time::Instant::now();
        let response = transport(1).send(signed, &timeouts).await.unwrap();
        assert!(started.elapsed() > timeouts.read);
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(&response.body.collect().await.unwrap()[..], b"ok");
    }

    #[tokio::test]
    async fn test_should_time_out_when_upload_stalls() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let chunks = futures::stream::once(async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok::<_, std::io::Error>(bytes::Bytes::from_static(b"late"))
        });
        let mut request = Request::new(Method::PUT, Scheme::Http, "127.0.0.1");
        request.port = Some(port);
        request.path = "/bucket/stalled".to_owned();
        request.body = ByteSource::from_stream(chunks, Some(4));
        let signed = SignedRequest {
            request,
            artifact: AuthArtifact::Headers(Vec::new()),
        };

        let timeouts = Timeouts {
            read: Duration::from_millis(50),
            ..short_timeouts()
        };
        let err = transport(1).send(signed, &timeouts).await.unwrap_err();
        assert!(matches!(err, TransportError::ReadTimeout(_)));
    }

    #[tokio::test]
    async fn test_should_report_connect_failure_as_retryable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = transport(1)
            .send(get(port), &short_timeouts())
            .await
            .unwrap_err();
        assert!(err.is_retryable(), "unexpected error: {err}");
    }

    #[test]
    fn test_should_render_origin_form_with_host_and_length() {
        let mut request = Request::new(Method::PUT, Scheme::Http, "localhost");
        request.port = Some(9000);
        request.path = "/bucket/a%20b".to_owned();
        request.push_query("partNumber", "1");
        request.body = ByteSource::from("data");

        let http_request = to_http_request(request, false).unwrap();
        assert_eq!(http_request.uri().to_string(), "/bucket/a%20b?partNumber=1");
        assert_eq!(http_request.headers()[HOST], "localhost:9000");
        assert_eq!(http_request.headers()[CONTENT_LENGTH], "4");
    }

    #[test]
    fn test_should_render_absolute_form_for_proxy() {
        let request = Request::new(Method::GET, Scheme::Http, "bucket.s3.amazonaws.com");
        let http_request = to_http_request(request, true).unwrap();
        assert_eq!(
            http_request.uri().to_string(),
            "http://bucket.s3.amazonaws.com/"
        );
        assert!(!http_request.headers().contains_key(CONTENT_LENGTH));
    }
}
