//! Establishing connections: TCP, optional TLS and optional HTTP proxy.

use std::fmt;

use hyper::client::conn::http1::{self, SendRequest};
use hyper_util::rt::TokioIo;
use stowage_core::Scheme;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::body::RequestBody;
use crate::error::TransportError;
use crate::pool::PoolKey;

/// Longest proxy `CONNECT` response head accepted.
const MAX_PROXY_RESPONSE: usize = 8 * 1024;

trait Io: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Io for T {}

/// An HTTP proxy all connections go through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proxy {
    host: String,
    port: u16,
}

impl Proxy {
    /// Parse a proxy URI such as `http://proxy.local:3128`.
    pub fn parse(uri: &str) -> Result<Self, TransportError> {
        let parsed: http::Uri = uri
            .parse()
            .map_err(|e: http::uri::InvalidUri| TransportError::Proxy(e.to_string()))?;
        match parsed.scheme_str() {
            None | Some("http") => {}
            Some(other) => {
                return Err(TransportError::Proxy(format!(
                    "unsupported proxy scheme {other}"
                )));
            }
        }
        let host = parsed
            .host()
            .ok_or_else(|| TransportError::Proxy(format!("no host in proxy uri {uri}")))?;
        Ok(Self {
            host: host.to_owned(),
            port: parsed.port_u16().unwrap_or(80),
        })
    }

    /// Proxy host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Proxy port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }
}

/// Opens new connections and performs the HTTP/1.1 handshake.
#[derive(Clone)]
pub struct Connector {
    tls: tokio_native_tls::TlsConnector,
    proxy: Option<Proxy>,
}

impl Connector {
    /// Create a connector.
    ///
    /// With `verify_tls` off, certificates and host names are not checked.
    pub fn new(verify_tls: bool, proxy: Option<Proxy>) -> Result<Self, TransportError> {
        let tls = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(!verify_tls)
            .danger_accept_invalid_hostnames(!verify_tls)
            .build()
            .map_err(|e| TransportError::Tls(e.to_string()))?;
        if !verify_tls {
            warn!("TLS certificate verification is disabled");
        }
        Ok(Self {
            tls: tls.into(),
            proxy,
        })
    }

    /// Whether requests for `scheme` must use an absolute-form target.
    ///
    /// Plain HTTP through a proxy is forwarded; HTTPS is tunneled and keeps
    /// the origin form.
    #[must_use]
    pub fn uses_absolute_form(&self, scheme: Scheme) -> bool {
        self.proxy.is_some() && scheme == Scheme::Http
    }

    /// Open a connection to `key` and return its request sender.
    pub async fn connect(&self, key: &PoolKey) -> Result<SendRequest<RequestBody>, TransportError> {
        let (dial_host, dial_port) = match &self.proxy {
            Some(proxy) => (proxy.host.as_str(), proxy.port),
            None => (key.host.as_str(), key.port),
        };

        debug!(
            host = %key.host,
            port = key.port,
            scheme = %key.scheme,
            via_proxy = self.proxy.is_some(),
            "creating new connection"
        );

        let tcp = TcpStream::connect((unbracket(dial_host), dial_port))
            .await
            .map_err(|source| TransportError::Connect {
                host: dial_host.to_owned(),
                source,
            })?;
        tcp.set_nodelay(true)?;

        let io: Box<dyn Io> = match key.scheme {
            Scheme::Http => Box::new(tcp),
            Scheme::Https => {
                let tcp = if self.proxy.is_some() {
                    tunnel(tcp, &key.host, key.port).await?
                } else {
                    tcp
                };
                let tls = self
                    .tls
                    .connect(unbracket(&key.host), tcp)
                    .await
                    .map_err(|e| TransportError::Tls(e.to_string()))?;
                Box::new(tls)
            }
        };

        let (sender, connection) = http1::handshake(TokioIo::new(io)).await?;
        let host = key.host.clone();
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!(host = %host, error = %e, "connection closed with error");
            }
        });

        Ok(sender)
    }
}

/// `[::1]` dials as `::1`.
fn unbracket(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("proxy", &self.proxy)
            .finish_non_exhaustive()
    }
}

/// Open a `CONNECT` tunnel to `host:port` over a proxy connection.
async fn tunnel(mut tcp: TcpStream, host: &str, port: u16) -> Result<TcpStream, TransportError> {
    let request = format!("CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n\r\n");
    tcp.write_all(request.as_bytes()).await?;

    let mut head = Vec::with_capacity(256);
    let mut chunk = [0u8; 256];
    loop {
        let n = tcp.read(&mut chunk).await?;
        if n == 0 {
            return Err(TransportError::Proxy(
                "proxy closed the connection during CONNECT".to_owned(),
            ));
        }
        head.extend_from_slice(&chunk[..n]);
        if head.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
        if head.len() > MAX_PROXY_RESPONSE {
            return Err(TransportError::Proxy("CONNECT response too large".to_owned()));
        }
    }

    let status_line = head
        .split(|&b| b == b'\n')
        .next()
        .map(|line| String::from_utf8_lossy(line).trim().to_owned())
        .unwrap_or_default();
    let status = status_line.split_whitespace().nth(1).unwrap_or_default();
    if status.starts_with('2') {
        Ok(tcp)
    } else {
        Err(TransportError::Proxy(format!(
            "CONNECT {host}:{port} rejected: {status_line}"
        )))
    }
}
