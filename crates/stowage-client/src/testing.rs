//! Scripted in-memory transport for pipeline tests.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use futures::StreamExt;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use parking_lot::Mutex;
use stowage_core::{ByteSource, SignedRequest};
use stowage_http::{RawResponse, ResponseBody, Timeouts, Transport, TransportError};

use crate::client::Client;
use crate::clock::FixedClock;
use crate::config::ClientConfig;

/// Static credentials and millisecond backoff.
pub(crate) fn test_config() -> ClientConfig {
    ClientConfig::builder()
        .access_key_id("AKIDEXAMPLE".to_owned())
        .secret_access_key("secret".to_owned())
        .retry_base_delay_ms(1)
        .retry_max_delay_ms(4)
        .build()
}

/// A client over `transport` signing at 2024-01-01T00:00:00Z.
pub(crate) fn client(transport: Arc<ScriptedTransport>) -> Client {
    client_with(test_config(), transport)
}

pub(crate) fn client_with(config: ClientConfig, transport: Arc<ScriptedTransport>) -> Client {
    let epoch = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or_default();
    Client::builder(config)
        .with_transport(transport)
        .with_clock(Arc::new(FixedClock(epoch)))
        .build()
        .unwrap()
}

/// What the transport saw for one send.
#[derive(Debug, Clone)]
pub(crate) struct Recorded {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn query(&self, name: &str) -> Option<String> {
        let (_, query) = self.url.split_once('?')?;
        query.split('&').find_map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (k == name).then(|| v.to_owned())
        })
    }
}

/// One scripted outcome.
pub(crate) enum Reply {
    Response {
        status: u16,
        headers: Vec<(&'static str, String)>,
        body: Bytes,
    },
    Error(TransportError),
}

impl Reply {
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::status(200, body)
    }

    pub fn status(status: u16, body: impl Into<Bytes>) -> Self {
        Self::Response {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn error_xml(status: u16, code: &str) -> Self {
        Self::status(
            status,
            format!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Error><Code>{code}</Code>\
                 <Message>scripted</Message><RequestId>REQ-{status}</RequestId></Error>"
            ),
        )
    }

    pub fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        if let Self::Response { headers, .. } = &mut self {
            headers.push((name, value.into()));
        }
        self
    }
}

type Handler = Box<dyn Fn(&Recorded) -> Reply + Send + Sync>;

/// Replies from a queue first, then from the handler.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    queue: Mutex<VecDeque<Reply>>,
    handler: Option<Handler>,
    sent: Mutex<Vec<Recorded>>,
}

impl fmt::Debug for ScriptedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedTransport")
            .field("queued", &self.queue.lock().len())
            .field("sent", &self.sent.lock().len())
            .finish_non_exhaustive()
    }
}

impl ScriptedTransport {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            queue: Mutex::new(replies.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn with_handler(handler: impl Fn(&Recorded) -> Reply + Send + Sync + 'static) -> Self {
        Self {
            handler: Some(Box::new(handler)),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<Recorded> {
        self.sent.lock().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        signed: SignedRequest,
        _timeouts: &Timeouts,
    ) -> Result<RawResponse, TransportError> {
        let mut request = signed.request;
        let body = match std::mem::take(&mut request.body) {
            ByteSource::Empty => Bytes::new(),
            ByteSource::Bytes(data) => data,
            ByteSource::Stream {
                stream: Some(mut stream),
                ..
            } => {
                let mut data = Vec::new();
                while let Some(chunk) = stream.next().await {
                    data.extend_from_slice(&chunk?);
                }
                Bytes::from(data)
            }
            ByteSource::Stream { stream: None, .. } => return Err(TransportError::BodyConsumed),
        };
        let recorded = Recorded {
            method: request.method.clone(),
            url: request.url(),
            headers: request.headers.clone(),
            body,
        };

        let reply = self.queue.lock().pop_front();
        let reply = match (reply, &self.handler) {
            (Some(reply), _) => reply,
            (None, Some(handler)) => handler(&recorded),
            (None, None) => Reply::Error(TransportError::Io(std::io::Error::other(
                "no scripted reply left",
            ))),
        };
        self.sent.lock().push(recorded);

        match reply {
            Reply::Response {
                status,
                headers,
                body,
            } => {
                let mut map = HeaderMap::new();
                for (name, value) in headers {
                    if let Ok(value) = HeaderValue::from_str(&value) {
                        map.insert(HeaderName::from_static(name), value);
                    }
                }
                let status =
                    StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                Ok(RawResponse::new(status, map, ResponseBody::from_bytes(body)))
            }
            Reply::Error(err) => Err(err),
        }
    }
}
