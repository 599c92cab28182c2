//! The per-call state machine.
//!
//! ```text
//! BUILD -> SIGN -> SEND -> CLASSIFY -> (RETRY -> SIGN) | PARSE -> DONE
//! ```
//!
//! One call owns its draft request and [`RetryState`]. Each attempt forks the
//! draft, signs it with a fresh timestamp and hands it to the transport. Only
//! retryable classifications loop back, and only while the budget allows and
//! the body can be replayed from the start.

use std::fmt;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use stowage_auth::SigningContext;
use stowage_core::Endpoints;
use stowage_http::{RawResponse, ResponseBody, TransportError};
use stowage_xml::StreamingParser;
use tracing::{debug, warn};

use crate::build::{Endpoint, build_request};
use crate::client::Client;
use crate::error::{ClientError, ParseError, ServiceError};
use crate::operation::{Operation, OperationSpec, Params, ResponseShape};
use crate::response::{Output, Response};
use crate::retry::{Classification, RetryPolicy, RetryState};
use crate::scope::CallScope;
use crate::shapes;

/// Why an attempt did not produce a result.
#[derive(Debug)]
enum Failure {
    Service(ServiceError),
    Transport(TransportError),
}

impl Failure {
    fn classify(&self, policy: &RetryPolicy) -> Classification {
        match self {
            Self::Service(error) => policy.classify(error),
            Self::Transport(error) if error.is_retryable() => {
                Classification::RetryableTransportFault
            }
            Self::Transport(_) => Classification::Fatal,
        }
    }

    fn into_error(self, kind: Classification, policy: &RetryPolicy, attempts: u32) -> ClientError {
        match self {
            Self::Transport(source) => ClientError::Transport { source, attempts },
            Self::Service(error) => match kind {
                Classification::Fatal => ClientError::Fatal { error, attempts },
                Classification::RetryableServerFault if policy.is_throttle(&error) => {
                    ClientError::Throttling { error, attempts }
                }
                Classification::RetryableServerFault | Classification::RetryableTransportFault => {
                    ClientError::ServerFault { error, attempts }
                }
                Classification::NonRetryableClientFault | Classification::Success => {
                    ClientError::ClientFault { error, attempts }
                }
            },
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Service(error) => error.fmt(f),
            Self::Transport(error) => error.fmt(f),
        }
    }
}

/// Failure while reading a successful response body.
enum BodyError {
    Transport(TransportError),
    Parse(ParseError),
}

impl From<TransportError> for BodyError {
    fn from(err: TransportError) -> Self {
        Self::Transport(err)
    }
}

impl From<ParseError> for BodyError {
    fn from(err: ParseError) -> Self {
        Self::Parse(err)
    }
}

impl Client {
    /// Run one storage operation.
    ///
    /// Read operations are answered from `scope`'s cache when it has one and
    /// the same call was made earlier in the scope.
    pub async fn call(
        &self,
        operation: Operation,
        params: Params,
        scope: Option<&CallScope>,
    ) -> Result<Response, ClientError> {
        self.call_spec(&operation.spec(), params, scope).await
    }

    /// Run an operation described by an arbitrary spec.
    pub async fn call_spec(
        &self,
        spec: &OperationSpec,
        params: Params,
        scope: Option<&CallScope>,
    ) -> Result<Response, ClientError> {
        let cache = scope.and_then(CallScope::cache).filter(|_| spec.cacheable);
        let cache_key = cache.and_then(|_| params.cache_key(spec.name));
        if let Some(hit) = cache
            .zip(cache_key.as_deref())
            .and_then(|(cache, key)| cache.get(key))
        {
            debug!(operation = spec.name, "serving response from call scope");
            return Ok(hit);
        }

        let config = &self.inner.config;
        let credentials = self.inner.credentials.credentials();
        let endpoint = Endpoint::resolve(config, Endpoints::bundled(), spec.service)?;
        let mut draft = build_request(spec, params, &endpoint, config)?;
        let max_retries = config
            .operation_max_retries
            .get(spec.name)
            .copied()
            .unwrap_or(self.inner.retry.max_retries);
        let mut state = RetryState::new(max_retries);

        loop {
            let attempt = state.begin_attempt();
            let Some(request) = draft.fork_attempt() else {
                return Err(ClientError::InvalidRequest(
                    "request body stream was already consumed".to_owned(),
                ));
            };

            let context = SigningContext::new(
                config.signature_version,
                spec.service,
                config.region.as_str(),
                self.inner.clock.now(),
            );
            let signed = context
                .protocol
                .sign(request, &credentials, &context)
                .map_err(|source| ClientError::Signing {
                    source,
                    attempts: attempt,
                })?;

            let failure = match self.inner.transport.send(signed, &self.inner.timeouts).await {
                Ok(raw) if raw.status.is_success() => {
                    let RawResponse {
                        status,
                        headers,
                        body,
                    } = raw;
                    match read_output(spec.response, body).await {
                        Ok(output) => {
                            debug!(
                                operation = spec.name,
                                attempt,
                                status = status.as_u16(),
                                "call succeeded"
                            );
                            let response = Response {
                                status,
                                headers,
                                output,
                                attempts: attempt,
                            };
                            if let (Some(cache), Some(key)) = (cache, cache_key) {
                                cache.insert(key, response.clone());
                            }
                            return Ok(response);
                        }
                        Err(BodyError::Parse(source)) => {
                            return Err(ClientError::Parse {
                                source,
                                attempts: attempt,
                            });
                        }
                        Err(BodyError::Transport(err)) => Failure::Transport(err),
                    }
                }
                Ok(raw) => match read_service_error(raw).await {
                    Ok(error) => Failure::Service(error),
                    Err(err) => Failure::Transport(err),
                },
                Err(err) => Failure::Transport(err),
            };

            let kind = failure.classify(&self.inner.retry);
            state.record_failure(kind);
            if !kind.is_retryable() {
                debug!(operation = spec.name, attempt, error = %failure, "call failed");
                return Err(failure.into_error(kind, &self.inner.retry, attempt));
            }
            if !state.has_budget() {
                warn!(
                    operation = spec.name,
                    attempt,
                    elapsed = ?state.total_elapsed(),
                    error = %failure,
                    "retry budget exhausted"
                );
                return Err(failure.into_error(kind, &self.inner.retry, attempt));
            }
            if !draft.body.is_rewindable() {
                warn!(
                    operation = spec.name,
                    attempt,
                    error = %failure,
                    "request body cannot be replayed, not retrying"
                );
                return Err(ClientError::NonRetryableBody {
                    attempts: attempt,
                    source: Box::new(failure.into_error(kind, &self.inner.retry, attempt)),
                });
            }

            let delay = self.inner.retry.delay_after(attempt);
            warn!(
                operation = spec.name,
                attempt,
                delay = ?delay,
                error = %failure,
                "retrying call"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

async fn read_output(shape: ResponseShape, mut body: ResponseBody) -> Result<Output, BodyError> {
    match shape {
        ResponseShape::Empty => {
            while body.next_chunk().await?.is_some() {}
            Ok(Output::Empty)
        }
        ResponseShape::Blob => Ok(Output::Blob(body.collect().await?)),
        ResponseShape::Json => {
            let data = body.collect().await?;
            if data.iter().all(u8::is_ascii_whitespace) {
                return Ok(Output::Empty);
            }
            let value = serde_json::from_slice(&data).map_err(ParseError::from)?;
            Ok(Output::Json(value))
        }
        ResponseShape::Xml(grammar) => {
            let mut parser = StreamingParser::new(grammar);
            let mut seen_markup = false;
            while let Some(chunk) = body.next_chunk().await? {
                seen_markup |= chunk.iter().any(|b| !b.is_ascii_whitespace());
                parser.feed(&chunk).map_err(ParseError::from)?;
            }
            if !seen_markup {
                return Ok(Output::Empty);
            }
            let document = parser.finish().map_err(ParseError::from)?;
            Ok(Output::Xml(document.value))
        }
    }
}

async fn read_service_error(raw: RawResponse) -> Result<ServiceError, TransportError> {
    let RawResponse {
        status,
        headers,
        body,
    } = raw;
    let data = body.collect().await?;
    Ok(decode_service_error(status, &headers, &data))
}

/// Decode an error response: an XML `Error` document, a JSON error object,
/// or nothing, in which case the code is derived from the status.
pub(crate) fn decode_service_error(
    status: StatusCode,
    headers: &HeaderMap,
    body: &Bytes,
) -> ServiceError {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    };
    let mut error = ServiceError {
        status,
        code: status_code_name(status),
        message: status.canonical_reason().unwrap_or_default().to_owned(),
        request_id: header("x-amz-request-id").or_else(|| header("x-amzn-requestid")),
    };

    let text = String::from_utf8_lossy(body);
    let trimmed = text.trim_start();
    if trimmed.starts_with('<') {
        if let Ok(document) = stowage_xml::parse(trimmed.as_bytes(), &shapes::ERROR) {
            let root = &document.value;
            let detail = root.get("Error").unwrap_or(root);
            if let Some(code) = detail.text("Code") {
                error.code = code.to_owned();
            }
            if let Some(message) = detail.text("Message") {
                error.message = message.to_owned();
            }
            if let Some(id) = detail.text("RequestId").or_else(|| root.text("RequestId")) {
                error.request_id = Some(id.to_owned());
            }
        }
    } else if trimmed.starts_with('{') {
        if let Ok(serde_json::Value::Object(object)) = serde_json::from_str(trimmed) {
            let field = |names: &[&str]| {
                names
                    .iter()
                    .find_map(|name| object.get(*name).and_then(serde_json::Value::as_str))
            };
            if let Some(code) = field(&["__type", "code", "Code"]) {
                let code = code.rsplit_once('#').map_or(code, |(_, name)| name);
                error.code = code.to_owned();
            }
            if let Some(message) = field(&["message", "Message"]) {
                error.message = message.to_owned();
            }
        }
    }
    error
}

fn status_code_name(status: StatusCode) -> String {
    match status {
        StatusCode::MOVED_PERMANENTLY => "PermanentRedirect".to_owned(),
        StatusCode::NOT_MODIFIED => "NotModified".to_owned(),
        StatusCode::BAD_REQUEST => "BadRequest".to_owned(),
        StatusCode::FORBIDDEN => "Forbidden".to_owned(),
        StatusCode::NOT_FOUND => "NotFound".to_owned(),
        StatusCode::PRECONDITION_FAILED => "PreconditionFailed".to_owned(),
        other => format!("Http{}", other.as_u16()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicI64, Ordering};

    use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
    use futures::stream;
    use stowage_core::ByteSource;

    use super::*;
    use crate::clock::Clock;
    use crate::testing::{Reply, ScriptedTransport, client, client_with, test_config};

    fn reset() -> TransportError {
        TransportError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        ))
    }

    #[tokio::test]
    async fn test_should_make_exactly_max_retries_plus_one_attempts() {
        let transport = Arc::new(ScriptedTransport::with_handler(|_| Reply::Error(reset())));
        let client = client(transport.clone());

        let err = client
            .call(Operation::ListBuckets, Params::new(), None)
            .await
            .unwrap_err();

        assert_eq!(transport.sent_count(), 4);
        assert_eq!(err.attempts(), 4);
        assert!(matches!(err, ClientError::Transport { source: TransportError::Io(_), .. }));
    }

    #[tokio::test]
    async fn test_should_report_last_fault_when_budget_runs_out() {
        let transport = Arc::new(ScriptedTransport::new([
            Reply::Error(reset()),
            Reply::error_xml(500, "InternalError"),
            Reply::error_xml(503, "SlowDown"),
        ]));
        let mut config = test_config();
        config.max_retries = 2;
        let client = client_with(config, transport.clone());

        let err = client
            .call(Operation::ListBuckets, Params::new(), None)
            .await
            .unwrap_err();

        assert_eq!(transport.sent_count(), 3);
        assert!(matches!(err, ClientError::Throttling { attempts: 3, .. }));
        assert_eq!(err.code(), Some("SlowDown"));
    }

    #[tokio::test]
    async fn test_should_apply_per_operation_retry_override() {
        let transport = Arc::new(ScriptedTransport::with_handler(|_| {
            Reply::error_xml(500, "InternalError")
        }));
        let mut config = test_config();
        config.operation_max_retries.insert("ListBuckets".to_owned(), 0);
        let client = client_with(config, transport.clone());

        let err = client
            .call(Operation::ListBuckets, Params::new(), None)
            .await
            .unwrap_err();
        assert_eq!(transport.sent_count(), 1);
        assert!(matches!(err, ClientError::ServerFault { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn test_should_recover_after_transient_fault() {
        let transport = Arc::new(ScriptedTransport::new([
            Reply::error_xml(503, "ServiceUnavailable"),
            Reply::ok(""),
        ]));
        let client = client(transport.clone());

        let response = client
            .call(Operation::DeleteBucket, Params::new().bucket("photos"), None)
            .await
            .unwrap();
        assert_eq!(response.attempts, 2);
        assert_eq!(response.output, Output::Empty);
    }

    #[tokio::test]
    async fn test_should_not_retry_client_faults() {
        let transport = Arc::new(ScriptedTransport::new([Reply::error_xml(404, "NoSuchBucket")]));
        let client = client(transport.clone());

        let err = client
            .call(Operation::ListObjects, Params::new().bucket("nope"), None)
            .await
            .unwrap_err();
        assert_eq!(transport.sent_count(), 1);
        match err {
            ClientError::ClientFault { error, attempts } => {
                assert_eq!(attempts, 1);
                assert_eq!(error.code, "NoSuchBucket");
                assert_eq!(error.status, StatusCode::NOT_FOUND);
                assert_eq!(error.request_id.as_deref(), Some("REQ-404"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_should_not_retry_signature_rejection() {
        let transport = Arc::new(ScriptedTransport::with_handler(|_| {
            Reply::error_xml(403, "SignatureDoesNotMatch")
        }));
        let client = client(transport.clone());

        let err = client
            .call(Operation::ListBuckets, Params::new(), None)
            .await
            .unwrap_err();
        assert_eq!(transport.sent_count(), 1);
        assert!(matches!(err, ClientError::Fatal { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn test_should_fail_fast_on_single_pass_body() {
        let transport = Arc::new(ScriptedTransport::with_handler(|_| Reply::Error(reset())));
        let client = client(transport.clone());

        let chunks = stream::iter([Ok(Bytes::from_static(b"part-one")), Ok(Bytes::from_static(b"-two"))]);
        let params = Params::new()
            .bucket("photos")
            .key("stream.bin")
            .body(ByteSource::from_stream(chunks, Some(12)));
        let err = client.call(Operation::PutObject, params, None).await.unwrap_err();

        match &err {
            ClientError::NonRetryableBody { attempts, source } => {
                assert_eq!(*attempts, 1);
                assert!(matches!(**source, ClientError::Transport { attempts: 1, .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(transport.sent_count(), 1);
        assert_eq!(&transport.sent()[0].body[..], b"part-one-two");
    }

    #[tokio::test]
    async fn test_should_keep_cause_when_single_pass_body_cannot_be_retried() {
        let transport = Arc::new(ScriptedTransport::new([
            Reply::error_xml(503, "SlowDown"),
            Reply::error_xml(500, "InternalError"),
        ]));
        let client = client(transport.clone());

        let mut errors = Vec::new();
        for _ in 0..2 {
            let chunks = stream::iter([Ok(Bytes::from_static(b"data"))]);
            let params = Params::new()
                .bucket("photos")
                .key("stream.bin")
                .body(ByteSource::from_stream(chunks, Some(4)));
            errors.push(client.call(Operation::PutObject, params, None).await.unwrap_err());
        }

        let ClientError::NonRetryableBody { source, .. } = &errors[0] else {
            panic!("unexpected error: {:?}", errors[0]);
        };
        assert!(matches!(**source, ClientError::Throttling { .. }));
        assert_eq!(errors[0].code(), Some("SlowDown"));

        let ClientError::NonRetryableBody { source, .. } = &errors[1] else {
            panic!("unexpected error: {:?}", errors[1]);
        };
        assert!(matches!(**source, ClientError::ServerFault { .. }));
        assert_eq!(errors[1].code(), Some("InternalError"));
        assert!(std::error::Error::source(&errors[1]).is_some());
        assert_eq!(transport.sent_count(), 2);
    }

    #[tokio::test]
    async fn test_should_reject_already_consumed_body() {
        let transport = Arc::new(ScriptedTransport::new(Vec::<Reply>::new()));
        let client = client(transport.clone());

        let mut body = ByteSource::from_stream(stream::iter([Ok(Bytes::from_static(b"x"))]), Some(1));
        let _spent = body.take_for_attempt();
        let params = Params::new().bucket("photos").key("spent.bin").body(body);
        let err = client.call(Operation::PutObject, params, None).await.unwrap_err();

        assert!(matches!(err, ClientError::InvalidRequest(_)));
        assert_eq!(transport.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_should_replay_buffered_body_on_retry() {
        let transport = Arc::new(ScriptedTransport::new([Reply::Error(reset()), Reply::ok("")]));
        let client = client(transport.clone());

        client.put_object("photos", "a.txt", "payload").await.unwrap();
        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].body, sent[1].body);
    }

    #[derive(Debug)]
    struct SteppingClock {
        start: DateTime<Utc>,
        ticks: AtomicI64,
    }

    impl Clock for SteppingClock {
        fn now(&self) -> DateTime<Utc> {
            self.start + ChronoDuration::seconds(self.ticks.fetch_add(1, Ordering::SeqCst))
        }
    }

    #[tokio::test]
    async fn test_should_resign_each_attempt_with_fresh_timestamp() {
        let transport = Arc::new(ScriptedTransport::new([Reply::Error(reset()), Reply::ok("")]));
        let client = Client::builder(test_config())
            .with_transport(transport.clone())
            .with_clock(Arc::new(SteppingClock {
                start: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                ticks: AtomicI64::new(0),
            }))
            .build()
            .unwrap();

        client
            .call(Operation::DeleteObject, Params::new().bucket("photos").key("k"), None)
            .await
            .unwrap();

        let sent = transport.sent();
        assert_eq!(sent[0].header("x-amz-date"), Some("20240101T000000Z"));
        assert_eq!(sent[1].header("x-amz-date"), Some("20240101T000001Z"));
        assert_ne!(sent[0].header("authorization"), sent[1].header("authorization"));
    }

    #[tokio::test]
    async fn test_should_sign_deterministically_with_fixed_clock() {
        let transport = Arc::new(ScriptedTransport::new([Reply::ok(""), Reply::ok("")]));
        let client = client(transport.clone());

        for _ in 0..2 {
            client
                .call(Operation::HeadObject, Params::new().bucket("photos").key("k"), None)
                .await
                .unwrap();
        }
        let sent = transport.sent();
        assert_eq!(sent[0].header("authorization"), sent[1].header("authorization"));
    }

    #[tokio::test]
    async fn test_should_serve_cacheable_calls_from_scope() {
        let transport = Arc::new(ScriptedTransport::with_handler(|_| Reply::ok("")));
        let client = client(transport.clone());
        let scope = CallScope::with_cache();

        for _ in 0..3 {
            client
                .call(Operation::HeadBucket, Params::new().bucket("photos"), Some(&scope))
                .await
                .unwrap();
        }
        assert_eq!(transport.sent_count(), 1);

        client
            .call(Operation::HeadBucket, Params::new().bucket("other"), Some(&scope))
            .await
            .unwrap();
        client
            .call(Operation::HeadBucket, Params::new().bucket("photos"), Some(&CallScope::new()))
            .await
            .unwrap();
        client
            .call(Operation::DeleteBucket, Params::new().bucket("photos"), Some(&scope))
            .await
            .unwrap();
        client
            .call(Operation::DeleteBucket, Params::new().bucket("photos"), Some(&scope))
            .await
            .unwrap();
        assert_eq!(transport.sent_count(), 5);
    }

    #[tokio::test]
    async fn test_should_surface_parse_errors_without_retry() {
        let transport = Arc::new(ScriptedTransport::new([Reply::ok(
            "<ListBucketResult><Name>b</Name><MaxKeys>many</MaxKeys></ListBucketResult>",
        )]));
        let client = client(transport.clone());

        let err = client
            .call(Operation::ListObjects, Params::new().bucket("b1b"), None)
            .await
            .unwrap_err();
        assert_eq!(transport.sent_count(), 1);
        match err {
            ClientError::Parse {
                source: ParseError::Xml(xml),
                attempts,
            } => {
                assert_eq!(attempts, 1);
                assert!(xml.path().is_some_and(|p| p.contains("MaxKeys")));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_should_parse_xml_success_body() {
        let transport = Arc::new(ScriptedTransport::new([Reply::ok(
            "<ListBucketResult><Name>b1b</Name><IsTruncated>true</IsTruncated>\
             <Contents><Key>a</Key><Size>3</Size></Contents>\
             <Contents><Key>b</Key><Size>4</Size></Contents></ListBucketResult>",
        )]));
        let client = client(transport.clone());

        let output = client.list_objects("b1b", Some("pre/"), None).await.unwrap();
        assert!(output.is_truncated);
        assert_eq!(output.contents.len(), 2);
        assert_eq!(output.continuation_marker(), Some("b"));
        assert_eq!(transport.sent()[0].query("prefix").as_deref(), Some("pre%2F"));
    }

    #[tokio::test]
    async fn test_should_run_json_rpc_spec() {
        let transport = Arc::new(ScriptedTransport::new([
            Reply::status(400, r#"{"__type":"com.amazonaws.sqs#ThrottlingException","message":"slow"}"#),
            Reply::ok(r#"{"QueueUrls":["q1"]}"#),
        ]));
        let client = client(transport.clone());
        let spec = OperationSpec::json_rpc("ListQueues", "AmazonSQS", "1.0").service("sqs");

        let response = client.call_spec(&spec, Params::new(), None).await.unwrap();
        assert_eq!(response.attempts, 2);
        assert_eq!(
            response.output,
            Output::Json(serde_json::json!({"QueueUrls": ["q1"]}))
        );
        let sent = transport.sent();
        assert_eq!(sent[0].url, "https://sqs.us-east-1.amazonaws.com/");
        assert_eq!(sent[0].header("x-amz-target"), Some("AmazonSQS.ListQueues"));
        assert!(sent[0].header("authorization").unwrap().contains("/us-east-1/sqs/aws4_request"));
    }

    #[test]
    fn test_should_derive_error_code_from_status() {
        let error = decode_service_error(StatusCode::NOT_FOUND, &HeaderMap::new(), &Bytes::new());
        assert_eq!(error.code, "NotFound");
        assert_eq!(error.message, "Not Found");

        let error = decode_service_error(StatusCode::BAD_GATEWAY, &HeaderMap::new(), &Bytes::new());
        assert_eq!(error.code, "Http502");
    }

    #[test]
    fn test_should_decode_nested_error_response() {
        let body = Bytes::from_static(
            b"<ErrorResponse><Error><Code>Throttling</Code><Message>Rate exceeded</Message></Error>\
              <RequestId>r-1</RequestId></ErrorResponse>",
        );
        let error = decode_service_error(StatusCode::BAD_REQUEST, &HeaderMap::new(), &body);
        assert_eq!(error.code, "Throttling");
        assert_eq!(error.message, "Rate exceeded");
        assert_eq!(error.request_id.as_deref(), Some("r-1"));
    }
}
