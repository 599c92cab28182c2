//! Multipart upload coordinator.
//!
//! A [`MultipartUploadSession`] tracks the parts uploaded under one upload id.
//! Parts may finish in any order and from any number of tasks; the session
//! only keeps the final set keyed by part number. Completion sends them in
//! ascending order. A failed part never aborts the session: the caller can
//! upload it again or call [`MultipartUploader::abort`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use bytes::Bytes;
use futures::{TryStreamExt, stream};
use parking_lot::Mutex;
use serde::Serialize;
use stowage_core::ByteSource;
use stowage_xml::Value;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

use crate::client::{Client, typed};
use crate::error::{ClientError, MultipartError};
use crate::operation::{Operation, Params};
use crate::response::{CompleteMultipartUploadOutput, InitiateMultipartUploadOutput, ListPartsOutput};

/// Highest part number the service accepts.
pub const MAX_PART_NUMBER: u32 = 10_000;

/// How a source of known length is split into parts.
///
/// Every part but the last is `part_size` bytes. The part size is at least
/// the configured minimum and grows when the source would otherwise need more
/// than `max_parts` parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartPlan {
    total: u64,
    part_size: u64,
    part_count: u32,
}

impl PartPlan {
    /// Plan the parts of a `total`-byte source.
    #[must_use]
    pub fn new(total: u64, hint: Option<u64>, min_part_size: u64, max_parts: u32) -> Self {
        let min_part_size = min_part_size.max(1);
        let max_parts = u64::from(max_parts.clamp(1, MAX_PART_NUMBER));
        let part_size = hint
            .unwrap_or(min_part_size)
            .max(min_part_size)
            .max(total.div_ceil(max_parts));
        let part_count = total.div_ceil(part_size).max(1);
        Self {
            total,
            part_size,
            part_count: u32::try_from(part_count).unwrap_or(MAX_PART_NUMBER),
        }
    }

    /// Source length.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Size of every part but the last.
    #[must_use]
    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    /// Number of parts.
    #[must_use]
    pub fn part_count(&self) -> u32 {
        self.part_count
    }

    /// Byte range of a part, numbered from 1.
    #[must_use]
    pub fn range(&self, part_number: u32) -> Range<u64> {
        let start = u64::from(part_number.saturating_sub(1)) * self.part_size;
        let end = (start + self.part_size).min(self.total);
        start.min(self.total)..end
    }

    /// `(part_number, range)` for every part in order.
    pub fn parts(self) -> impl Iterator<Item = (u32, Range<u64>)> {
        (1..=self.part_count).map(move |n| (n, self.range(n)))
    }
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Accepting parts.
    Active,
    /// Completed on the server.
    Completed,
    /// Aborted; late parts are discarded.
    Aborted,
}

impl SessionState {
    fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A part the service acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadPart {
    /// Part number, from 1.
    pub part_number: u32,
    /// Bytes uploaded.
    pub size_bytes: u64,
    /// Entity tag returned for the part, without quotes.
    pub etag: String,
}

#[derive(Debug)]
struct SessionInner {
    state: SessionState,
    parts: BTreeMap<u32, UploadPart>,
    failed: BTreeSet<u32>,
    expected_parts: Option<u32>,
}

/// One multipart upload.
#[derive(Debug)]
pub struct MultipartUploadSession {
    upload_id: String,
    bucket: String,
    key: String,
    inner: Mutex<SessionInner>,
}

impl MultipartUploadSession {
    /// Track an upload the service already initiated.
    #[must_use]
    pub fn new(
        upload_id: impl Into<String>,
        bucket: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            upload_id: upload_id.into(),
            bucket: bucket.into(),
            key: key.into(),
            inner: Mutex::new(SessionInner {
                state: SessionState::Active,
                parts: BTreeMap::new(),
                failed: BTreeSet::new(),
                expected_parts: None,
            }),
        }
    }

    /// Upload id assigned by the service.
    #[must_use]
    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    /// Target bucket.
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Target key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Acknowledged parts in part number order.
    #[must_use]
    pub fn parts(&self) -> Vec<UploadPart> {
        self.inner.lock().parts.values().cloned().collect()
    }

    /// Part numbers whose last upload failed.
    #[must_use]
    pub fn failed_parts(&self) -> Vec<u32> {
        self.inner.lock().failed.iter().copied().collect()
    }

    /// Declare how many parts the upload has.
    ///
    /// Without it, completion expects `1..=N` where `N` is the highest part
    /// number seen.
    pub fn set_expected_parts(&self, count: u32) {
        self.inner.lock().expected_parts = Some(count);
    }

    /// Part numbers in `1..=N` with no acknowledged upload.
    #[must_use]
    pub fn missing_parts(&self) -> Vec<u32> {
        let inner = self.inner.lock();
        let expected = inner
            .expected_parts
            .or_else(|| inner.parts.keys().next_back().copied())
            .unwrap_or(0);
        (1..=expected)
            .filter(|n| !inner.parts.contains_key(n))
            .collect()
    }

    fn ensure_active(&self) -> Result<(), MultipartError> {
        match self.state() {
            SessionState::Active => Ok(()),
            state => Err(MultipartError::Closed {
                upload_id: self.upload_id.clone(),
                state: state.as_str(),
            }),
        }
    }

    /// Record an acknowledged part. Returns `false` when the session no
    /// longer accepts parts.
    fn record_part(&self, part: UploadPart) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != SessionState::Active {
            return false;
        }
        inner.failed.remove(&part.part_number);
        inner.parts.insert(part.part_number, part);
        true
    }

    fn record_failure(&self, part_number: u32) {
        let mut inner = self.inner.lock();
        if inner.state == SessionState::Active {
            inner.failed.insert(part_number);
        }
    }

    /// Move from `Active` to `state`, returning the previous state.
    fn close(&self, state: SessionState) -> SessionState {
        let mut inner = self.inner.lock();
        let previous = inner.state;
        if previous == SessionState::Active {
            inner.state = state;
        }
        previous
    }
}

/// Result of [`Client::upload_large_object`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionInfo {
    /// Bucket written.
    pub bucket: String,
    /// Key written.
    pub key: String,
    /// Entity tag of the object.
    pub etag: Option<String>,
    /// Upload id, when the multipart path was taken.
    pub upload_id: Option<String>,
    /// Parts uploaded.
    pub parts: u32,
}

/// Drives multipart uploads through a [`Client`].
#[derive(Debug, Clone)]
pub struct MultipartUploader {
    client: Client,
}

impl MultipartUploader {
    /// Wrap a client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Start an upload.
    pub async fn initiate(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Arc<MultipartUploadSession>, ClientError> {
        let response = self
            .client
            .call(
                Operation::CreateMultipartUpload,
                Params::new().bucket(bucket).key(key),
                None,
            )
            .await?;
        let output: InitiateMultipartUploadOutput = typed(&response)?;
        info!(bucket, key, upload_id = %output.upload_id, "multipart upload initiated");
        Ok(Arc::new(MultipartUploadSession::new(
            output.upload_id,
            bucket,
            key,
        )))
    }

    /// Upload one part. A part that exhausts its retries is recorded as
    /// failed and blocks completion until uploaded again.
    pub async fn upload_part(
        &self,
        session: &MultipartUploadSession,
        part_number: u32,
        body: impl Into<ByteSource>,
    ) -> Result<UploadPart, ClientError> {
        if !(1..=MAX_PART_NUMBER).contains(&part_number) {
            return Err(MultipartError::InvalidPartNumber(part_number).into());
        }
        session.ensure_active()?;

        let body = body.into();
        let size_bytes = body.content_length().unwrap_or(0);
        let params = Params::new()
            .bucket(session.bucket())
            .key(session.key())
            .query("partNumber", part_number.to_string())
            .query("uploadId", session.upload_id())
            .body(body);

        let response = match self.client.call(Operation::UploadPart, params, None).await {
            Ok(response) => response,
            Err(err) => {
                warn!(
                    upload_id = session.upload_id(),
                    part_number,
                    attempts = err.attempts(),
                    error = %err,
                    "part upload failed"
                );
                session.record_failure(part_number);
                return Err(MultipartError::Part {
                    upload_id: session.upload_id().to_owned(),
                    part_number,
                    source: Box::new(err),
                }
                .into());
            }
        };

        let Some(etag) = response.etag() else {
            session.record_failure(part_number);
            return Err(MultipartError::MissingETag(part_number).into());
        };
        let part = UploadPart {
            part_number,
            size_bytes,
            etag: etag.to_owned(),
        };
        if !session.record_part(part.clone()) {
            debug!(
                upload_id = session.upload_id(),
                part_number,
                "discarding part that finished after the session closed"
            );
            session.ensure_active()?;
        }
        debug!(upload_id = session.upload_id(), part_number, size_bytes, "part uploaded");
        Ok(part)
    }

    /// Complete the upload.
    ///
    /// Fails before any request is sent when a part number in `1..=N` is
    /// missing or a part's last upload failed.
    pub async fn complete(
        &self,
        session: &MultipartUploadSession,
    ) -> Result<CompleteMultipartUploadOutput, ClientError> {
        session.ensure_active()?;
        let parts = session.parts();
        if parts.is_empty() {
            return Err(MultipartError::NoParts(session.upload_id().to_owned()).into());
        }
        let missing = session.missing_parts();
        if !missing.is_empty() {
            return Err(MultipartError::PartSequence {
                upload_id: session.upload_id().to_owned(),
                missing,
            }
            .into());
        }
        let failed = session.failed_parts();
        if !failed.is_empty() {
            return Err(MultipartError::FailedParts {
                upload_id: session.upload_id().to_owned(),
                failed,
            }
            .into());
        }

        let body = Value::Map(BTreeMap::from([(
            "Part".to_owned(),
            Value::List(
                parts
                    .iter()
                    .map(|part| {
                        Value::Map(BTreeMap::from([
                            (
                                "PartNumber".to_owned(),
                                Value::Integer(i64::from(part.part_number)),
                            ),
                            ("ETag".to_owned(), Value::from(part.etag.as_str())),
                        ]))
                    })
                    .collect(),
            ),
        )]));
        let params = Params::new()
            .bucket(session.bucket())
            .key(session.key())
            .query("uploadId", session.upload_id())
            .xml(body);
        let response = self
            .client
            .call(Operation::CompleteMultipartUpload, params, None)
            .await?;
        let output: CompleteMultipartUploadOutput = typed(&response)?;
        session.close(SessionState::Completed);
        info!(
            upload_id = session.upload_id(),
            parts = parts.len(),
            "multipart upload completed"
        );
        Ok(output)
    }

    /// Abort the upload. Safe to call more than once and while parts are in
    /// flight; parts that finish afterwards are discarded.
    pub async fn abort(&self, session: &MultipartUploadSession) -> Result<(), ClientError> {
        match session.close(SessionState::Aborted) {
            SessionState::Active | SessionState::Aborted => {}
            SessionState::Completed => {
                return Err(MultipartError::Closed {
                    upload_id: session.upload_id().to_owned(),
                    state: SessionState::Completed.as_str(),
                }
                .into());
            }
        }

        let params = Params::new()
            .bucket(session.bucket())
            .key(session.key())
            .query("uploadId", session.upload_id());
        match self
            .client
            .call(Operation::AbortMultipartUpload, params, None)
            .await
        {
            Ok(_) => {}
            Err(err) if err.code() == Some("NoSuchUpload") => {
                debug!(upload_id = session.upload_id(), "upload already gone");
            }
            Err(err) => return Err(err),
        }
        info!(upload_id = session.upload_id(), "multipart upload aborted");
        Ok(())
    }

    /// Parts the service has recorded for the upload.
    pub async fn list_parts(
        &self,
        session: &MultipartUploadSession,
    ) -> Result<ListPartsOutput, ClientError> {
        let params = Params::new()
            .bucket(session.bucket())
            .key(session.key())
            .query("uploadId", session.upload_id());
        let response = self.client.call(Operation::ListParts, params, None).await?;
        typed(&response)
    }
}

impl Client {
    /// A multipart uploader sharing this client.
    #[must_use]
    pub fn multipart(&self) -> MultipartUploader {
        MultipartUploader::new(self.clone())
    }

    /// Upload `length` bytes read from `reader`.
    ///
    /// Sources below the multipart threshold go up in a single `PutObject`.
    /// Larger sources are split per [`PartPlan`] and uploaded with up to
    /// `multipart_concurrency` parts in flight. On failure the session is left
    /// open; abort it with the upload id carried by the error.
    pub async fn upload_large_object<R>(
        &self,
        bucket: &str,
        key: &str,
        mut reader: R,
        length: u64,
        part_size_hint: Option<u64>,
    ) -> Result<CompletionInfo, ClientError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let config = &self.inner.config;
        if length < config.multipart_threshold {
            let mut data = Vec::with_capacity(usize::try_from(length).unwrap_or_default());
            (&mut reader)
                .take(length)
                .read_to_end(&mut data)
                .await
                .map_err(MultipartError::from)?;
            let response = self.put_object(bucket, key, data).await?;
            return Ok(CompletionInfo {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
                etag: response.etag().map(str::to_owned),
                upload_id: None,
                parts: 1,
            });
        }

        let plan = PartPlan::new(
            length,
            part_size_hint,
            config.multipart_min_part_size,
            config.multipart_max_parts,
        );
        let uploader = self.multipart();
        let session = uploader.initiate(bucket, key).await?;
        session.set_expected_parts(plan.part_count());
        info!(
            upload_id = session.upload_id(),
            parts = plan.part_count(),
            part_size = plan.part_size(),
            "uploading parts"
        );

        let reads = stream::try_unfold((reader, plan.parts()), |(mut reader, mut parts)| async move {
            let Some((number, range)) = parts.next() else {
                return Ok(None);
            };
            let len = usize::try_from(range.end - range.start).map_err(std::io::Error::other)?;
            let mut buf = vec![0; len];
            reader.read_exact(&mut buf).await?;
            Ok::<_, std::io::Error>(Some(((number, Bytes::from(buf)), (reader, parts))))
        });
        let uploaded: Vec<UploadPart> = reads
            .map_err(|e| ClientError::from(MultipartError::Source(e)))
            .map_ok(|(number, data)| {
                let uploader = &uploader;
                let session = &session;
                async move { uploader.upload_part(session, number, data).await }
            })
            .try_buffer_unordered(config.multipart_concurrency.max(1))
            .try_collect()
            .await
            .inspect_err(|err| {
                warn!(
                    upload_id = session.upload_id(),
                    error = %err,
                    "multipart upload failed, session left open"
                );
            })?;

        let output = uploader.complete(&session).await?;
        Ok(CompletionInfo {
            bucket: bucket.to_owned(),
            key: key.to_owned(),
            etag: output.etag,
            upload_id: Some(session.upload_id().to_owned()),
            parts: u32::try_from(uploaded.len()).unwrap_or(u32::MAX),
        })
    }
}
