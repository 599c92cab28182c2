//! Request pipeline and client for S3-compatible storage.
//!
//! A call moves through BUILD (operation to draft request), SIGN (against one
//! credential snapshot, re-signed every attempt), SEND (one exchange on the
//! shared pool), PARSE (streaming XML or JSON into an [`Output`]) and RETRY
//! (bounded, with exponential backoff) before it settles into a [`Response`]
//! or a [`ClientError`].
//!
//! On top of the pipeline sit the typed convenience calls on [`Client`], the
//! [`MultipartUploader`] and presigned URLs and POST forms.
//!
//! # Modules
//!
//! - [`build`] - endpoint resolution and request addressing
//! - [`client`] - the client, its builder and the convenience calls
//! - [`config`] - client configuration
//! - [`multipart`] - multipart upload sessions and part planning
//! - [`operation`] - the operation table
//! - [`presign`] - presigned POST forms and tokens
//! - [`retry`] - fault classification and backoff
//! - [`scope`] - per-call-scope response cache

pub mod build;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod multipart;
pub mod operation;
mod pipeline;
pub mod presign;
pub mod response;
pub mod retry;
pub mod scope;
pub mod shapes;

#[cfg(test)]
mod testing;

pub use build::Endpoint;
pub use client::{Client, ClientBuilder};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{ClientConfig, DEFAULT_THROTTLING_CODES};
pub use error::{ClientError, MultipartError, ParseError, ServiceError};
pub use multipart::{
    CompletionInfo, MAX_PART_NUMBER, MultipartUploadSession, MultipartUploader, PartPlan,
    SessionState, UploadPart,
};
pub use operation::{Operation, OperationSpec, Params, Protocol, ResponseShape, Target};
pub use presign::{PostOptions, PresignedPost};
pub use response::{
    AccessControlPolicyOutput, BucketLocationOutput, BucketSummary,
    CompleteMultipartUploadOutput, CopyObjectOutput, FromValue, Grant, Grantee,
    InitiateMultipartUploadOutput, ListBucketsOutput, ListMultipartUploadsOutput,
    ListObjectsOutput, ListPartsOutput, ObjectSummary, Output, Owner, PartSummary, Response,
    UploadSummary,
};
pub use retry::{Classification, CodeListThrottle, RetryPolicy, RetryState, ThrottlePredicate};
pub use scope::{CallScope, ResponseCache};
