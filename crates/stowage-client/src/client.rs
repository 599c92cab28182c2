//! The storage client and its convenience calls.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{Method, StatusCode};
use stowage_auth::{SigningContext, SigningProtocol, presign_url};
use stowage_core::{ByteSource, CredentialProvider, Endpoints, StaticCredentialProvider};
use stowage_http::{HttpTransport, Timeouts, Transport};
use stowage_xml::Value;
use tracing::debug;

use crate::build::{Endpoint, build_request};
use crate::clock::{Clock, SystemClock};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::operation::{Operation, Params};
use crate::response::{
    AccessControlPolicyOutput, BucketLocationOutput, CopyObjectOutput, FromValue,
    ListBucketsOutput, ListObjectsOutput, Response,
};
use crate::retry::RetryPolicy;

/// Client for an S3-compatible storage service.
///
/// Cheap to clone; clones share the connection pool.
///
/// ```no_run
/// # async fn example() -> Result<(), stowage_client::ClientError> {
/// use stowage_client::{Client, ClientConfig};
///
/// let client = Client::new(ClientConfig::from_env())?;
/// for bucket in client.list_buckets().await?.buckets {
///     println!("{}", bucket.name);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Client {
    pub(crate) inner: Arc<ClientInner>,
}

#[derive(Debug)]
pub(crate) struct ClientInner {
    pub(crate) config: ClientConfig,
    pub(crate) credentials: Arc<dyn CredentialProvider>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) retry: RetryPolicy,
    pub(crate) timeouts: Timeouts,
}

impl Client {
    /// Create a client over the pooled HTTP transport.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        ClientBuilder::new(config).build()
    }

    /// Start a builder for injecting collaborators.
    #[must_use]
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    /// The configuration snapshot the client was built with.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// The retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.inner.retry
    }

    /// List all buckets owned by the caller.
    pub async fn list_buckets(&self) -> Result<ListBucketsOutput, ClientError> {
        let response = self.call(Operation::ListBuckets, Params::new(), None).await?;
        typed(&response)
    }

    /// Create a bucket in the configured region.
    pub async fn create_bucket(&self, bucket: &str) -> Result<Response, ClientError> {
        let mut params = Params::new().bucket(bucket);
        if self.inner.config.region != stowage_core::Region::DEFAULT {
            let body: Value = [(
                "LocationConstraint",
                Value::from(self.inner.config.region.as_str()),
            )]
            .into_iter()
            .collect();
            params = params.xml(body);
        }
        self.call(Operation::CreateBucket, params, None).await
    }

    /// Delete an empty bucket.
    pub async fn delete_bucket(&self, bucket: &str) -> Result<Response, ClientError> {
        self.call(Operation::DeleteBucket, Params::new().bucket(bucket), None)
            .await
    }

    /// Whether the bucket exists and is reachable with these credentials.
    pub async fn bucket_exists(&self, bucket: &str) -> Result<bool, ClientError> {
        match self
            .call(Operation::HeadBucket, Params::new().bucket(bucket), None)
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if err.service_error().is_some_and(|e| e.status == StatusCode::NOT_FOUND) => {
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Region constraint of a bucket.
    pub async fn bucket_location(&self, bucket: &str) -> Result<BucketLocationOutput, ClientError> {
        let response = self
            .call(Operation::GetBucketLocation, Params::new().bucket(bucket), None)
            .await?;
        match &response.output {
            crate::response::Output::Empty => Ok(BucketLocationOutput {
                location_constraint: None,
            }),
            _ => typed(&response),
        }
    }

    /// Access control policy of a bucket.
    pub async fn bucket_acl(&self, bucket: &str) -> Result<AccessControlPolicyOutput, ClientError> {
        let response = self
            .call(Operation::GetBucketAcl, Params::new().bucket(bucket), None)
            .await?;
        typed(&response)
    }

    /// One page of object listings.
    pub async fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        marker: Option<&str>,
    ) -> Result<ListObjectsOutput, ClientError> {
        let params = Params::new()
            .bucket(bucket)
            .query_opt("marker", marker)
            .query_opt("prefix", prefix);
        let response = self.call(Operation::ListObjects, params, None).await?;
        typed(&response)
    }

    /// Upload an object in a single request.
    pub async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: impl Into<ByteSource>,
    ) -> Result<Response, ClientError> {
        let params = Params::new().bucket(bucket).key(key).body(body);
        self.call(Operation::PutObject, params, None).await
    }

    /// Download an object.
    pub async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, ClientError> {
        let response = self
            .call(Operation::GetObject, Params::new().bucket(bucket).key(key), None)
            .await?;
        Ok(response.bytes().cloned().unwrap_or_default())
    }

    /// Delete an object.
    pub async fn delete_object(&self, bucket: &str, key: &str) -> Result<Response, ClientError> {
        self.call(Operation::DeleteObject, Params::new().bucket(bucket).key(key), None)
            .await
    }

    /// Copy an object server side.
    pub async fn copy_object(
        &self,
        source_bucket: &str,
        source_key: &str,
        bucket: &str,
        key: &str,
    ) -> Result<CopyObjectOutput, ClientError> {
        let source = format!(
            "/{source_bucket}/{}",
            stowage_core::uri_encode_path(source_key)
        );
        let params = Params::new()
            .bucket(bucket)
            .key(key)
            .header("x-amz-copy-source", source);
        let response = self.call(Operation::CopyObject, params, None).await?;
        typed(&response)
    }

    /// A v4 presigned URL granting `method` on an object until it expires.
    pub fn presigned_url(
        &self,
        method: Method,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, ClientError> {
        let mut spec = Operation::GetObject.spec();
        spec.method = method;
        let endpoint = Endpoint::resolve(&self.inner.config, Endpoints::bundled(), spec.service)?;
        let request = build_request(
            &spec,
            Params::new().bucket(bucket).key(key),
            &endpoint,
            &self.inner.config,
        )?;
        let context = SigningContext::new(
            SigningProtocol::V4,
            spec.service,
            self.inner.config.region.as_str(),
            self.inner.clock.now(),
        );
        let credentials = self.inner.credentials.credentials();
        let signed = presign_url(request, &credentials, &context, expires_in)
            .map_err(|source| ClientError::Signing {
                source,
                attempts: 0,
            })?;
        debug!(bucket, key, expires_in = ?expires_in, "presigned URL");
        Ok(signed.request.url())
    }
}

pub(crate) fn typed<T: FromValue>(response: &Response) -> Result<T, ClientError> {
    response.parse().map_err(|source| ClientError::Parse {
        source,
        attempts: response.attempts,
    })
}

/// Builder for a [`Client`] with injected collaborators.
#[derive(Debug)]
pub struct ClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    clock: Option<Arc<dyn Clock>>,
    retry: Option<RetryPolicy>,
}

impl ClientBuilder {
    /// Start from a configuration.
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            transport: None,
            credentials: None,
            clock: None,
            retry: None,
        }
    }

    /// Use a custom transport instead of the pooled HTTP transport.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use a credential provider instead of the configured static keys.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Use a custom signing clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use a custom retry policy instead of one derived from the configuration.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<Client, ClientError> {
        let config = self.config;
        if config.multipart_concurrency == 0 {
            return Err(ClientError::Config(
                "multipart concurrency must be at least 1".to_owned(),
            ));
        }
        if config.multipart_max_parts == 0 {
            return Err(ClientError::Config(
                "multipart part limit must be at least 1".to_owned(),
            ));
        }

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(
                HttpTransport::new(&config.transport_config())
                    .map_err(|e| ClientError::Config(e.to_string()))?,
            ),
        };
        let credentials = self.credentials.unwrap_or_else(|| {
            Arc::new(StaticCredentialProvider::new(config.credentials()))
        });
        let retry = self.retry.unwrap_or_else(|| RetryPolicy::from_config(&config));
        let timeouts = config.timeouts();

        debug!(
            region = %config.region,
            endpoint = config.endpoint.as_deref().unwrap_or("(table)"),
            signature_version = %config.signature_version,
            max_retries = retry.max_retries,
            "client created"
        );
        Ok(Client {
            inner: Arc::new(ClientInner {
                config,
                credentials,
                transport,
                clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
                retry,
                timeouts,
            }),
        })
    }
}
