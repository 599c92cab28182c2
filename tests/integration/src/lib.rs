//! Integration tests for the Stowage client.
//!
//! These tests require a running S3-compatible server, `localhost:4566` by
//! default. They are marked `#[ignore]` so they don't run during normal
//! `cargo test`.
//!
//! Run them with:
//! ```text
//! S3_ENDPOINT_URL=http://localhost:9000 cargo test -p stowage-integration -- --ignored
//! ```

use std::sync::Once;

use stowage_client::{Client, ClientConfig};

static INIT: Once = Once::new();

/// Initialize tracing (once).
fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

/// Endpoint URL for the server.
fn endpoint_url() -> String {
    std::env::var("S3_ENDPOINT_URL").unwrap_or_else(|_| "http://localhost:4566".to_owned())
}

/// Configuration pointing at the local server with path-style addressing.
#[must_use]
pub fn test_config() -> ClientConfig {
    ClientConfig::builder()
        .access_key_id("test".to_owned())
        .secret_access_key("test".to_owned())
        .endpoint(Some(endpoint_url()))
        .force_path_style(true)
        .multipart_threshold(8 * 1024 * 1024)
        .build()
}

/// Create a client pointing at the local server.
#[must_use]
pub fn client() -> Client {
    init_tracing();
    Client::new(test_config()).unwrap_or_else(|e| panic!("failed to build client: {e}"))
}

/// Generate a unique bucket name for a test.
#[must_use]
pub fn test_bucket_name(prefix: &str) -> String {
    let id = uuid::Uuid::new_v4().to_string()[..8].to_owned();
    format!("test-{prefix}-{id}")
}

/// Create a bucket and return its name. Caller is responsible for cleanup.
pub async fn create_test_bucket(client: &Client, prefix: &str) -> String {
    let name = test_bucket_name(prefix);
    client
        .create_bucket(&name)
        .await
        .unwrap_or_else(|e| panic!("failed to create bucket {name}: {e}"));
    name
}

/// Delete all objects in a bucket, then delete the bucket.
pub async fn cleanup_bucket(client: &Client, bucket: &str) {
    let mut marker: Option<String> = None;
    loop {
        let Ok(page) = client.list_objects(bucket, None, marker.as_deref()).await else {
            return; // Bucket may not exist.
        };
        for object in &page.contents {
            let _ = client.delete_object(bucket, &object.key).await;
        }
        if !page.is_truncated {
            break;
        }
        marker = page
            .next_marker
            .or_else(|| page.contents.last().map(|o| o.key.clone()));
        if marker.is_none() {
            break;
        }
    }
    let _ = client.delete_bucket(bucket).await;
}

mod test_bucket;
mod test_error;
mod test_multipart;
mod test_object;
mod test_presign;
