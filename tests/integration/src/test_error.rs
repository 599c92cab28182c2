//! Error mapping integration tests.

#[cfg(test)]
mod tests {
    use stowage_client::{Client, ClientConfig, ClientError};

    use crate::{cleanup_bucket, client, create_test_bucket, test_bucket_name, test_config};

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_return_no_such_bucket_on_put() {
        let client = client();
        let bucket = test_bucket_name("ghost");

        let err = client
            .put_object(&bucket, "file.txt", "data")
            .await
            .expect_err("put to nonexistent bucket should fail");

        assert!(matches!(err, ClientError::ClientFault { .. }));
        assert_eq!(err.code(), Some("NoSuchBucket"));
        assert_eq!(err.attempts(), 1, "client faults are not retried");
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_return_no_such_key_on_get() {
        let client = client();
        let bucket = create_test_bucket(&client, "nokey").await;

        let err = client
            .get_object(&bucket, "nonexistent.txt")
            .await
            .expect_err("get nonexistent key should fail");
        assert_eq!(err.code(), Some("NoSuchKey"));

        cleanup_bucket(&client, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_fail_on_unreachable_endpoint() {
        let config = ClientConfig {
            endpoint: Some("http://127.0.0.1:1".to_owned()),
            max_retries: 1,
            retry_base_delay_ms: 1,
            ..test_config()
        };
        let client = Client::new(config).expect("client");

        let err = client.list_buckets().await.expect_err("nothing listens on port 1");
        assert!(matches!(err, ClientError::Transport { .. }));
    }
}
