//! Multipart upload integration tests.

#[cfg(test)]
mod tests {
    use stowage_client::{Client, ClientError, MultipartError, SessionState};

    use crate::{cleanup_bucket, client, create_test_bucket, test_config};

    const MIB: usize = 1024 * 1024;

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_complete_multipart_upload() {
        let client = client();
        let bucket = create_test_bucket(&client, "mpu").await;
        let uploader = client.multipart();

        let session = uploader.initiate(&bucket, "multipart.bin").await.expect("initiate");

        // Upload out of order; completion still lists parts ascending.
        let part1 = vec![0xAAu8; 5 * MIB];
        let part2 = vec![0xBBu8; 1024];
        uploader.upload_part(&session, 2, part2.clone()).await.expect("part 2");
        uploader.upload_part(&session, 1, part1.clone()).await.expect("part 1");

        let complete = uploader.complete(&session).await.expect("complete");
        assert!(complete.etag.is_some(), "completed upload should have etag");
        assert_eq!(session.state(), SessionState::Completed);

        let body = client.get_object(&bucket, "multipart.bin").await.expect("get_object");
        assert_eq!(body.len(), part1.len() + part2.len());
        assert_eq!(&body[..part1.len()], &part1[..]);

        cleanup_bucket(&client, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_abort_multipart_upload_twice() {
        let client = client();
        let bucket = create_test_bucket(&client, "abort").await;
        let uploader = client.multipart();

        let session = uploader.initiate(&bucket, "aborted.bin").await.expect("initiate");
        uploader.upload_part(&session, 1, vec![1u8; 1024]).await.expect("part 1");

        uploader.abort(&session).await.expect("abort");
        uploader.abort(&session).await.expect("second abort is a no-op");

        let err = uploader
            .upload_part(&session, 2, vec![2u8; 1024])
            .await
            .expect_err("aborted session accepts no parts");
        assert!(matches!(err, ClientError::Multipart(MultipartError::Closed { .. })));

        cleanup_bucket(&client, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_upload_large_object_in_parts() {
        let config = stowage_client::ClientConfig {
            multipart_threshold: 6 * MIB as u64,
            multipart_concurrency: 3,
            ..test_config()
        };
        let client = Client::new(config).expect("client");
        let bucket = create_test_bucket(&client, "large").await;

        let data: Vec<u8> = (0..16 * MIB).map(|i| (i % 251) as u8).collect();
        let info = client
            .upload_large_object(&bucket, "large.bin", &data[..], data.len() as u64, None)
            .await
            .expect("upload_large_object");
        assert_eq!(info.parts, 4);
        assert!(info.upload_id.is_some());

        let body = client.get_object(&bucket, "large.bin").await.expect("get_object");
        assert_eq!(&body[..], &data[..]);

        cleanup_bucket(&client, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_put_small_object_in_one_request() {
        let client = client();
        let bucket = create_test_bucket(&client, "small").await;

        let data = b"small enough for a single put".to_vec();
        let info = client
            .upload_large_object(&bucket, "small.txt", &data[..], data.len() as u64, None)
            .await
            .expect("upload_large_object");
        assert!(info.upload_id.is_none());
        assert_eq!(info.parts, 1);

        cleanup_bucket(&client, &bucket).await;
    }
}
