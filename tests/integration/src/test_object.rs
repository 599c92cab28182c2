//! Object integration tests.

#[cfg(test)]
mod tests {
    use stowage_client::{Operation, Params};

    use crate::{cleanup_bucket, client, create_test_bucket};

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_put_and_get_object() {
        let client = client();
        let bucket = create_test_bucket(&client, "object").await;

        client
            .put_object(&bucket, "dir/hello world.txt", "hello, stowage")
            .await
            .expect("put_object");
        let body = client
            .get_object(&bucket, "dir/hello world.txt")
            .await
            .expect("get_object");
        assert_eq!(&body[..], b"hello, stowage");

        cleanup_bucket(&client, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_list_objects_by_prefix() {
        let client = client();
        let bucket = create_test_bucket(&client, "list").await;

        for key in ["logs/a.txt", "logs/b.txt", "data/c.txt"] {
            client.put_object(&bucket, key, "x").await.expect("put_object");
        }

        let listing = client
            .list_objects(&bucket, Some("logs/"), None)
            .await
            .expect("list_objects");
        let keys: Vec<&str> = listing.contents.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, ["logs/a.txt", "logs/b.txt"]);

        cleanup_bucket(&client, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_copy_object() {
        let client = client();
        let bucket = create_test_bucket(&client, "copy").await;

        client.put_object(&bucket, "src.txt", "copied").await.expect("put_object");
        let copy = client
            .copy_object(&bucket, "src.txt", &bucket, "dst.txt")
            .await
            .expect("copy_object");
        assert!(copy.etag.is_some());
        let body = client.get_object(&bucket, "dst.txt").await.expect("get_object");
        assert_eq!(&body[..], b"copied");

        cleanup_bucket(&client, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_delete_object() {
        let client = client();
        let bucket = create_test_bucket(&client, "delete").await;

        client.put_object(&bucket, "gone.txt", "x").await.expect("put_object");
        client.delete_object(&bucket, "gone.txt").await.expect("delete_object");
        assert!(client.get_object(&bucket, "gone.txt").await.is_err());

        cleanup_bucket(&client, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_reuse_connections_across_calls() {
        let client = client();
        let bucket = create_test_bucket(&client, "reuse").await;

        for i in 0..20 {
            let key = format!("k{i}");
            client.put_object(&bucket, &key, "x").await.expect("put_object");
            let head = client
                .call(Operation::HeadObject, Params::new().bucket(&bucket).key(&key), None)
                .await
                .expect("head object");
            assert_eq!(head.attempts, 1);
        }

        cleanup_bucket(&client, &bucket).await;
    }
}
