//! Bucket integration tests.

#[cfg(test)]
mod tests {
    use crate::{cleanup_bucket, client, create_test_bucket, test_bucket_name};

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_create_and_delete_bucket() {
        let client = client();
        let bucket = create_test_bucket(&client, "create").await;

        assert!(client.bucket_exists(&bucket).await.expect("head bucket"));

        cleanup_bucket(&client, &bucket).await;

        assert!(!client.bucket_exists(&bucket).await.expect("head bucket"));
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_list_buckets() {
        let client = client();
        let b1 = create_test_bucket(&client, "list1").await;
        let b2 = create_test_bucket(&client, "list2").await;

        let listing = client.list_buckets().await.expect("list_buckets");
        let names: Vec<&str> = listing.buckets.iter().map(|b| b.name.as_str()).collect();

        assert!(names.contains(&b1.as_str()), "should contain {b1}");
        assert!(names.contains(&b2.as_str()), "should contain {b2}");

        cleanup_bucket(&client, &b1).await;
        cleanup_bucket(&client, &b2).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_get_bucket_location() {
        let client = client();
        let bucket = create_test_bucket(&client, "location").await;

        // us-east-1 comes back empty or as the region name depending on the server.
        let location = client.bucket_location(&bucket).await.expect("bucket location");
        assert!(location.location_constraint.as_deref().is_none_or(|l| l.is_empty() || l == "us-east-1"));

        cleanup_bucket(&client, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_report_missing_bucket_as_absent() {
        let client = client();
        let bucket = test_bucket_name("absent");
        assert!(!client.bucket_exists(&bucket).await.expect("head bucket"));
    }
}
