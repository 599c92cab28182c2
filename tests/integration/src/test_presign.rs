//! Presigned URL integration tests.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use stowage_client::PostOptions;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    use crate::{cleanup_bucket, client, create_test_bucket};

    /// Plain-HTTP GET of `url`, returning the raw response.
    async fn fetch(url: &str) -> String {
        let rest = url.strip_prefix("http://").expect("plain http endpoint");
        let (authority, path) = rest.split_at(rest.find('/').unwrap_or(rest.len()));
        let mut stream = TcpStream::connect(authority).await.expect("connect");
        let request =
            format!("GET {path} HTTP/1.1\r\nHost: {authority}\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.expect("write");
        let mut response = String::new();
        stream.read_to_string(&mut response).await.expect("read");
        response
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_fetch_object_through_presigned_url() {
        let client = client();
        let bucket = create_test_bucket(&client, "presign").await;
        client
            .put_object(&bucket, "shared.txt", "shared body")
            .await
            .expect("put_object");

        let url = client
            .presigned_url(http::Method::GET, &bucket, "shared.txt", Duration::from_secs(300))
            .expect("presigned_url");
        let response = fetch(&url).await;

        assert!(response.starts_with("HTTP/1.1 200"), "got {response}");
        assert!(response.ends_with("shared body"));

        cleanup_bucket(&client, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_build_post_form_for_bucket() {
        let client = client();
        let bucket = create_test_bucket(&client, "post").await;

        let post = client
            .presigned_post_info(&bucket, None, &PostOptions::default())
            .expect("presigned_post_info");
        assert!(post.url.ends_with(&format!("/{bucket}")));
        assert_eq!(post.field("key"), Some("${filename}"));

        let token = client
            .presigned_post_token(&bucket, None, &PostOptions::default())
            .expect("presigned_post_token");
        assert_eq!(token.split(':').count(), 4);

        cleanup_bucket(&client, &bucket).await;
    }
}
