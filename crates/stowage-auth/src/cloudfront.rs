//! CloudFront-style signing: an HMAC-SHA1 of the `date` header.

use stowage_core::{AuthArtifact, Credentials, Request};

use crate::SigningContext;
use crate::error::SigningError;
use crate::s3::hmac_sha1_base64;

pub(crate) fn sign(
    request: &mut Request,
    credentials: &Credentials,
    context: &SigningContext,
) -> Result<AuthArtifact, SigningError> {
    let date = crate::http_date(&context.timestamp);
    let mut added = vec![("date".to_owned(), date.clone())];
    if let Some(token) = &credentials.session_token {
        added.push(("x-amz-security-token".to_owned(), token.clone()));
    }

    let authorization = format!(
        "AWS {}:{}",
        credentials.access_key_id,
        hmac_sha1_base64(&credentials.secret_access_key, &date)
    );
    added.push(("authorization".to_owned(), authorization));

    for (name, value) in &added {
        request.insert_header(name, value)?;
    }
    Ok(AuthArtifact::Headers(added))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use http::Method;
    use stowage_core::Scheme;

    use super::*;
    use crate::SigningProtocol;

    #[test]
    fn test_should_sign_date_header() {
        let mut req = Request::new(Method::GET, Scheme::Https, "cloudfront.amazonaws.com");
        let ctx = SigningContext::new(
            SigningProtocol::CloudFront,
            "cloudfront",
            "us-east-1",
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        );

        sign(&mut req, &Credentials::new("AKIDEXAMPLE", "secret"), &ctx).unwrap();

        assert_eq!(req.header("date"), Some("Mon, 01 Jan 2024 00:00:00 GMT"));
        assert_eq!(
            req.header("authorization"),
            Some("AWS AKIDEXAMPLE:t1LsQGa+av8wSLCC9AroyZdA4OY=")
        );
    }
}
