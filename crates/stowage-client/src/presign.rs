//! Browser upload forms signed ahead of time.
//!
//! A [`PresignedPost`] carries the target URL plus the form fields a browser
//! submits with the file. [`Client::presigned_post_token`] packs the same
//! signature into one opaque string for clients that fill in the form
//! themselves.

use std::collections::BTreeMap;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use http::Method;
use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Serialize, Serializer};
use stowage_auth::presigned::FILENAME_PLACEHOLDER;
use stowage_auth::{PostPolicy, sign_post_policy};
use stowage_core::Endpoints;
use tracing::debug;
use typed_builder::TypedBuilder;

use crate::build::{Endpoint, build_request};
use crate::client::Client;
use crate::error::ClientError;
use crate::operation::{Operation, Params};

/// Form field carrying the URL notified after an upload.
pub const CALLBACK_URL_FIELD: &str = "callback-url";
/// Form field carrying the callback body template.
pub const CALLBACK_BODY_FIELD: &str = "callback-body";
/// Form field carrying the callback content type.
pub const CALLBACK_BODY_TYPE_FIELD: &str = "callback-body-type";

/// Conditions baked into a presigned POST policy.
#[derive(Debug, Clone, TypedBuilder)]
pub struct PostOptions {
    /// Lifetime of the policy.
    #[builder(default = Duration::from_secs(3600))]
    pub expires: Duration,

    /// Canned ACL the upload must carry.
    #[builder(default, setter(strip_option, into))]
    pub acl: Option<String>,

    /// Inclusive upload size bounds in bytes.
    #[builder(default, setter(strip_option))]
    pub content_length_range: Option<(u64, u64)>,

    /// URL the service notifies after a successful upload.
    #[builder(default, setter(strip_option, into))]
    pub callback_url: Option<String>,

    /// Body template of the callback.
    #[builder(default, setter(strip_option, into))]
    pub callback_body: Option<String>,

    /// Content type of the callback body.
    #[builder(default, setter(strip_option, into))]
    pub callback_body_type: Option<String>,

    /// User metadata, without the `x-amz-meta-` prefix.
    #[builder(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Default for PostOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// A signed upload form.
///
/// Serializes as `{"url": ..., "form": {...}}` with fields in form order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignedPost {
    /// Where the form is posted.
    pub url: String,
    /// Form fields, in submission order.
    pub fields: Vec<(String, String)>,
}

impl PresignedPost {
    /// Value of a form field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

struct Form<'a>(&'a [(String, String)]);

impl Serialize for Form<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl Serialize for PresignedPost {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("PresignedPost", 2)?;
        state.serialize_field("url", &self.url)?;
        state.serialize_field("form", &Form(&self.fields))?;
        state.end()
    }
}

impl Client {
    /// Sign an upload form for `bucket`.
    ///
    /// `key` defaults to `${filename}`, which the browser replaces with the
    /// name of the chosen file. No request is sent.
    pub fn presigned_post_info(
        &self,
        bucket: &str,
        key: Option<&str>,
        options: &PostOptions,
    ) -> Result<PresignedPost, ClientError> {
        let key = key.unwrap_or(FILENAME_PLACEHOLDER);
        let lifetime = chrono::Duration::from_std(options.expires)
            .map_err(|e| ClientError::InvalidRequest(format!("post policy lifetime: {e}")))?;
        let expiration = self.inner.clock.now() + lifetime;

        let mut extra = Vec::new();
        if let Some(acl) = &options.acl {
            extra.push(("acl".to_owned(), acl.clone()));
        }
        for (name, value) in [
            (CALLBACK_URL_FIELD, &options.callback_url),
            (CALLBACK_BODY_FIELD, &options.callback_body),
            (CALLBACK_BODY_TYPE_FIELD, &options.callback_body_type),
        ] {
            if let Some(value) = value {
                extra.push((name.to_owned(), value.clone()));
            }
        }
        for (name, value) in &options.metadata {
            extra.push((format!("x-amz-meta-{name}"), value.clone()));
        }

        let mut policy = PostPolicy::new(expiration).bucket(bucket).key(key);
        for (name, value) in &extra {
            policy = policy.field(name.clone(), value.clone());
        }
        if let Some((min, max)) = options.content_length_range {
            policy = policy.content_length_range(min, max);
        }

        let credentials = self.inner.credentials.credentials();
        let signed = sign_post_policy(&policy, &credentials)
            .map_err(|source| ClientError::Signing { source, attempts: 0 })?;

        let mut fields = vec![
            ("AWSAccessKeyId".to_owned(), signed.access_key_id),
            ("key".to_owned(), key.to_owned()),
            ("bucket".to_owned(), bucket.to_owned()),
            ("policy".to_owned(), signed.policy),
            ("signature".to_owned(), signed.signature),
        ];
        fields.extend(extra);
        if let Some(token) = signed.session_token {
            fields.push(("x-amz-security-token".to_owned(), token));
        }

        let url = self.post_url(bucket)?;
        debug!(bucket, key, url = %url, "presigned POST");
        Ok(PresignedPost { url, fields })
    }

    /// Pack a presigned POST into `access_key:signature:policy:base64(bucket)`.
    pub fn presigned_post_token(
        &self,
        bucket: &str,
        key: Option<&str>,
        options: &PostOptions,
    ) -> Result<String, ClientError> {
        let post = self.presigned_post_info(bucket, key, options)?;
        let field = |name: &str| post.field(name).unwrap_or_default();
        Ok(format!(
            "{}:{}:{}:{}",
            field("AWSAccessKeyId"),
            field("signature"),
            field("policy"),
            BASE64.encode(bucket)
        ))
    }

    fn post_url(&self, bucket: &str) -> Result<String, ClientError> {
        let mut spec = Operation::HeadBucket.spec();
        spec.method = Method::POST;
        let endpoint = Endpoint::resolve(&self.inner.config, Endpoints::bundled(), spec.service)?;
        let request = build_request(
            &spec,
            Params::new().bucket(bucket),
            &endpoint,
            &self.inner.config,
        )?;
        Ok(request.url())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testing::{ScriptedTransport, client, client_with, test_config};

    fn decoded_policy(post: &PresignedPost) -> serde_json::Value {
        let raw = BASE64.decode(post.field("policy").unwrap()).unwrap();
        serde_json::from_slice(&raw).unwrap()
    }

    #[test]
    fn test_should_default_key_to_filename_placeholder() {
        let transport = Arc::new(ScriptedTransport::new([]));
        let post = client(transport.clone())
            .presigned_post_info("photos", None, &PostOptions::default())
            .unwrap();

        assert_eq!(post.url, "https://photos.s3.amazonaws.com/");
        assert_eq!(post.field("key"), Some("${filename}"));
        assert_eq!(post.field("AWSAccessKeyId"), Some("AKIDEXAMPLE"));
        let policy = decoded_policy(&post);
        assert_eq!(policy["expiration"], "2024-01-01T01:00:00.000Z");
        assert_eq!(policy["conditions"][0]["bucket"], "photos");
        assert_eq!(
            policy["conditions"][1],
            serde_json::json!(["starts-with", "$key", ""])
        );
        assert_eq!(transport.sent_count(), 0);
    }

    #[test]
    fn test_should_sign_callback_and_metadata_fields() {
        let options = PostOptions::builder()
            .expires(Duration::from_secs(864_000))
            .acl("public-read")
            .content_length_range((1, 1024))
            .callback_url("https://app.example.com/uploaded")
            .callback_body("key=${key}&size=${fsize}")
            .callback_body_type("application/x-www-form-urlencoded")
            .metadata(BTreeMap::from([("server".to_owned(), "web-1".to_owned())]))
            .build();
        let post = client(Arc::new(ScriptedTransport::new([])))
            .presigned_post_info("photos", Some("avatars/me.png"), &options)
            .unwrap();

        let names: Vec<&str> = post.fields.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            names,
            [
                "AWSAccessKeyId",
                "key",
                "bucket",
                "policy",
                "signature",
                "acl",
                "callback-url",
                "callback-body",
                "callback-body-type",
                "x-amz-meta-server",
            ]
        );

        let policy = decoded_policy(&post);
        assert_eq!(policy["expiration"], "2024-01-11T00:00:00.000Z");
        let conditions = policy["conditions"].as_array().unwrap();
        assert!(conditions.contains(&serde_json::json!({"key": "avatars/me.png"})));
        assert!(conditions.contains(&serde_json::json!({"callback-url": "https://app.example.com/uploaded"})));
        assert!(conditions.contains(&serde_json::json!({"x-amz-meta-server": "web-1"})));
        assert!(conditions.contains(&serde_json::json!(["content-length-range", 1, 1024])));
    }

    #[test]
    fn test_should_match_standalone_policy_signature() {
        let post = client(Arc::new(ScriptedTransport::new([])))
            .presigned_post_info("photos", Some("uploads/${filename}"), &PostOptions::default())
            .unwrap();
        let expected = stowage_auth::s3::hmac_sha1_base64("secret", post.field("policy").unwrap());
        assert_eq!(post.field("signature"), Some(expected.as_str()));
    }

    #[test]
    fn test_should_include_session_token_field() {
        let mut config = test_config();
        config.session_token = Some("TOKEN".to_owned());
        let post = client_with(config, Arc::new(ScriptedTransport::new([])))
            .presigned_post_info("photos", None, &PostOptions::default())
            .unwrap();
        assert_eq!(post.fields.last().unwrap().0, "x-amz-security-token");
        assert_eq!(post.field("x-amz-security-token"), Some("TOKEN"));
    }

    #[test]
    fn test_should_post_to_path_style_url() {
        let mut config = test_config();
        config.endpoint = Some("http://localhost:9000".to_owned());
        config.force_path_style = true;
        let post = client_with(config, Arc::new(ScriptedTransport::new([])))
            .presigned_post_info("photos", None, &PostOptions::default())
            .unwrap();
        assert_eq!(post.url, "http://localhost:9000/photos");
    }

    #[test]
    fn test_should_serialize_as_url_and_form() {
        let post = PresignedPost {
            url: "https://photos.s3.amazonaws.com/".to_owned(),
            fields: vec![
                ("key".to_owned(), "a".to_owned()),
                ("policy".to_owned(), "p".to_owned()),
            ],
        };
        assert_eq!(
            serde_json::to_string(&post).unwrap(),
            r#"{"url":"https://photos.s3.amazonaws.com/","form":{"key":"a","policy":"p"}}"#
        );
    }

    #[test]
    fn test_should_pack_token() {
        let c = client(Arc::new(ScriptedTransport::new([])));
        let options = PostOptions::default();
        let post = c.presigned_post_info("photos", None, &options).unwrap();
        let token = c.presigned_post_token("photos", None, &options).unwrap();

        let parts: Vec<&str> = token.split(':').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "AKIDEXAMPLE");
        assert_eq!(Some(parts[1]), post.field("signature"));
        assert_eq!(Some(parts[2]), post.field("policy"));
        assert_eq!(parts[3], "cGhvdG9z");
    }

    #[test]
    fn test_should_refuse_without_credentials() {
        let mut config = test_config();
        config.secret_access_key.clear();
        let err = client_with(config, Arc::new(ScriptedTransport::new([])))
            .presigned_post_info("photos", None, &PostOptions::default())
            .unwrap_err();
        assert!(matches!(err, ClientError::Signing { attempts: 0, .. }));
    }
}
