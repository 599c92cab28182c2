//! Call results and typed outputs.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::{HeaderMap, StatusCode};
use stowage_xml::Value;

use crate::error::ParseError;

/// Decoded response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    /// No body.
    Empty,
    /// Parsed XML document root.
    Xml(Value),
    /// Parsed JSON document.
    Json(serde_json::Value),
    /// Raw bytes.
    Blob(Bytes),
}

/// Result of a successful call.
#[derive(Debug, Clone)]
pub struct Response {
    /// HTTP status.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Decoded body.
    pub output: Output,
    /// Attempts the call took.
    pub attempts: u32,
}

impl Response {
    /// Get a header as a string.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The `ETag` header without surrounding quotes.
    #[must_use]
    pub fn etag(&self) -> Option<&str> {
        self.header("etag").map(|v| v.trim_matches('"'))
    }

    /// The parsed XML root, if any.
    #[must_use]
    pub fn xml(&self) -> Option<&Value> {
        match &self.output {
            Output::Xml(value) => Some(value),
            _ => None,
        }
    }

    /// Raw body bytes, if the body was kept as a blob.
    #[must_use]
    pub fn bytes(&self) -> Option<&Bytes> {
        match &self.output {
            Output::Blob(data) => Some(data),
            _ => None,
        }
    }

    /// Convert the XML output into a typed output.
    pub fn parse<T: FromValue>(&self) -> Result<T, ParseError> {
        match &self.output {
            Output::Xml(value) => T::from_value(value),
            other => Err(ParseError::Shape(format!("expected an XML body, got {other:?}"))),
        }
    }
}

/// Conversion from a parsed XML value into a typed output.
pub trait FromValue: Sized {
    /// Build `Self` from the document root.
    fn from_value(value: &Value) -> Result<Self, ParseError>;
}

fn required<'a>(value: &'a Value, key: &str) -> Result<&'a str, ParseError> {
    value
        .text(key)
        .ok_or_else(|| ParseError::Shape(format!("missing element {key}")))
}

fn optional(value: &Value, key: &str) -> Option<String> {
    value.text(key).map(str::to_owned)
}

fn integer(value: &Value, key: &str) -> Option<i64> {
    value.get(key).and_then(Value::as_i64)
}

fn timestamp(value: &Value, key: &str) -> Option<DateTime<Utc>> {
    value.get(key).and_then(Value::as_timestamp)
}

fn flag(value: &Value, key: &str) -> bool {
    value.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn strip_quotes(etag: &str) -> String {
    etag.trim_matches('"').to_owned()
}

/// Owner of a bucket or object.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Owner {
    /// Canonical user id.
    pub id: Option<String>,
    /// Display name.
    pub display_name: Option<String>,
}

impl Owner {
    fn from_parent(value: &Value) -> Option<Self> {
        value.get("Owner").map(|owner| Self {
            id: optional(owner, "ID"),
            display_name: optional(owner, "DisplayName"),
        })
    }
}

/// One bucket of a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketSummary {
    /// Bucket name.
    pub name: String,
    /// Creation time.
    pub creation_date: Option<DateTime<Utc>>,
}

/// `ListBuckets` result.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ListBucketsOutput {
    /// Account owner.
    pub owner: Option<Owner>,
    /// Buckets in the order returned.
    pub buckets: Vec<BucketSummary>,
}

impl FromValue for ListBucketsOutput {
    fn from_value(value: &Value) -> Result<Self, ParseError> {
        let buckets = value
            .list("Buckets")
            .iter()
            .map(|bucket| {
                Ok(BucketSummary {
                    name: required(bucket, "Name")?.to_owned(),
                    creation_date: timestamp(bucket, "CreationDate"),
                })
            })
            .collect::<Result<_, ParseError>>()?;
        Ok(Self {
            owner: Owner::from_parent(value),
            buckets,
        })
    }
}

/// One object of a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    /// Object key.
    pub key: String,
    /// Last modification time.
    pub last_modified: Option<DateTime<Utc>>,
    /// Entity tag without quotes.
    pub etag: Option<String>,
    /// Size in bytes.
    pub size: i64,
    /// Storage class.
    pub storage_class: Option<String>,
    /// Owner, when requested.
    pub owner: Option<Owner>,
}

/// `ListObjects` result.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ListObjectsOutput {
    /// Bucket name.
    pub name: String,
    /// Prefix filter.
    pub prefix: Option<String>,
    /// Marker the listing started after.
    pub marker: Option<String>,
    /// Marker for the next page.
    pub next_marker: Option<String>,
    /// Delimiter.
    pub delimiter: Option<String>,
    /// Page size.
    pub max_keys: Option<i64>,
    /// Whether more keys follow.
    pub is_truncated: bool,
    /// Objects in key order.
    pub contents: Vec<ObjectSummary>,
    /// Rolled-up prefixes when a delimiter was given.
    pub common_prefixes: Vec<String>,
}

impl ListObjectsOutput {
    /// Marker to continue the listing with, if it was truncated.
    #[must_use]
    pub fn continuation_marker(&self) -> Option<&str> {
        if !self.is_truncated {
            return None;
        }
        self.next_marker
            .as_deref()
            .or_else(|| self.contents.last().map(|o| o.key.as_str()))
    }
}

impl FromValue for ListObjectsOutput {
    fn from_value(value: &Value) -> Result<Self, ParseError> {
        let contents = value
            .list("Contents")
            .iter()
            .map(|object| {
                Ok(ObjectSummary {
                    key: required(object, "Key")?.to_owned(),
                    last_modified: timestamp(object, "LastModified"),
                    etag: object.text("ETag").map(strip_quotes),
                    size: integer(object, "Size").unwrap_or(0),
                    storage_class: optional(object, "StorageClass"),
                    owner: Owner::from_parent(object),
                })
            })
            .collect::<Result<_, ParseError>>()?;
        Ok(Self {
            name: optional(value, "Name").unwrap_or_default(),
            prefix: optional(value, "Prefix").filter(|p| !p.is_empty()),
            marker: optional(value, "Marker").filter(|m| !m.is_empty()),
            next_marker: optional(value, "NextMarker"),
            delimiter: optional(value, "Delimiter"),
            max_keys: integer(value, "MaxKeys"),
            is_truncated: flag(value, "IsTruncated"),
            contents,
            common_prefixes: value
                .list("CommonPrefixes")
                .iter()
                .filter_map(|p| optional(p, "Prefix"))
                .collect(),
        })
    }
}

/// `CreateMultipartUpload` result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiateMultipartUploadOutput {
    /// Bucket name.
    pub bucket: String,
    /// Object key.
    pub key: String,
    /// Upload id for the session.
    pub upload_id: String,
}

impl FromValue for InitiateMultipartUploadOutput {
    fn from_value(value: &Value) -> Result<Self, ParseError> {
        Ok(Self {
            bucket: required(value, "Bucket")?.to_owned(),
            key: required(value, "Key")?.to_owned(),
            upload_id: required(value, "UploadId")?.to_owned(),
        })
    }
}

/// `CompleteMultipartUpload` result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteMultipartUploadOutput {
    /// URL of the assembled object.
    pub location: Option<String>,
    /// Bucket name.
    pub bucket: String,
    /// Object key.
    pub key: String,
    /// Entity tag of the assembled object, without quotes.
    pub etag: Option<String>,
}

impl FromValue for CompleteMultipartUploadOutput {
    fn from_value(value: &Value) -> Result<Self, ParseError> {
        Ok(Self {
            location: optional(value, "Location"),
            bucket: required(value, "Bucket")?.to_owned(),
            key: required(value, "Key")?.to_owned(),
            etag: value.text("ETag").map(strip_quotes),
        })
    }
}

/// One uploaded part reported by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartSummary {
    /// Part number.
    pub part_number: u32,
    /// Entity tag without quotes.
    pub etag: String,
    /// Size in bytes.
    pub size: i64,
    /// Upload time.
    pub last_modified: Option<DateTime<Utc>>,
}

/// `ListParts` result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListPartsOutput {
    /// Bucket name.
    pub bucket: String,
    /// Object key.
    pub key: String,
    /// Upload id.
    pub upload_id: String,
    /// Parts in part number order.
    pub parts: Vec<PartSummary>,
    /// Whether more parts follow.
    pub is_truncated: bool,
    /// Marker for the next page.
    pub next_part_number_marker: Option<i64>,
}

impl FromValue for ListPartsOutput {
    fn from_value(value: &Value) -> Result<Self, ParseError> {
        let parts = value
            .list("Part")
            .iter()
            .map(|part| {
                let number = integer(part, "PartNumber")
                    .and_then(|n| u32::try_from(n).ok())
                    .ok_or_else(|| ParseError::Shape("part without a valid PartNumber".to_owned()))?;
                Ok(PartSummary {
                    part_number: number,
                    etag: strip_quotes(required(part, "ETag")?),
                    size: integer(part, "Size").unwrap_or(0),
                    last_modified: timestamp(part, "LastModified"),
                })
            })
            .collect::<Result<_, ParseError>>()?;
        Ok(Self {
            bucket: required(value, "Bucket")?.to_owned(),
            key: required(value, "Key")?.to_owned(),
            upload_id: required(value, "UploadId")?.to_owned(),
            parts,
            is_truncated: flag(value, "IsTruncated"),
            next_part_number_marker: integer(value, "NextPartNumberMarker"),
        })
    }
}

/// One in-progress upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSummary {
    /// Object key.
    pub key: String,
    /// Upload id.
    pub upload_id: String,
    /// When the upload was initiated.
    pub initiated: Option<DateTime<Utc>>,
}

/// `ListMultipartUploads` result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListMultipartUploadsOutput {
    /// Bucket name.
    pub bucket: String,
    /// In-progress uploads.
    pub uploads: Vec<UploadSummary>,
    /// Whether more uploads follow.
    pub is_truncated: bool,
    /// Key marker for the next page.
    pub next_key_marker: Option<String>,
    /// Upload id marker for the next page.
    pub next_upload_id_marker: Option<String>,
}

impl FromValue for ListMultipartUploadsOutput {
    fn from_value(value: &Value) -> Result<Self, ParseError> {
        let uploads = value
            .list("Upload")
            .iter()
            .map(|upload| {
                Ok(UploadSummary {
                    key: required(upload, "Key")?.to_owned(),
                    upload_id: required(upload, "UploadId")?.to_owned(),
                    initiated: timestamp(upload, "Initiated"),
                })
            })
            .collect::<Result<_, ParseError>>()?;
        Ok(Self {
            bucket: optional(value, "Bucket").unwrap_or_default(),
            uploads,
            is_truncated: flag(value, "IsTruncated"),
            next_key_marker: optional(value, "NextKeyMarker"),
            next_upload_id_marker: optional(value, "NextUploadIdMarker"),
        })
    }
}

/// `GetBucketLocation` result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketLocationOutput {
    /// Region constraint; `None` for the default region.
    pub location_constraint: Option<String>,
}

impl FromValue for BucketLocationOutput {
    fn from_value(value: &Value) -> Result<Self, ParseError> {
        let constraint = match value {
            Value::Text(text) => Some(text.trim().to_owned()),
            other => optional(other, "LocationConstraint"),
        };
        Ok(Self {
            location_constraint: constraint.filter(|c| !c.is_empty()),
        })
    }
}

/// Grantee of an ACL grant.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Grantee {
    /// Canonical user id.
    pub id: Option<String>,
    /// Display name.
    pub display_name: Option<String>,
    /// Group URI.
    pub uri: Option<String>,
    /// E-mail address.
    pub email_address: Option<String>,
}

/// One ACL grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    /// Who is granted.
    pub grantee: Grantee,
    /// Permission such as `READ` or `FULL_CONTROL`.
    pub permission: String,
}

/// `GetBucketAcl` result.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AccessControlPolicyOutput {
    /// Bucket owner.
    pub owner: Option<Owner>,
    /// Grants in document order.
    pub grants: Vec<Grant>,
}

impl FromValue for AccessControlPolicyOutput {
    fn from_value(value: &Value) -> Result<Self, ParseError> {
        let grants = value
            .list("AccessControlList")
            .iter()
            .map(|grant| {
                let grantee = grant.get("Grantee").map_or_else(Grantee::default, |g| Grantee {
                    id: optional(g, "ID"),
                    display_name: optional(g, "DisplayName"),
                    uri: optional(g, "URI"),
                    email_address: optional(g, "EmailAddress"),
                });
                Ok(Grant {
                    grantee,
                    permission: required(grant, "Permission")?.to_owned(),
                })
            })
            .collect::<Result<_, ParseError>>()?;
        Ok(Self {
            owner: Owner::from_parent(value),
            grants,
        })
    }
}

/// `CopyObject` result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyObjectOutput {
    /// Entity tag of the copy, without quotes.
    pub etag: Option<String>,
    /// Modification time of the copy.
    pub last_modified: Option<DateTime<Utc>>,
}

impl FromValue for CopyObjectOutput {
    fn from_value(value: &Value) -> Result<Self, ParseError> {
        Ok(Self {
            etag: value.text("ETag").map(strip_quotes),
            last_modified: timestamp(value, "LastModified"),
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use stowage_xml::parse;

    use super::*;
    use crate::shapes;

    fn xml_response(value: Value) -> Response {
        Response {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            output: Output::Xml(value),
            attempts: 1,
        }
    }

    #[test]
    fn test_should_parse_list_buckets_output() {
        let body = br#"<?xml version="1.0" encoding="UTF-8"?>
<ListAllMyBucketsResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Owner><ID>abc</ID><DisplayName>owner</DisplayName></Owner>
  <Buckets>
    <Bucket><Name>alpha</Name><CreationDate>2024-01-01T00:00:00.000Z</CreationDate></Bucket>
    <Bucket><Name>beta</Name><CreationDate>2024-02-01T00:00:00.000Z</CreationDate></Bucket>
  </Buckets>
</ListAllMyBucketsResult>"#;
        let doc = parse(body, &shapes::LIST_BUCKETS).unwrap();
        let output: ListBucketsOutput = xml_response(doc.value).parse().unwrap();

        assert_eq!(output.owner.unwrap().display_name.as_deref(), Some("owner"));
        let names: Vec<_> = output.buckets.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, ["alpha", "beta"]);
        assert_eq!(
            output.buckets[0].creation_date,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_should_parse_empty_bucket_listing() {
        let body = b"<ListAllMyBucketsResult><Buckets/></ListAllMyBucketsResult>";
        let doc = parse(body, &shapes::LIST_BUCKETS).unwrap();
        let output = ListBucketsOutput::from_value(&doc.value).unwrap();
        assert!(output.buckets.is_empty());
    }

    #[test]
    fn test_should_parse_truncated_object_listing() {
        let body = br#"<ListBucketResult>
  <Name>photos</Name><Prefix></Prefix><Marker></Marker><MaxKeys>2</MaxKeys>
  <IsTruncated>true</IsTruncated>
  <Contents><Key>a.jpg</Key><ETag>"e1"</ETag><Size>10</Size><StorageClass>STANDARD</StorageClass></Contents>
  <Contents><Key>b.jpg</Key><ETag>"e2"</ETag><Size>20</Size></Contents>
  <CommonPrefixes><Prefix>2024/</Prefix></CommonPrefixes>
</ListBucketResult>"#;
        let doc = parse(body, &shapes::LIST_OBJECTS).unwrap();
        let output = ListObjectsOutput::from_value(&doc.value).unwrap();

        assert_eq!(output.name, "photos");
        assert!(output.prefix.is_none());
        assert_eq!(output.max_keys, Some(2));
        assert_eq!(output.contents.len(), 2);
        assert_eq!(output.contents[0].etag.as_deref(), Some("e1"));
        assert_eq!(output.contents[1].size, 20);
        assert_eq!(output.common_prefixes, ["2024/"]);
        assert_eq!(output.continuation_marker(), Some("b.jpg"));
    }

    #[test]
    fn test_should_parse_list_parts_in_order() {
        let body = br#"<ListPartsResult>
  <Bucket>b</Bucket><Key>k</Key><UploadId>u1</UploadId><IsTruncated>false</IsTruncated>
  <Part><PartNumber>1</PartNumber><ETag>"p1"</ETag><Size>5242880</Size></Part>
  <Part><PartNumber>2</PartNumber><ETag>"p2"</ETag><Size>1</Size></Part>
</ListPartsResult>"#;
        let doc = parse(body, &shapes::LIST_PARTS).unwrap();
        let output = ListPartsOutput::from_value(&doc.value).unwrap();
        let numbers: Vec<_> = output.parts.iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, [1, 2]);
        assert_eq!(output.parts[1].etag, "p2");
    }

    #[test]
    fn test_should_parse_bucket_location() {
        let doc = parse(
            b"<LocationConstraint>eu-west-1</LocationConstraint>",
            &shapes::LOCATION,
        )
        .unwrap();
        let output = BucketLocationOutput::from_value(&doc.value).unwrap();
        assert_eq!(output.location_constraint.as_deref(), Some("eu-west-1"));

        let doc = parse(b"<LocationConstraint/>", &shapes::LOCATION).unwrap();
        let output = BucketLocationOutput::from_value(&doc.value).unwrap();
        assert!(output.location_constraint.is_none());
    }

    #[test]
    fn test_should_parse_access_control_policy() {
        let body = br#"<AccessControlPolicy>
  <Owner><ID>o1</ID></Owner>
  <AccessControlList>
    <Grant><Grantee xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xsi:type="CanonicalUser"><ID>o1</ID></Grantee><Permission>FULL_CONTROL</Permission></Grant>
    <Grant><Grantee><URI>http://acs.amazonaws.com/groups/global/AllUsers</URI></Grantee><Permission>READ</Permission></Grant>
  </AccessControlList>
</AccessControlPolicy>"#;
        let doc = parse(body, &shapes::ACCESS_CONTROL_POLICY).unwrap();
        let output = AccessControlPolicyOutput::from_value(&doc.value).unwrap();
        assert_eq!(output.grants.len(), 2);
        assert_eq!(output.grants[0].permission, "FULL_CONTROL");
        assert!(output.grants[1].grantee.uri.is_some());
    }

    #[test]
    fn test_should_report_missing_required_element() {
        let doc = parse(b"<InitiateMultipartUploadResult><Bucket>b</Bucket></InitiateMultipartUploadResult>", &shapes::INITIATE_MULTIPART).unwrap();
        let err = InitiateMultipartUploadOutput::from_value(&doc.value).unwrap_err();
        assert!(matches!(err, ParseError::Shape(msg) if msg.contains("Key")));
    }

    #[test]
    fn test_should_reject_typed_parse_of_blob() {
        let response = Response {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            output: Output::Blob(Bytes::from_static(b"data")),
            attempts: 1,
        };
        assert!(response.parse::<CopyObjectOutput>().is_err());
        assert_eq!(response.bytes().map(|b| &b[..]), Some(&b"data"[..]));
    }
}
