//! Grammars of the XML documents the storage service exchanges.

use std::sync::LazyLock;

use stowage_xml::{ElementRule, Grammar};

fn owner() -> ElementRule {
    ElementRule::structure(
        Grammar::new()
            .element("ID", ElementRule::text())
            .element("DisplayName", ElementRule::text()),
    )
}

/// `ListAllMyBucketsResult`.
pub static LIST_BUCKETS: LazyLock<Grammar> = LazyLock::new(|| {
    Grammar::new().element("Owner", owner()).element(
        "Buckets",
        ElementRule::wrapper(
            "Bucket",
            ElementRule::structure(
                Grammar::new()
                    .element("Name", ElementRule::text())
                    .element("CreationDate", ElementRule::timestamp()),
            ),
        ),
    )
});

/// `ListBucketResult`.
pub static LIST_OBJECTS: LazyLock<Grammar> = LazyLock::new(|| {
    Grammar::new()
        .element("Name", ElementRule::text())
        .element("Prefix", ElementRule::text())
        .element("Marker", ElementRule::text())
        .element("NextMarker", ElementRule::text())
        .element("Delimiter", ElementRule::text())
        .element("MaxKeys", ElementRule::integer())
        .element("IsTruncated", ElementRule::boolean())
        .element(
            "Contents",
            ElementRule::structure(
                Grammar::new()
                    .element("Key", ElementRule::text())
                    .element("LastModified", ElementRule::timestamp())
                    .element("ETag", ElementRule::text())
                    .element("Size", ElementRule::integer())
                    .element("StorageClass", ElementRule::text())
                    .element("Owner", owner()),
            )
            .list(),
        )
        .element(
            "CommonPrefixes",
            ElementRule::structure(Grammar::new().element("Prefix", ElementRule::text())).list(),
        )
});

/// `InitiateMultipartUploadResult`.
pub static INITIATE_MULTIPART: LazyLock<Grammar> = LazyLock::new(|| {
    Grammar::new()
        .element("Bucket", ElementRule::text())
        .element("Key", ElementRule::text())
        .element("UploadId", ElementRule::text())
});

/// `CompleteMultipartUpload` request body.
pub static COMPLETE_MULTIPART_REQUEST: LazyLock<Grammar> = LazyLock::new(|| {
    Grammar::new().element(
        "Part",
        ElementRule::structure(
            Grammar::new()
                .element("PartNumber", ElementRule::integer())
                .element("ETag", ElementRule::text()),
        )
        .list(),
    )
});

/// `CompleteMultipartUploadResult`.
pub static COMPLETE_MULTIPART: LazyLock<Grammar> = LazyLock::new(|| {
    Grammar::new()
        .element("Location", ElementRule::text())
        .element("Bucket", ElementRule::text())
        .element("Key", ElementRule::text())
        .element("ETag", ElementRule::text())
});

/// `ListPartsResult`.
pub static LIST_PARTS: LazyLock<Grammar> = LazyLock::new(|| {
    Grammar::new()
        .element("Bucket", ElementRule::text())
        .element("Key", ElementRule::text())
        .element("UploadId", ElementRule::text())
        .element("PartNumberMarker", ElementRule::integer())
        .element("NextPartNumberMarker", ElementRule::integer())
        .element("MaxParts", ElementRule::integer())
        .element("IsTruncated", ElementRule::boolean())
        .element(
            "Part",
            ElementRule::structure(
                Grammar::new()
                    .element("PartNumber", ElementRule::integer())
                    .element("LastModified", ElementRule::timestamp())
                    .element("ETag", ElementRule::text())
                    .element("Size", ElementRule::integer()),
            )
            .list(),
        )
});

/// `ListMultipartUploadsResult`.
pub static LIST_MULTIPART_UPLOADS: LazyLock<Grammar> = LazyLock::new(|| {
    Grammar::new()
        .element("Bucket", ElementRule::text())
        .element("KeyMarker", ElementRule::text())
        .element("UploadIdMarker", ElementRule::text())
        .element("NextKeyMarker", ElementRule::text())
        .element("NextUploadIdMarker", ElementRule::text())
        .element("MaxUploads", ElementRule::integer())
        .element("IsTruncated", ElementRule::boolean())
        .element(
            "Upload",
            ElementRule::structure(
                Grammar::new()
                    .element("Key", ElementRule::text())
                    .element("UploadId", ElementRule::text())
                    .element("Initiated", ElementRule::timestamp())
                    .element("Initiator", owner())
                    .element("Owner", owner()),
            )
            .list(),
        )
});

/// `LocationConstraint`, both the response and the `CreateBucketConfiguration` body.
pub static LOCATION: LazyLock<Grammar> =
    LazyLock::new(|| Grammar::new().element("LocationConstraint", ElementRule::text()));

/// `AccessControlPolicy`, both the response and the `PutBucketAcl` body.
pub static ACCESS_CONTROL_POLICY: LazyLock<Grammar> = LazyLock::new(|| {
    Grammar::new().element("Owner", owner()).element(
        "AccessControlList",
        ElementRule::wrapper(
            "Grant",
            ElementRule::structure(
                Grammar::new()
                    .element(
                        "Grantee",
                        ElementRule::structure(
                            Grammar::new()
                                .element("ID", ElementRule::text())
                                .element("DisplayName", ElementRule::text())
                                .element("URI", ElementRule::text())
                                .element("EmailAddress", ElementRule::text()),
                        ),
                    )
                    .element("Permission", ElementRule::text()),
            ),
        ),
    )
});

/// `CopyObjectResult`.
pub static COPY_OBJECT: LazyLock<Grammar> = LazyLock::new(|| {
    Grammar::new()
        .element("LastModified", ElementRule::timestamp())
        .element("ETag", ElementRule::text())
});

/// `Error`.
pub static ERROR: LazyLock<Grammar> = LazyLock::new(|| {
    Grammar::new()
        .element("Code", ElementRule::text())
        .element("Message", ElementRule::text())
        .element("RequestId", ElementRule::text())
        .element("HostId", ElementRule::text())
        .element("Resource", ElementRule::text())
});
