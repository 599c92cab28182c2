//! Core types shared by every Stowage crate.
//!
//! This crate holds the credential snapshot, the draft [`Request`] that moves
//! through build, sign and send, the [`ByteSource`] body abstraction, region
//! identifiers and the bundled region to hostname table.

mod credentials;
mod encoding;
mod endpoints;
mod error;
mod request;
mod types;

pub use credentials::{CredentialProvider, Credentials, StaticCredentialProvider};
pub use encoding::{URI_ENCODE_SET, encode_query_pairs, uri_encode, uri_encode_path};
pub use endpoints::{EndpointEntry, Endpoints};
pub use error::{CoreError, CoreResult};
pub use request::{AuthArtifact, ByteSource, ByteStream, Request, SignedRequest};
pub use types::{Region, Scheme};
