//! HTTP transport for Stowage.
//!
//! [`Transport`] is the seam between the request pipeline and the network: it
//! performs exactly one exchange per call and never retries. [`HttpTransport`]
//! implements it over a bounded pool of persistent HTTP/1.1 connections keyed
//! by `(scheme, host, port)`, with TLS via `native-tls` and an optional HTTP
//! proxy.

pub mod body;
pub mod connector;
pub mod error;
pub mod pool;
pub mod transport;

pub use body::{RequestBody, ResponseBody};
pub use connector::{Connector, Proxy};
pub use error::TransportError;
pub use pool::{ConnectionPool, DEFAULT_MAX_CONNECTIONS_PER_HOST, PoolKey, PooledConnection};
pub use transport::{HttpTransport, RawResponse, Timeouts, Transport, TransportConfig};
