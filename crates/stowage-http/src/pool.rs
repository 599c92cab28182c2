//! Per-host connection pool.
//!
//! Each `(scheme, host, port)` key owns a slot with a FIFO semaphore that
//! bounds how many connections may be checked out at once, and a stack of
//! idle connections. Checkout waits for a permit up to the open timeout,
//! then reuses the most recently returned idle connection or dials a new one.
//! A connection goes back on the stack only after its response body has been
//! read to the end; every other outcome closes it.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use http::Response;
use hyper::body::Incoming;
use hyper::client::conn::http1::SendRequest;
use parking_lot::Mutex;
use stowage_core::{Request, Scheme};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::body::RequestBody;
use crate::connector::Connector;
use crate::error::TransportError;
use crate::transport::Timeouts;

/// Default bound on concurrent connections per host.
pub const DEFAULT_MAX_CONNECTIONS_PER_HOST: usize = 16;

/// Identifies a pool slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    /// URL scheme.
    pub scheme: Scheme,
    /// Host name.
    pub host: String,
    /// Port.
    pub port: u16,
}

impl PoolKey {
    /// The slot a request is sent through.
    #[must_use]
    pub fn for_request(request: &Request) -> Self {
        Self {
            scheme: request.scheme,
            host: request.host.clone(),
            port: request.effective_port(),
        }
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

struct IdleConnection {
    sender: SendRequest<RequestBody>,
    last_used: Instant,
}

impl IdleConnection {
    fn is_reusable(&self, idle_timeout: Duration) -> bool {
        !self.sender.is_closed() && self.last_used.elapsed() <= idle_timeout
    }
}

struct Slot {
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<IdleConnection>>,
}

/// Connection checked out of the pool.
///
/// Holds one of the slot's permits until dropped. Call
/// [`PooledConnection::release`] to return a healthy connection for reuse;
/// dropping it without releasing closes the connection.
pub struct PooledConnection {
    key: PoolKey,
    sender: Option<SendRequest<RequestBody>>,
    slot: Arc<Slot>,
    reused: bool,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    /// Whether this connection came from the idle stack.
    #[must_use]
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    /// Send one request and wait for the response head.
    pub async fn send(
        &mut self,
        request: http::Request<RequestBody>,
    ) -> Result<Response<Incoming>, TransportError> {
        let sender = self
            .sender
            .as_mut()
            .ok_or_else(|| TransportError::InvalidRequest("connection already released".to_owned()))?;
        sender.ready().await?;
        Ok(sender.send_request(request).await?)
    }

    /// Return the connection to its slot's idle stack.
    pub fn release(mut self) {
        if let Some(sender) = self.sender.take() {
            if sender.is_closed() {
                debug!(key = %self.key, "dropping connection closed by peer");
                return;
            }
            self.slot.idle.lock().push(IdleConnection {
                sender,
                last_used: Instant::now(),
            });
            debug!(key = %self.key, "returned connection to pool");
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if self.sender.is_some() {
            debug!(key = %self.key, "evicting connection");
        }
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("key", &self.key)
            .field("reused", &self.reused)
            .finish_non_exhaustive()
    }
}

/// Pool of persistent connections shared by every call of a client.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    connector: Connector,
    max_per_host: usize,
    slots: DashMap<PoolKey, Arc<Slot>>,
}

impl ConnectionPool {
    /// Create a pool that allows `max_per_host` concurrent connections per key.
    #[must_use]
    pub fn new(connector: Connector, max_per_host: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                connector,
                max_per_host: max_per_host.max(1),
                slots: DashMap::new(),
            }),
        }
    }

    /// The connector used for new connections.
    #[must_use]
    pub fn connector(&self) -> &Connector {
        &self.inner.connector
    }

    /// Number of idle connections currently held for `key`.
    #[must_use]
    pub fn idle_count(&self, key: &PoolKey) -> usize {
        self.inner
            .slots
            .get(key)
            .map_or(0, |slot| slot.idle.lock().len())
    }

    fn slot(&self, key: &PoolKey) -> Arc<Slot> {
        self.inner
            .slots
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(Slot {
                    permits: Arc::new(Semaphore::new(self.inner.max_per_host)),
                    idle: Mutex::new(Vec::new()),
                })
            })
            .clone()
    }

    /// Check out a connection for `key`.
    ///
    /// Waiters are served in arrival order. The whole checkout, waiting for a
    /// permit plus dialing, is bounded by `timeouts.open`.
    pub async fn checkout(
        &self,
        key: &PoolKey,
        timeouts: &Timeouts,
    ) -> Result<PooledConnection, TransportError> {
        let started = Instant::now();
        let slot = self.slot(key);

        let permit = tokio::time::timeout(timeouts.open, slot.permits.clone().acquire_owned())
            .await
            .ok()
            .and_then(Result::ok)
            .ok_or_else(|| TransportError::PoolExhausted {
                host: key.host.clone(),
                waited: started.elapsed(),
            })?;

        if let Some(sender) = take_idle(&slot, key, timeouts.idle) {
            debug!(key = %key, "reusing connection");
            return Ok(PooledConnection {
                key: key.clone(),
                sender: Some(sender),
                slot,
                reused: true,
                _permit: permit,
            });
        }

        let remaining = timeouts.open.saturating_sub(started.elapsed());
        let sender = tokio::time::timeout(remaining, self.inner.connector.connect(key))
            .await
            .map_err(|_| TransportError::ConnectTimeout {
                host: key.host.clone(),
                timeout: timeouts.open,
            })??;

        Ok(PooledConnection {
            key: key.clone(),
            sender: Some(sender),
            slot,
            reused: false,
            _permit: permit,
        })
    }
}

/// Pop the most recently used healthy connection, discarding stale ones.
fn take_idle(slot: &Slot, key: &PoolKey, idle_timeout: Duration) -> Option<SendRequest<RequestBody>> {
    let mut idle = slot.idle.lock();
    while let Some(connection) = idle.pop() {
        if connection.is_reusable(idle_timeout) {
            return Some(connection.sender);
        }
        debug!(
            key = %key,
            idle_for = ?connection.last_used.elapsed(),
            closed = connection.sender.is_closed(),
            "discarding stale idle connection"
        );
    }
    None
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("max_per_host", &self.inner.max_per_host)
            .field("slots", &self.inner.slots.len())
            .finish_non_exhaustive()
    }
}
