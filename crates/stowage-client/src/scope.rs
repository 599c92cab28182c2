//! Caller-owned call scope.
//!
//! A [`CallScope`] groups a batch of logical calls. When it carries a
//! [`ResponseCache`], read-only operations flagged as cacheable are answered
//! from the cache after their first successful call within the scope. Nothing
//! is cached outside an explicit scope, and dropping the scope drops its
//! cache.

use std::sync::Arc;

use dashmap::DashMap;

use crate::response::Response;

/// Successful responses keyed by operation and addressing.
#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: DashMap<String, Response>,
}

impl ResponseCache {
    /// An empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached response for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Response> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Store a response.
    pub fn insert(&self, key: String, response: Response) {
        self.entries.insert(key, response);
    }

    /// Number of cached responses.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every cached response.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

/// Scope of a batch of calls.
///
/// Cloning a scope shares its cache, so one scope can be handed to several
/// concurrent tasks.
#[derive(Debug, Clone, Default)]
pub struct CallScope {
    cache: Option<Arc<ResponseCache>>,
}

impl CallScope {
    /// A scope without caching.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A scope that caches cacheable responses.
    #[must_use]
    pub fn with_cache() -> Self {
        Self {
            cache: Some(Arc::new(ResponseCache::new())),
        }
    }

    /// The scope's cache, if any.
    #[must_use]
    pub fn cache(&self) -> Option<&ResponseCache> {
        self.cache.as_deref()
    }
}
