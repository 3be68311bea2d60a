// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Time-bounded cache for expensive derived values.
//!
//! Each key holds one [`CacheEntry`] that is valid while
//! `now - captured_at < ttl`. Entries are replaced whole, so a reader sees
//! either the previous value or the new one, never a mix.
//!
//! # Misses are not coalesced
//!
//! Two callers that miss at the same moment will both run `compute` and the
//! later write wins. Only use it for values where recomputing is harmless.
//!
//! ```text
//! get_or_compute(key, ttl, compute)
//!       │
//!       ├─→ entry fresh → clone value (compute not called)
//!       │
//!       └─→ missing/stale → compute() ──Ok──→ store {value, captured_at} → value
//!                                   └─Err──→ propagate, nothing cached
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

/// A value and the moment it was captured.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub captured_at: Instant,
}

impl<T> CacheEntry<T> {
    #[must_use]
    pub fn is_fresh(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.captured_at) < ttl
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

pub struct TtlCache<T> {
    entries: DashMap<String, CacheEntry<T>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<T: Clone> TtlCache<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Fresh cached value for `key`, if any.
    #[must_use]
    pub fn get(&self, key: &str, ttl: Duration) -> Option<T> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|entry| entry.is_fresh(ttl, now))
            .map(|entry| entry.value.clone())
    }

    /// Return the cached value, or run `compute` and cache its result.
    ///
    /// The entry is stamped with the time the call started. Errors from
    /// `compute` are returned as-is and leave the cache untouched.
    pub async fn get_or_compute<F, Fut, E>(&self, key: &str, ttl: Duration, compute: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let now = Instant::now();
        let cached = self
            .entries
            .get(key)
            .filter(|entry| entry.is_fresh(ttl, now))
            .map(|entry| entry.value.clone());

        if let Some(value) = cached {
            self.hits.fetch_add(1, Ordering::Relaxed);
            crate::metrics::record_cache(key, true);
            return Ok(value);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_cache(key, false);

        let value = compute().await?;
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value: value.clone(),
                captured_at: now,
            },
        );
        Ok(value)
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }
}

impl<T: Clone> Default for TtlCache<T> {
    fn default() -> Self {
        Self::new()
    }
}
