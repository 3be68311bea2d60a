//! Scriptable in-memory primary backend.
//!
//! Stands in for the analytical backend when exercising the gate's state
//! machine: connects can be made to fail a fixed number of times (or
//! forever), heartbeats can be killed mid-run, and connects can be slowed
//! down to widen race windows.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::rows::{QueryParam, RowMap};
use super::traits::{DataError, PrimaryBackend, PrimaryConnector, PrimaryHandle};

pub struct InMemoryPrimary {
    id: u64,
    alive: AtomicBool,
    closed: AtomicBool,
    pings: AtomicU64,
    rows: RwLock<Vec<RowMap>>,
}

impl InMemoryPrimary {
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self {
            id,
            alive: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            pings: AtomicU64::new(0),
            rows: RwLock::new(Vec::new()),
        }
    }

    /// Connection serial number assigned by the connector.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn ping_count(&self) -> u64 {
        self.pings.load(Ordering::SeqCst)
    }

    /// Rows returned by every `fetch_rows` call.
    pub fn set_rows(&self, rows: Vec<RowMap>) {
        *self.rows.write() = rows;
    }
}

#[async_trait]
impl PrimaryBackend for InMemoryPrimary {
    async fn ping(&self) -> Result<(), DataError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        if self.alive.load(Ordering::SeqCst) && !self.is_closed() {
            Ok(())
        } else {
            Err(DataError::ProbeFailed(format!("in-memory primary {} is down", self.id)))
        }
    }

    async fn fetch_rows(&self, _sql: &str, _params: &[QueryParam]) -> Result<Vec<RowMap>, DataError> {
        if self.is_closed() {
            return Err(DataError::ConnectionClosed);
        }
        Ok(self.rows.read().clone())
    }

    async fn execute(&self, _sql: &str) -> Result<u64, DataError> {
        if self.is_closed() {
            return Err(DataError::ConnectionClosed);
        }
        Ok(0)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Connector handing out [`InMemoryPrimary`] handles.
pub struct InMemoryConnector {
    /// Remaining connects that fail before one succeeds. `u32::MAX` = never succeed.
    failures_remaining: AtomicU32,
    connect_delay: Duration,
    connects: AtomicU64,
    last: RwLock<Option<Arc<InMemoryPrimary>>>,
    rows: RwLock<Vec<RowMap>>,
}

impl InMemoryConnector {
    /// Every connect succeeds.
    #[must_use]
    pub fn healthy() -> Self {
        Self::failing_first(0)
    }

    /// The first `n` connects fail, later ones succeed.
    #[must_use]
    pub fn failing_first(n: u32) -> Self {
        Self {
            failures_remaining: AtomicU32::new(n),
            connect_delay: Duration::ZERO,
            connects: AtomicU64::new(0),
            last: RwLock::new(None),
            rows: RwLock::new(Vec::new()),
        }
    }

    /// Every connect fails.
    #[must_use]
    pub fn unreachable() -> Self {
        Self::failing_first(u32::MAX)
    }

    /// Sleep this long inside every connect.
    #[must_use]
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// Rows that handles created from now on will return.
    #[must_use]
    pub fn with_rows(self, rows: Vec<RowMap>) -> Self {
        *self.rows.write() = rows;
        self
    }

    /// Total connect attempts, successful or not.
    #[must_use]
    pub fn connect_attempts(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Most recently opened handle.
    #[must_use]
    pub fn last_handle(&self) -> Option<Arc<InMemoryPrimary>> {
        self.last.read().clone()
    }

    /// Make connects fail again (`u32::MAX` = forever).
    pub fn fail_next(&self, n: u32) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl PrimaryConnector for InMemoryConnector {
    async fn connect(&self) -> Result<PrimaryHandle, DataError> {
        let attempt = self.connects.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }

        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
                0 => None,
                u32::MAX => Some(u32::MAX),
                n => Some(n - 1),
            })
            .is_ok();
        if failing {
            return Err(DataError::Connect {
                backend: "memory",
                reason: format!("connection refused (attempt {})", attempt),
            });
        }

        let handle = Arc::new(InMemoryPrimary::new(attempt));
        handle.set_rows(self.rows.read().clone());
        *self.last.write() = Some(handle.clone());
        Ok(handle)
    }
}
