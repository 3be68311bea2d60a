// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Embedded SQLite fallback, one connection per execution context.
//!
//! Every [`ContextId`] gets its own long-lived [`SqliteConnection`], opened
//! on first use in WAL mode with a bounded busy timeout. Because no two
//! contexts share a connection, read queries never queue behind each other
//! and concurrency scales with the number of contexts.
//!
//! All connections ever opened are also kept in a tracked set so
//! [`FallbackPool::close_all`] can tear them down in one pass at shutdown.
//!
//! ```text
//! acquire(ctx) ──► mapping hit? ──yes──► same FallbackConnection
//!                      │
//!                      no
//!                      ▼
//!          file exists? ──no──► DataError::BackendUnavailable
//!                      │
//!                     yes
//!                      ▼
//!   open (WAL, busy_timeout) → register in mapping + tracked set
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::BoxFuture;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqliteJournalMode};
use sqlx::query::Query;
use sqlx::{ConnectOptions, Connection, Sqlite, SqliteConnection};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::rows::{decode_row, QueryParam, RowMap};
use super::traits::DataError;

static NEXT_THREAD_CONTEXT: AtomicU64 = AtomicU64::new(1 << 63);

thread_local! {
    static THREAD_CONTEXT: u64 = NEXT_THREAD_CONTEXT.fetch_add(1, Ordering::Relaxed);
}

/// Identifies the execution context (worker, task group, thread) that owns a
/// fallback connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Context keyed on the calling OS thread.
    ///
    /// Each thread draws a fresh id from a process-wide counter the first
    /// time it asks, so two threads never share one. Thread ids live in the
    /// upper half of the `u64` range, away from ids passed to [`ContextId::new`].
    #[must_use]
    pub fn current_thread() -> Self {
        THREAD_CONTEXT.with(|id| Self(*id))
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for ContextId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// A SQLite connection owned by exactly one execution context.
///
/// Cloning yields another reference to the same underlying connection; the
/// pool keeps one reference for shutdown. The inner slot becomes `None`
/// once the pool has closed it.
#[derive(Clone)]
pub struct FallbackConnection {
    id: u64,
    context: ContextId,
    conn: Arc<Mutex<Option<SqliteConnection>>>,
}

impl FallbackConnection {
    fn new(id: u64, context: ContextId, conn: SqliteConnection) -> Self {
        Self {
            id,
            context,
            conn: Arc::new(Mutex::new(Some(conn))),
        }
    }

    /// Pool-assigned serial number.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn context(&self) -> ContextId {
        self.context
    }

    /// True if both refer to the same underlying connection.
    #[must_use]
    pub fn same_as(&self, other: &FallbackConnection) -> bool {
        Arc::ptr_eq(&self.conn, &other.conn)
    }

    /// Run `f` with exclusive use of the connection.
    ///
    /// The borrow is released on every exit path (success, error, panic
    /// unwinding); the connection itself stays open for the next call.
    pub async fn with_cursor<F, T>(&self, f: F) -> Result<T, DataError>
    where
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T, DataError>>,
    {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(DataError::ConnectionClosed)?;
        f(conn).await
    }

    pub async fn fetch_rows(&self, sql: &str, params: &[QueryParam]) -> Result<Vec<RowMap>, DataError> {
        let sql = sql.to_owned();
        let params = params.to_vec();
        self.with_cursor(move |conn| {
            Box::pin(async move {
                let rows = bind_params(sqlx::query(&sql), &params)
                    .fetch_all(&mut *conn)
                    .await?;
                Ok(rows.iter().map(|row| decode_row(row)).collect())
            })
        })
        .await
    }

    /// Execute a statement that returns no rows (DDL, PRAGMA). Returns rows affected.
    pub async fn execute(&self, sql: &str) -> Result<u64, DataError> {
        let sql = sql.to_owned();
        self.with_cursor(move |conn| {
            Box::pin(async move {
                let result = sqlx::query(&sql).execute(&mut *conn).await?;
                Ok(result.rows_affected())
            })
        })
        .await
    }

    /// Close and empty the slot. Errors are ignored.
    async fn close(&self) {
        let taken = self.conn.lock().await.take();
        if let Some(conn) = taken {
            if let Err(e) = conn.close().await {
                debug!(id = self.id, error = %e, "Ignoring fallback close error");
            }
        }
    }
}

impl std::fmt::Debug for FallbackConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackConnection")
            .field("id", &self.id)
            .field("context", &self.context)
            .finish()
    }
}

fn bind_params<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &'q [QueryParam],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for param in params {
        query = match param {
            QueryParam::Text(v) => query.bind(v.as_str()),
            QueryParam::Int(v) => query.bind(*v),
            QueryParam::Float(v) => query.bind(*v),
        };
    }
    query
}

/// Per-context SQLite connections plus the tracked set used for teardown.
pub struct FallbackPool {
    path: PathBuf,
    busy_timeout: Duration,
    /// Context → its connection
    connections: DashMap<ContextId, FallbackConnection>,
    /// Every connection opened since the last close_all
    tracked: parking_lot::Mutex<Vec<FallbackConnection>>,
    next_id: AtomicU64,
}

impl FallbackPool {
    /// Default wait on lock contention before SQLITE_BUSY surfaces.
    pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

    #[must_use]
    pub fn new(path: impl AsRef<Path>, busy_timeout: Duration) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            busy_timeout,
            connections: DashMap::new(),
            tracked: parking_lot::Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of open (tracked) connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tracked.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the connection owned by `ctx`, opening it on first use.
    pub async fn acquire(&self, ctx: ContextId) -> Result<FallbackConnection, DataError> {
        if let Some(existing) = self.connections.get(&ctx) {
            return Ok(existing.value().clone());
        }

        if !self.path.exists() {
            crate::metrics::record_error("fallback", "open", "missing_store");
            return Err(DataError::BackendUnavailable {
                path: self.path.display().to_string(),
            });
        }

        let conn = self.open().await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let candidate = FallbackConnection::new(id, ctx, conn);

        // Someone reusing the same context id may have raced us here.
        // Lock order: tracked set, then mapping (same as close_all).
        let (winner, loser) = {
            let mut tracked = self.tracked.lock();
            match self.connections.entry(ctx) {
                Entry::Occupied(e) => (e.get().clone(), Some(candidate)),
                Entry::Vacant(e) => {
                    e.insert(candidate.clone());
                    tracked.push(candidate.clone());
                    (candidate, None)
                }
            }
        };

        if let Some(loser) = loser {
            loser.close().await;
        } else {
            let open = self.len();
            crate::metrics::set_fallback_connections(open);
            debug!(context = %ctx, id = winner.id(), open, "Opened fallback connection");
        }
        Ok(winner)
    }

    /// Scoped use of `ctx`'s connection; see [`FallbackConnection::with_cursor`].
    pub async fn with_cursor<F, T>(&self, ctx: ContextId, f: F) -> Result<T, DataError>
    where
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T, DataError>>,
    {
        let conn = self.acquire(ctx).await?;
        conn.with_cursor(f).await
    }

    /// Close every tracked connection and forget all context bindings.
    ///
    /// Individual close errors are ignored. Safe to call repeatedly.
    pub async fn close_all(&self) {
        let drained: Vec<FallbackConnection> = {
            let mut tracked = self.tracked.lock();
            self.connections.clear();
            std::mem::take(&mut *tracked)
        };

        if drained.is_empty() {
            return;
        }

        let count = drained.len();
        for conn in drained {
            conn.close().await;
        }
        crate::metrics::set_fallback_connections(0);
        info!(closed = count, path = %self.path.display(), "Closed fallback connections");
    }

    async fn open(&self) -> Result<SqliteConnection, DataError> {
        SqliteConnectOptions::new()
            .filename(&self.path)
            .create_if_missing(false)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(self.busy_timeout)
            .connect()
            .await
            .map_err(|e| {
                warn!(path = %self.path.display(), error = %e, "Failed to open fallback store");
                DataError::Connect {
                    backend: "fallback",
                    reason: e.to_string(),
                }
            })
    }
}
