//! Connection selection and the cached date-range accessor.

use std::future::Future;
use std::sync::atomic::Ordering;

use futures::future::BoxFuture;
use serde_json::Value;
use sqlx::SqliteConnection;
use tracing::{debug, warn};

use crate::config::is_identifier;
use crate::storage::fallback::ContextId;
use crate::storage::traits::DataError;

use super::{Connection, ConnectionManager, DateRange, DATE_RANGE_KEY};

impl ConnectionManager {
    /// Get a working connection for `ctx`.
    ///
    /// Tries the primary first; any primary failure is absorbed and the
    /// context's fallback connection is returned instead. The only error
    /// surfaced is a missing (or unopenable) fallback store.
    ///
    /// Never waits longer than the backoff budget, and only the caller that
    /// wins the reconnect lock waits at all.
    pub async fn get_connection(&self, ctx: ContextId) -> Result<Connection, DataError> {
        if let Some(handle) = self.gate.get_handle().await {
            crate::metrics::record_backend_selected("primary");
            return Ok(Connection::Primary(handle));
        }

        let conn = self.fallback.acquire(ctx).await?;
        if !self.fallback_announced.swap(true, Ordering::Relaxed) {
            warn!(
                path = %self.fallback.path().display(),
                primary = %self.gate.availability(),
                "Using fallback backend"
            );
        }
        crate::metrics::record_backend_selected("fallback");
        Ok(Connection::Fallback(conn))
    }

    /// The fact table's date span, cached for `date_range_ttl_secs`.
    ///
    /// On a miss a connection is obtained for `ctx` and handed to `compute`.
    /// A hit touches neither backend. Errors from `compute` are returned and
    /// not cached.
    pub async fn get_cached_date_range<F, Fut>(&self, ctx: ContextId, compute: F) -> Result<DateRange, DataError>
    where
        F: FnOnce(Connection) -> Fut,
        Fut: Future<Output = Result<DateRange, DataError>>,
    {
        let ttl = self.config.date_range_ttl();
        self.date_range
            .get_or_compute(DATE_RANGE_KEY, ttl, || async move {
                let conn = self.get_connection(ctx).await?;
                debug!(backend = %conn.kind(), "Refreshing cached date range");
                compute(conn).await
            })
            .await
    }

    /// [`Self::get_cached_date_range`] with the stock MIN/MAX query over the
    /// configured table and column.
    pub async fn date_range(&self, ctx: ContextId) -> Result<DateRange, DataError> {
        let table = self.config.date_range_table.clone();
        let column = self.config.date_range_column.clone();
        self.get_cached_date_range(ctx, move |conn| async move {
            fetch_date_range(&conn, &table, &column).await
        })
        .await
    }

    /// Run `f` against `ctx`'s own SQLite connection, regardless of whether
    /// the primary is up. Use this for fallback-only work such as DDL.
    pub async fn with_fallback_cursor<F, T>(&self, ctx: ContextId, f: F) -> Result<T, DataError>
    where
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T, DataError>>,
    {
        self.fallback.with_cursor(ctx, f).await
    }
}

/// `SELECT MIN(column), MAX(column) FROM table` on either backend.
///
/// Bounds that come back empty (an empty table, NULL dates) are replaced by
/// today's local date.
pub async fn fetch_date_range(conn: &Connection, table: &str, column: &str) -> Result<DateRange, DataError> {
    if !is_identifier(table) || !is_identifier(column) {
        return Err(DataError::InvalidConfig(format!(
            "date range source must be plain identifiers, got '{}.{}'",
            table, column
        )));
    }

    let sql = format!(
        "SELECT MIN({col}) AS min_d, MAX({col}) AS max_d FROM {table}",
        col = column,
        table = table
    );
    let rows = conn.fetch_rows(&sql, &[]).await?;

    let today = chrono::Local::now().format("%Y-%m-%d").to_string();
    let row = rows.first();
    let bound = |name: &str| {
        row.and_then(|r| r.get(name))
            .and_then(date_text)
            .unwrap_or_else(|| today.clone())
    };

    Ok(DateRange::new(bound("min_d"), bound("max_d")))
}

fn date_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
