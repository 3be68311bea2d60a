//! Public types handed out by the connection manager.

use serde::Serialize;

use crate::dialect::BackendKind;
use crate::metrics::LatencyTimer;
use crate::storage::fallback::FallbackConnection;
use crate::storage::rows::{QueryParam, RowMap};
use crate::storage::traits::{DataError, PrimaryBackend, PrimaryHandle};

/// A usable connection to one of the two backends.
///
/// Match on it (or on [`Connection::kind`]) to pick the SQL dialect.
#[derive(Clone)]
pub enum Connection {
    /// Shared handle to the analytical primary
    Primary(PrimaryHandle),
    /// The calling context's own SQLite connection
    Fallback(FallbackConnection),
}

impl Connection {
    #[must_use]
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Primary(_) => BackendKind::Primary,
            Self::Fallback(_) => BackendKind::Fallback,
        }
    }

    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.kind().is_fallback()
    }

    /// Run a read query with positional `?` parameters and return named rows.
    ///
    /// Query errors propagate unchanged; they do not trigger a fallback.
    pub async fn fetch_rows(&self, sql: &str, params: &[QueryParam]) -> Result<Vec<RowMap>, DataError> {
        let kind = self.kind();
        let _timer = LatencyTimer::new(kind.as_str(), "fetch_rows");
        let result = match self {
            Self::Primary(handle) => handle.fetch_rows(sql, params).await,
            Self::Fallback(conn) => conn.fetch_rows(sql, params).await,
        };
        let status = if result.is_ok() { "success" } else { "error" };
        crate::metrics::record_query(kind.as_str(), status);
        result
    }

    /// Run a statement that returns no rows (DDL, PRAGMA). Returns rows affected.
    pub async fn execute(&self, sql: &str) -> Result<u64, DataError> {
        let _timer = LatencyTimer::new(self.kind().as_str(), "execute");
        match self {
            Self::Primary(handle) => handle.execute(sql).await,
            Self::Fallback(conn) => conn.execute(sql).await,
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary(handle) => f.debug_tuple("Primary").field(&handle.name()).finish(),
            Self::Fallback(conn) => f.debug_tuple("Fallback").field(conn).finish(),
        }
    }
}

/// Earliest and latest date present in the fact table, as `YYYY-MM-DD` text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub min: String,
    pub max: String,
}

impl DateRange {
    #[must_use]
    pub fn new(min: impl Into<String>, max: impl Into<String>) -> Self {
        Self {
            min: min.into(),
            max: max.into(),
        }
    }

    /// A range covering only `day`.
    #[must_use]
    pub fn single(day: impl Into<String>) -> Self {
        let day = day.into();
        Self {
            min: day.clone(),
            max: day,
        }
    }
}

impl From<(String, String)> for DateRange {
    fn from((min, max): (String, String)) -> Self {
        Self { min, max }
    }
}

impl From<DateRange> for (String, String) {
    fn from(range: DateRange) -> Self {
        (range.min, range.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::InMemoryPrimary;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_primary_connection_dispatch() {
        let raw = Arc::new(InMemoryPrimary::new(1));
        let mut row = RowMap::new();
        row.insert("total_sales".into(), json!(42.0));
        raw.set_rows(vec![row]);

        let conn = Connection::Primary(raw.clone());
        assert_eq!(conn.kind(), BackendKind::Primary);
        assert!(!conn.is_fallback());

        let rows = conn.fetch_rows("SELECT SUM(price) AS total_sales FROM buy_fact", &[]).await.unwrap();
        assert_eq!(rows[0]["total_sales"], json!(42.0));
        assert_eq!(format!("{:?}", conn), "Primary(\"memory\")");

        raw.close().await;
        assert!(matches!(conn.execute("SELECT 1").await, Err(DataError::ConnectionClosed)));
    }

    #[test]
    fn test_date_range_conversions() {
        let range = DateRange::from(("2017-11-01".to_string(), "2017-12-10".to_string()));
        assert_eq!(range, DateRange::new("2017-11-01", "2017-12-10"));
        let (min, max): (String, String) = range.into();
        assert_eq!((min.as_str(), max.as_str()), ("2017-11-01", "2017-12-10"));
        assert_eq!(DateRange::single("2024-01-01").max, "2024-01-01");
        assert_eq!(
            serde_json::to_value(DateRange::new("a", "b")).unwrap(),
            json!({"min": "a", "max": "b"})
        );
    }
}
