// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Connection manager.
//!
//! The [`ConnectionManager`] is the single entry point callers use to get a
//! working connection. It ties together:
//! - the [`PrimaryGate`] (shared handle to the analytical backend)
//! - the [`FallbackPool`] (one SQLite connection per execution context)
//! - a [`TtlCache`] for the MIN/MAX date span of the fact table
//!
//! # Lifecycle
//!
//! ```text
//! new() → get_connection()* → shutdown() → get_connection()* → ...
//! ```
//!
//! Nothing is opened until the first `get_connection`. `shutdown` returns
//! the manager to that initial state, so one instance can be reused across
//! test cases.
//!
//! # Example
//!
//! ```rust,no_run
//! use db_gate::{ConnectionManager, ContextId, DataAccessConfig, BackendKind};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), db_gate::DataError> {
//! let manager = Arc::new(ConnectionManager::new(DataAccessConfig::default())?);
//!
//! let conn = manager.get_connection(ContextId::current_thread()).await?;
//! let sql = match conn.kind() {
//!     BackendKind::Primary => "SELECT uniqExact(user_id) AS n FROM buy_fact",
//!     BackendKind::Fallback => "SELECT COUNT(DISTINCT user_id) AS n FROM buy_fact",
//! };
//! let rows = conn.fetch_rows(sql, &[]).await?;
//! # let _ = rows;
//!
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod api;
mod lifecycle;
mod types;

pub use api::fetch_date_range;
pub use types::{Connection, DateRange};

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tracing::info;

use crate::cache::{CacheStats, TtlCache};
use crate::config::DataAccessConfig;
use crate::gate::{BackendAvailability, PrimaryGate};
use crate::resilience::probe::LivenessProber;
use crate::storage::fallback::FallbackPool;
use crate::storage::primary::SqlPrimaryConnector;
use crate::storage::traits::{DataError, PrimaryConnector};

/// Cache key of the fact-table date span.
pub const DATE_RANGE_KEY: &str = "date_range";

/// Hands out primary or fallback connections.
///
/// `Send + Sync`; share it as `Arc<ConnectionManager>`.
pub struct ConnectionManager {
    pub(super) config: DataAccessConfig,
    pub(super) gate: PrimaryGate,
    pub(super) fallback: FallbackPool,
    pub(super) date_range: TtlCache<DateRange>,
    /// Set once the first fallback connection has been handed out
    pub(super) fallback_announced: AtomicBool,
}

impl ConnectionManager {
    /// Build a manager from config. The primary is reached through
    /// [`SqlPrimaryConnector`] when `primary_url` is set.
    pub fn new(config: DataAccessConfig) -> Result<Self, DataError> {
        let connector = config.primary_url.as_ref().map(|url| {
            let connector = SqlPrimaryConnector::new(url.clone(), config.primary_max_connections, config.probe_timeout());
            info!(primary = %connector.redacted_url(), "Primary backend configured");
            Arc::new(connector) as Arc<dyn PrimaryConnector>
        });
        Self::with_connector(config, connector)
    }

    /// Build a manager around any primary connector (`None` = fallback only).
    pub fn with_connector(
        config: DataAccessConfig,
        connector: Option<Arc<dyn PrimaryConnector>>,
    ) -> Result<Self, DataError> {
        config.validate()?;

        let gate = PrimaryGate::new(
            connector,
            config.backoff_policy(),
            LivenessProber::new(config.probe_timeout()),
            config.reprobe_policy(),
        );
        let fallback = FallbackPool::new(&config.fallback_path, config.fallback_busy_timeout());

        info!(
            fallback = %config.fallback_path,
            has_primary = gate.is_configured(),
            max_attempts = config.max_reconnect_attempts,
            "Connection manager created"
        );

        Ok(Self {
            config,
            gate,
            fallback,
            date_range: TtlCache::new(),
            fallback_announced: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn config(&self) -> &DataAccessConfig {
        &self.config
    }

    #[must_use]
    pub fn availability(&self) -> BackendAvailability {
        self.gate.availability()
    }

    #[must_use]
    pub fn gate(&self) -> &PrimaryGate {
        &self.gate
    }

    #[must_use]
    pub fn fallback_pool(&self) -> &FallbackPool {
        &self.fallback
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.date_range.stats()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::PathBuf;

    use sqlx::sqlite::SqliteConnectOptions;
    use sqlx::{ConnectOptions, Connection as _};
    use tempfile::{tempdir, TempDir};

    /// A SQLite file with a small `buy_fact` table.
    pub async fn seeded_store() -> (TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ecommerce.db");
        let mut conn = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .connect()
            .await
            .unwrap();
        for stmt in [
            "CREATE TABLE buy_fact (date TEXT, user_id INTEGER, order_id INTEGER, price REAL)",
            "CREATE TABLE user_funnel_mart (date TEXT, user_id INTEGER, has_pv INTEGER, has_cart INTEGER, has_buy INTEGER)",
            "INSERT INTO buy_fact VALUES \
                ('2017-11-01', 1, 100, 10.0), \
                ('2017-11-15', 2, 101, 20.0), \
                ('2017-12-10', 1, 102, 30.0)",
        ] {
            sqlx::query(stmt).execute(&mut conn).await.unwrap();
        }
        conn.close().await.unwrap();
        (dir, path)
    }
}
