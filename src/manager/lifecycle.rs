//! Startup preparation and shutdown.

use std::sync::atomic::Ordering;

use tracing::{info, warn};

use crate::storage::fallback::ContextId;
use crate::storage::traits::DataError;

use super::ConnectionManager;

impl ConnectionManager {
    /// Create the configured fallback indexes through `ctx`'s connection.
    ///
    /// Each statement is independent: a failing one is logged and skipped.
    /// Returns how many statements succeeded. Fails only if the fallback
    /// store cannot be opened.
    pub async fn prepare_fallback(&self, ctx: ContextId) -> Result<usize, DataError> {
        let conn = self.fallback.acquire(ctx).await?;
        let total = self.config.fallback_indexes.len();
        let mut applied = 0;

        for statement in &self.config.fallback_indexes {
            match conn.execute(statement).await {
                Ok(_) => applied += 1,
                Err(e) => {
                    warn!(statement = %statement, error = %e, "Skipping fallback index");
                    crate::metrics::record_error("fallback", "prepare", "index");
                }
            }
        }

        info!(applied, total, "Fallback indexes prepared");
        Ok(applied)
    }

    /// Close every connection and return to the initial state.
    ///
    /// Fallback connections are closed first, then the primary handle. The
    /// date-range cache is dropped. Calling it again is a no-op, and
    /// `get_connection` afterwards starts from scratch.
    pub async fn shutdown(&self) {
        info!("Shutting down connection manager...");
        self.fallback.close_all().await;
        self.gate.close().await;
        self.date_range.clear();
        self.fallback_announced.store(false, Ordering::Relaxed);
        info!("Connection manager shutdown complete");
    }
}
