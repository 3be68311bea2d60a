//! Liveness probing for primary handles.
//!
//! A probe is one round trip of [`HEARTBEAT_SQL`] bounded by a short
//! timeout. It never retries; the gate decides what a failure means.

use std::time::Duration;

use tokio::time::timeout;
use tracing::debug;

use crate::storage::traits::{DataError, PrimaryBackend};

/// Cheapest query every supported dialect answers.
pub const HEARTBEAT_SQL: &str = "SELECT 1";

#[derive(Debug, Clone, Copy)]
pub struct LivenessProber {
    timeout: Duration,
}

impl Default for LivenessProber {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

impl LivenessProber {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Heartbeat with the failure reason preserved.
    pub async fn check(&self, backend: &dyn PrimaryBackend) -> Result<(), DataError> {
        match timeout(self.timeout, backend.ping()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(DataError::ProbeFailed(reason))) => Err(DataError::ProbeFailed(reason)),
            Ok(Err(e)) => Err(DataError::ProbeFailed(e.to_string())),
            Err(_) => Err(DataError::ProbeFailed(format!(
                "no response from {} within {:?}",
                backend.name(),
                self.timeout
            ))),
        }
    }

    /// `true` only if the backend answered in time. Errors are never propagated.
    pub async fn probe(&self, backend: &dyn PrimaryBackend) -> bool {
        match self.check(backend).await {
            Ok(()) => {
                crate::metrics::record_probe("success");
                true
            }
            Err(e) => {
                debug!(backend = backend.name(), error = %e, "Liveness probe failed");
                crate::metrics::record_probe("failure");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::rows::{QueryParam, RowMap};
    use crate::storage::memory::InMemoryPrimary;
    use async_trait::async_trait;

    struct HangingBackend;

    #[async_trait]
    impl PrimaryBackend for HangingBackend {
        async fn ping(&self) -> Result<(), DataError> {
            std::future::pending::<()>().await;
            Ok(())
        }

        async fn fetch_rows(&self, _sql: &str, _params: &[QueryParam]) -> Result<Vec<RowMap>, DataError> {
            Ok(Vec::new())
        }

        async fn execute(&self, _sql: &str) -> Result<u64, DataError> {
            Ok(0)
        }

        async fn close(&self) {}
    }

    #[tokio::test]
    async fn test_probe_live_backend() {
        let backend = InMemoryPrimary::new(1);
        assert!(LivenessProber::default().probe(&backend).await);
        assert_eq!(backend.ping_count(), 1);
    }

    #[tokio::test]
    async fn test_probe_dead_backend_is_false() {
        let backend = InMemoryPrimary::new(1);
        backend.set_alive(false);
        let prober = LivenessProber::default();
        assert!(!prober.probe(&backend).await);
        assert!(matches!(prober.check(&backend).await, Err(DataError::ProbeFailed(_))));
        // One round trip per call, no internal retries.
        assert_eq!(backend.ping_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_times_out() {
        let prober = LivenessProber::new(Duration::from_millis(250));
        let start = tokio::time::Instant::now();
        assert!(!prober.probe(&HangingBackend).await);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(250) && elapsed < Duration::from_millis(300));

        let err = prober.check(&HangingBackend).await.unwrap_err();
        assert!(err.to_string().contains("within"));
    }
}
