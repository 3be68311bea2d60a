//! Backoff and liveness primitives used by the primary gate.

pub mod probe;
pub mod retry;

pub use probe::{LivenessProber, HEARTBEAT_SQL};
pub use retry::{retry, Backoff, BackoffPolicy};
