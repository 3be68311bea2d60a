// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use super::rows::{QueryParam, RowMap};

#[derive(Error, Debug)]
pub enum DataError {
    /// The embedded fallback store is missing. There is nothing left to fall back to.
    #[error("fallback store not found at '{path}'")]
    BackendUnavailable { path: String },
    #[error("liveness probe failed: {0}")]
    ProbeFailed(String),
    #[error("primary reconnect exhausted after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },
    #[error("failed to connect to {backend}: {reason}")]
    Connect {
        backend: &'static str,
        reason: String,
    },
    #[error("query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),
    #[error("query parameters do not fit the statement: {0}")]
    InvalidParams(String),
    #[error("connection was closed by shutdown")]
    ConnectionClosed,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl DataError {
    /// Errors that must reach the caller rather than trigger a fallback.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable { .. } | Self::QueryFailed(_) | Self::InvalidParams(_)
        )
    }
}

/// A live handle to the primary analytical backend.
///
/// Implementations must be safe for concurrent read queries; the gate hands
/// the same handle to every caller while the backend is available.
#[async_trait]
pub trait PrimaryBackend: Send + Sync {
    /// Cheapest round trip the backend understands.
    async fn ping(&self) -> Result<(), DataError>;

    async fn fetch_rows(&self, sql: &str, params: &[QueryParam]) -> Result<Vec<RowMap>, DataError>;

    /// Run a statement that returns no rows. Returns rows affected.
    async fn execute(&self, sql: &str) -> Result<u64, DataError>;

    /// Release the handle's resources. Errors are swallowed.
    async fn close(&self);

    fn name(&self) -> &str {
        "primary"
    }
}

/// Opens fresh handles to the primary backend.
#[async_trait]
pub trait PrimaryConnector: Send + Sync {
    async fn connect(&self) -> Result<PrimaryHandle, DataError>;
}

pub type PrimaryHandle = Arc<dyn PrimaryBackend>;
