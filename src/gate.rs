// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Primary backend gate.
//!
//! Owns the shared handle to the primary backend and decides, per call,
//! whether that handle may be used.
//!
//! ```text
//!              connect + heartbeat ok
//!   Unknown ───────────────────────────→ Available
//!      │  ↑                                  │
//!      │  └──────── heartbeat failed ────────┘
//!      │
//!      └── max_attempts exhausted ──→ Unavailable ──(ReprobePolicy::After)──→ probe again
//! ```
//!
//! # Locking
//!
//! State lives behind a short `parking_lot::RwLock` that is never held
//! across an await. Reconnects are serialized by an async mutex taken with
//! `try_lock`: the caller that wins runs the retry sequence, everyone else
//! gets `None` straight away and falls back. Every state change bumps a
//! generation counter so a caller holding an old handle can tell that
//! someone else already replaced it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::resilience::probe::LivenessProber;
use crate::resilience::retry::{retry, BackoffPolicy};
use crate::storage::traits::{DataError, PrimaryBackend, PrimaryConnector, PrimaryHandle};

/// Availability of the primary backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendAvailability {
    /// Never probed, or invalidated by a failed heartbeat
    Unknown = 0,
    /// A verified handle is cached
    Available = 1,
    /// Reconnect attempts were exhausted
    Unavailable = 2,
}

impl std::fmt::Display for BackendAvailability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Available => write!(f, "available"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// What to do once the primary has been declared unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReprobePolicy {
    /// Stay on the fallback until shutdown
    #[default]
    Never,
    /// Allow one new probe cycle once the gate has been unavailable this long
    After(Duration),
}

struct GateState {
    availability: BackendAvailability,
    handle: Option<PrimaryHandle>,
    generation: u64,
    unavailable_since: Option<Instant>,
}

enum Snapshot {
    Live(PrimaryHandle, u64),
    Unknown,
    Unavailable { reprobe_due: bool },
}

pub struct PrimaryGate {
    connector: Option<Arc<dyn PrimaryConnector>>,
    policy: BackoffPolicy,
    prober: LivenessProber,
    reprobe: ReprobePolicy,
    state: RwLock<GateState>,
    reconnect: Mutex<()>,
    sequences: AtomicU64,
}

impl PrimaryGate {
    /// Gate over `connector`. `None` means no primary is configured and the
    /// gate is permanently unavailable.
    #[must_use]
    pub fn new(
        connector: Option<Arc<dyn PrimaryConnector>>,
        policy: BackoffPolicy,
        prober: LivenessProber,
        reprobe: ReprobePolicy,
    ) -> Self {
        let availability = Self::initial_availability(connector.is_some());
        crate::metrics::set_primary_availability(availability as u8);
        Self {
            connector,
            policy,
            prober,
            reprobe,
            state: RwLock::new(GateState {
                availability,
                handle: None,
                generation: 0,
                unavailable_since: None,
            }),
            reconnect: Mutex::new(()),
            sequences: AtomicU64::new(0),
        }
    }

    fn initial_availability(configured: bool) -> BackendAvailability {
        if configured {
            BackendAvailability::Unknown
        } else {
            BackendAvailability::Unavailable
        }
    }

    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.connector.is_some()
    }

    #[must_use]
    pub fn availability(&self) -> BackendAvailability {
        self.state.read().availability
    }

    /// Number of reconnect sequences started since construction.
    #[must_use]
    pub fn reconnect_sequences(&self) -> u64 {
        self.sequences.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    fn snapshot(&self) -> Snapshot {
        let state = self.state.read();
        match (state.availability, &state.handle) {
            (BackendAvailability::Available, Some(handle)) => Snapshot::Live(handle.clone(), state.generation),
            (BackendAvailability::Unavailable, _) => Snapshot::Unavailable {
                reprobe_due: self.reprobe_due(&state),
            },
            _ => Snapshot::Unknown,
        }
    }

    fn reprobe_due(&self, state: &GateState) -> bool {
        match (self.reprobe, state.unavailable_since) {
            (ReprobePolicy::After(after), Some(since)) => since.elapsed() >= after,
            _ => false,
        }
    }

    /// A verified primary handle, or `None` if the caller should fall back.
    ///
    /// Never returns an error: connect and heartbeat failures are logged and
    /// turned into `None`.
    pub async fn get_handle(&self) -> Option<PrimaryHandle> {
        let connector = self.connector.clone()?;

        match self.snapshot() {
            Snapshot::Live(handle, generation) => {
                if self.prober.probe(handle.as_ref()).await {
                    return Some(handle);
                }
                warn!(generation, "Primary heartbeat failed, re-probing");

                let Ok(_guard) = self.reconnect.try_lock() else {
                    debug!("Reconnect already in flight, falling back");
                    return None;
                };

                let stale = {
                    let mut state = self.state.write();
                    if state.generation == generation && state.availability == BackendAvailability::Available {
                        state.availability = BackendAvailability::Unknown;
                        state.generation += 1;
                        state.handle.take()
                    } else {
                        None
                    }
                };
                if let Some(old) = stale {
                    crate::metrics::set_primary_availability(BackendAvailability::Unknown as u8);
                    old.close().await;
                }

                self.reconnect_locked(connector.as_ref()).await
            }
            Snapshot::Unavailable { reprobe_due: false } => None,
            Snapshot::Unknown | Snapshot::Unavailable { reprobe_due: true } => {
                let Ok(_guard) = self.reconnect.try_lock() else {
                    debug!("Reconnect already in flight, falling back");
                    return None;
                };
                self.reconnect_locked(connector.as_ref()).await
            }
        }
    }

    /// Run one bounded reconnect sequence. Caller must hold `self.reconnect`.
    async fn reconnect_locked(&self, connector: &dyn PrimaryConnector) -> Option<PrimaryHandle> {
        {
            let state = self.state.read();
            match state.availability {
                BackendAvailability::Available => return state.handle.clone(),
                BackendAvailability::Unavailable if !self.reprobe_due(&state) => return None,
                _ => {}
            }
        }

        self.sequences.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();
        let mut attempts = 0u32;

        let result = retry("primary_reconnect", &self.policy, || {
            attempts += 1;
            self.open_verified(connector)
        })
        .await;

        let elapsed = started.elapsed();
        match result {
            Ok(handle) => {
                let generation = {
                    let mut state = self.state.write();
                    state.availability = BackendAvailability::Available;
                    state.handle = Some(handle.clone());
                    state.generation += 1;
                    state.unavailable_since = None;
                    state.generation
                };
                crate::metrics::set_primary_availability(BackendAvailability::Available as u8);
                crate::metrics::record_reconnect("success", attempts, elapsed);
                info!(
                    backend = handle.name(),
                    attempts,
                    generation,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Primary backend available"
                );
                Some(handle)
            }
            Err(e) => {
                {
                    let mut state = self.state.write();
                    state.availability = BackendAvailability::Unavailable;
                    state.handle = None;
                    state.generation += 1;
                    state.unavailable_since = Some(Instant::now());
                }
                crate::metrics::set_primary_availability(BackendAvailability::Unavailable as u8);
                crate::metrics::record_reconnect("exhausted", attempts, elapsed);
                let exhausted = DataError::ReconnectExhausted { attempts };
                warn!(
                    error = %exhausted,
                    last_error = %e,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Primary backend unavailable, using fallback"
                );
                None
            }
        }
    }

    /// Connect and heartbeat. A handle that fails its first heartbeat is closed.
    async fn open_verified(&self, connector: &dyn PrimaryConnector) -> Result<PrimaryHandle, DataError> {
        let handle = connector.connect().await?;
        if let Err(e) = self.prober.check(handle.as_ref()).await {
            handle.close().await;
            return Err(e);
        }
        Ok(handle)
    }

    /// Close the cached handle and return to the initial state.
    ///
    /// Waits for an in-flight reconnect to finish so its handle is not leaked.
    pub async fn close(&self) {
        let _guard = self.reconnect.lock().await;
        let handle = {
            let mut state = self.state.write();
            state.availability = Self::initial_availability(self.connector.is_some());
            state.generation += 1;
            state.unavailable_since = None;
            state.handle.take()
        };
        crate::metrics::set_primary_availability(self.availability() as u8);
        if let Some(handle) = handle {
            handle.close().await;
            info!("Primary handle closed");
        }
    }
}
