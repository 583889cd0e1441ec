//! Per-target backend health tracking.
//!
//! The [`HealthTracker`] keeps one [`HealthStatus`] per target (base endpoint)
//! and is shared by every caller of that target. Records are created lazily on
//! first use and live until [`HealthTracker::reset`] or
//! [`HealthTracker::clear`].
//!
//! # State Machine
//!
//! A fresh record is `online = true, consecutive_errors = 0`.
//!
//! | Event | `consecutive_errors` | `online` |
//! |-------|----------------------|----------|
//! | `Success` | -1 (floor 0) | unchanged |
//! | `Failure` | +1 | `false` once >= 3 |
//! | `ConfirmedSuccess` | -1 (floor 0) | `true` |
//! | `MarkedOnline` | unchanged | `true` |
//! | `ProbeSucceeded` | 0 | `true` |
//! | `ProbeFailed` | +1 | `false` |
//!
//! `last_checked` is refreshed by every event.
//!
//! # Thread Safety
//!
//! Each event is applied under the `DashMap` entry guard, so a record is never
//! observed half-updated. Concurrent callers interleave in completion order;
//! only the net effect of increments and decrements is guaranteed.

use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Consecutive failures after which a target is considered offline.
pub const OFFLINE_THRESHOLD: u32 = 3;

/// Snapshot of one target's health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    /// Whether the target is considered reachable.
    pub online: bool,
    /// When the record was last updated.
    pub last_checked: SystemTime,
    /// Latency of the last measured request, if any.
    pub latency: Option<Duration>,
    /// Failures not yet offset by successes.
    pub consecutive_errors: u32,
}

impl HealthStatus {
    fn fresh() -> Self {
        Self {
            online: true,
            last_checked: SystemTime::now(),
            latency: None,
            consecutive_errors: 0,
        }
    }

    fn apply(&mut self, event: HealthEvent) {
        match event {
            HealthEvent::Success => {
                self.consecutive_errors = self.consecutive_errors.saturating_sub(1);
            }
            HealthEvent::Failure => {
                self.consecutive_errors = self.consecutive_errors.saturating_add(1);
                if self.consecutive_errors >= OFFLINE_THRESHOLD {
                    self.online = false;
                }
            }
            HealthEvent::ConfirmedSuccess { latency } => {
                self.consecutive_errors = self.consecutive_errors.saturating_sub(1);
                self.online = true;
                if latency.is_some() {
                    self.latency = latency;
                }
            }
            HealthEvent::MarkedOnline => {
                self.online = true;
            }
            HealthEvent::ProbeSucceeded { latency } => {
                self.online = true;
                self.consecutive_errors = 0;
                self.latency = Some(latency);
            }
            HealthEvent::ProbeFailed { latency } => {
                self.online = false;
                self.consecutive_errors = self.consecutive_errors.saturating_add(1);
                self.latency = latency;
            }
        }
        self.last_checked = SystemTime::now();
    }
}

/// A completed outcome to fold into a target's record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthEvent {
    /// A successful outcome that does not by itself prove recovery.
    Success,
    /// A failed terminal outcome.
    Failure,
    /// A successful terminal response from the executor.
    ConfirmedSuccess {
        /// Latency of the successful attempt.
        latency: Option<Duration>,
    },
    /// Explicit recovery without a counter change.
    MarkedOnline,
    /// The liveness probe got a 2xx.
    ProbeSucceeded {
        /// Round-trip time of the probe.
        latency: Duration,
    },
    /// The liveness probe got a non-2xx or no response.
    ProbeFailed {
        /// Round-trip time when a response did arrive.
        latency: Option<Duration>,
    },
}

/// Shared per-target health records.
#[derive(Debug, Default)]
pub struct HealthTracker {
    records: DashMap<String, HealthStatus>,
}

impl HealthTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one outcome into the target's record and returns the new snapshot.
    pub fn apply(&self, target: &str, event: HealthEvent) -> HealthStatus {
        let mut record = self
            .records
            .entry(target.to_string())
            .or_insert_with(HealthStatus::fresh);

        let was_online = record.online;
        record.apply(event);

        if was_online && !record.online {
            warn!(
                endpoint = target,
                consecutive_errors = record.consecutive_errors,
                "target marked offline"
            );
        } else if !was_online && record.online {
            info!(endpoint = target, "target back online");
        } else {
            debug!(endpoint = target, ?event, consecutive_errors = record.consecutive_errors, "health updated");
        }

        record.clone()
    }

    /// Records a plain success or failure.
    ///
    /// A success only lowers the error count; use [`mark_online`](Self::mark_online)
    /// or a [`HealthEvent::ConfirmedSuccess`] to bring an offline target back.
    pub fn record_outcome(&self, target: &str, success: bool) -> HealthStatus {
        let event = if success {
            HealthEvent::Success
        } else {
            HealthEvent::Failure
        };
        self.apply(target, event)
    }

    /// Explicitly marks the target online.
    pub fn mark_online(&self, target: &str) -> HealthStatus {
        self.apply(target, HealthEvent::MarkedOnline)
    }

    /// Returns the target's current snapshot. Unknown targets read as fresh
    /// without gaining a record.
    #[must_use]
    pub fn current_status(&self, target: &str) -> HealthStatus {
        self.records
            .get(target)
            .map_or_else(HealthStatus::fresh, |record| record.clone())
    }

    /// Forgets a target; the next use starts from a fresh record.
    pub fn reset(&self, target: &str) {
        self.records.remove(target);
    }

    /// Forgets every target.
    pub fn clear(&self) {
        self.records.clear();
    }

    /// Targets with a record, sorted.
    #[must_use]
    pub fn targets(&self) -> Vec<String> {
        let mut targets: Vec<String> = self.records.iter().map(|r| r.key().clone()).collect();
        targets.sort();
        targets
    }
}
