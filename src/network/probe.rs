//! Liveness probing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Client;
use reqwest::header::CACHE_CONTROL;
use tracing::{debug, instrument};

use super::classify::{AttemptOutcome, classify};
use super::error::NetworkError;
use super::health::{HealthEvent, HealthStatus, HealthTracker};
use super::target::Target;

/// Default probe deadline.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default probe endpoint, relative to the target.
pub const DEFAULT_PROBE_PATH: &str = "health";

/// Result of a single probe.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    /// The target's record after the probe was applied.
    pub status: HealthStatus,
    /// Why the probe failed, if it did.
    pub error: Option<NetworkError>,
}

/// Sends a single GET to the target's health endpoint and records the result.
///
/// Never retries. Probe results overwrite the record directly: a 2xx clears the
/// error count, anything else marks the target offline.
#[derive(Debug, Clone)]
pub struct HealthProbe {
    client: Client,
    target: Target,
    health: Arc<HealthTracker>,
    path: String,
    timeout: Duration,
}

impl HealthProbe {
    #[must_use]
    pub fn new(client: Client, target: Target, health: Arc<HealthTracker>) -> Self {
        Self {
            client,
            target,
            health,
            path: DEFAULT_PROBE_PATH.to_string(),
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Probes and returns the updated snapshot.
    pub async fn probe(&self) -> HealthStatus {
        self.check().await.status
    }

    /// Probes and reports whether the target answered with a 2xx.
    pub async fn is_reachable(&self) -> bool {
        self.check().await.status.online
    }

    /// Probes and returns the snapshot along with the failure, if any.
    #[instrument(skip(self), fields(endpoint = self.target.as_str()))]
    pub async fn check(&self) -> ProbeReport {
        let url = self.target.url_for(&self.path);
        let started = Instant::now();
        let request = self
            .client
            .get(&url)
            .header(CACHE_CONTROL, "no-cache")
            .send();

        let (event, error) = match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(response)) => {
                let latency = started.elapsed();
                let status = response.status();
                if status.is_success() {
                    (HealthEvent::ProbeSucceeded { latency }, None)
                } else {
                    let outcome = AttemptOutcome::Status {
                        status: status.as_u16(),
                        reason: status.canonical_reason().map(str::to_string),
                        detail: None,
                        retry_after: None,
                    };
                    (
                        HealthEvent::ProbeFailed {
                            latency: Some(latency),
                        },
                        Some(classify(&outcome)),
                    )
                }
            }
            Ok(Err(e)) => (
                HealthEvent::ProbeFailed { latency: None },
                Some(classify(&AttemptOutcome::from_transport(&e))),
            ),
            Err(_elapsed) => (
                HealthEvent::ProbeFailed { latency: None },
                Some(classify(&AttemptOutcome::TimedOut)),
            ),
        };

        if let Some(error) = &error {
            debug!(url = %url, error = %error, "health probe failed");
        }

        ProbeReport {
            status: self.health.apply(self.target.as_str(), event),
            error,
        }
    }
}
