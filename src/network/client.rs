//! Per-target client facade.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::error::{NetworkError, SetupError};
use super::executor::RequestExecutor;
use super::health::{HealthStatus, HealthTracker};
use super::probe::{DEFAULT_PROBE_PATH, DEFAULT_PROBE_TIMEOUT, HealthProbe, ProbeReport};
use super::progress::{
    DEFAULT_STREAM_LIFETIME, ProgressCallbacks, ProgressStreamManager, StreamHandle,
};
use super::request::RequestDescriptor;
use super::retry::RetryPolicy;
use super::target::Target;
use crate::user_agent::default_user_agent;

/// Default per-attempt deadline.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default TCP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings shared by every client built from them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub attempt_timeout: Duration,
    pub connect_timeout: Duration,
    pub probe_timeout: Duration,
    pub probe_path: String,
    pub stream_lifetime: Duration,
    pub user_agent: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            probe_path: DEFAULT_PROBE_PATH.to_string(),
            stream_lifetime: DEFAULT_STREAM_LIFETIME,
            user_agent: default_user_agent(),
        }
    }
}

impl ClientSettings {
    #[must_use]
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_probe_path(mut self, path: impl Into<String>) -> Self {
        self.probe_path = path.into();
        self
    }

    #[must_use]
    pub fn with_stream_lifetime(mut self, lifetime: Duration) -> Self {
        self.stream_lifetime = lifetime;
        self
    }
}

/// Builds the shared HTTP client.
///
/// Only the connect phase has a client-wide timeout. Request deadlines are
/// applied per attempt, and progress streams must be able to stay open for
/// their whole lifetime.
///
/// # Errors
///
/// Returns [`SetupError::HttpClient`] if the TLS backend or system
/// configuration cannot be loaded.
pub fn build_http_client(settings: &ClientSettings) -> Result<Client, SetupError> {
    Client::builder()
        .connect_timeout(settings.connect_timeout)
        .gzip(true)
        .user_agent(settings.user_agent.as_str())
        .build()
        .map_err(|source| SetupError::HttpClient { source })
}

/// Everything needed to talk to one target: retrying requests, liveness
/// probes, progress streams and the target's health record.
///
/// ```no_run
/// use std::sync::Arc;
/// use firmament_net::network::{
///     ClientSettings, HealthTracker, NetworkClient, RequestDescriptor, RetryPolicy,
/// };
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = NetworkClient::new(
///     "http://localhost:8000",
///     &ClientSettings::default(),
///     Arc::new(HealthTracker::new()),
/// )?;
/// let request = RequestDescriptor::get(client.url_for("jobs"));
/// let response = client.execute(&request, &RetryPolicy::default()).await?;
/// println!("{}", response.status());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct NetworkClient {
    target: Target,
    health: Arc<HealthTracker>,
    executor: RequestExecutor,
    probe: HealthProbe,
    progress: ProgressStreamManager,
}

impl NetworkClient {
    /// Builds a client for `base_url` with its own HTTP connection pool.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError`] if the URL is invalid or the HTTP client cannot
    /// be built.
    pub fn new(
        base_url: &str,
        settings: &ClientSettings,
        health: Arc<HealthTracker>,
    ) -> Result<Self, SetupError> {
        let target = Target::parse(base_url)?;
        let http = build_http_client(settings)?;
        Ok(Self::with_http_client(target, settings, http, health))
    }

    /// Builds a client that shares an existing HTTP connection pool.
    #[must_use]
    pub fn with_http_client(
        target: Target,
        settings: &ClientSettings,
        http: Client,
        health: Arc<HealthTracker>,
    ) -> Self {
        debug!(endpoint = target.as_str(), "creating network client");
        let executor = RequestExecutor::new(
            http.clone(),
            target.clone(),
            Arc::clone(&health),
            settings.attempt_timeout,
        );
        let probe = HealthProbe::new(http.clone(), target.clone(), Arc::clone(&health))
            .with_path(settings.probe_path.clone())
            .with_timeout(settings.probe_timeout);
        let progress = ProgressStreamManager::new(http, target.clone())
            .with_max_lifetime(settings.stream_lifetime);

        Self {
            target,
            health,
            executor,
            probe,
            progress,
        }
    }

    #[must_use]
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Absolute URL for an endpoint on this target.
    #[must_use]
    pub fn url_for(&self, endpoint: &str) -> String {
        self.target.url_for(endpoint)
    }

    #[must_use]
    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    #[must_use]
    pub fn progress_streams(&self) -> &ProgressStreamManager {
        &self.progress
    }

    /// See [`RequestExecutor::execute`].
    ///
    /// # Errors
    ///
    /// Returns the terminal [`NetworkError`].
    pub async fn execute(
        &self,
        request: &RequestDescriptor,
        policy: &RetryPolicy,
    ) -> Result<Response, NetworkError> {
        self.executor.execute(request, policy).await
    }

    /// See [`RequestExecutor::execute_json`].
    ///
    /// # Errors
    ///
    /// Returns the terminal [`NetworkError`] or a decode failure.
    pub async fn execute_json<T: DeserializeOwned>(
        &self,
        request: &RequestDescriptor,
        policy: &RetryPolicy,
    ) -> Result<T, NetworkError> {
        self.executor.execute_json(request, policy).await
    }

    pub async fn probe(&self) -> HealthStatus {
        self.probe.probe().await
    }

    pub async fn check(&self) -> ProbeReport {
        self.probe.check().await
    }

    pub async fn is_reachable(&self) -> bool {
        self.probe.is_reachable().await
    }

    /// Current health snapshot for this target.
    #[must_use]
    pub fn health(&self) -> HealthStatus {
        self.health.current_status(self.target.as_str())
    }

    #[must_use]
    pub fn health_tracker(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    /// Subscribes to a job's progress stream. Must be called within a Tokio
    /// runtime.
    pub fn subscribe_progress(&self, job_id: &str, callbacks: ProgressCallbacks) -> StreamHandle {
        self.progress.subscribe(job_id, callbacks)
    }
}
