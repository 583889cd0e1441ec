//! Retrying request execution against one target.
//!
//! Each attempt is bounded by its own deadline; a failed attempt is classified,
//! handed to the [`RetryPolicy`], and either retried after the policy's delay
//! or returned. Only the terminal outcome of a logical request touches the
//! target's health record.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};

use super::classify::{AttemptOutcome, classify, extract_detail, parse_retry_after};
use super::error::NetworkError;
use super::health::{HealthEvent, HealthTracker};
use super::request::RequestDescriptor;
use super::retry::{RetryDecision, RetryPolicy};
use super::target::Target;

/// Executes [`RequestDescriptor`]s with retries and health reporting.
#[derive(Debug, Clone)]
pub struct RequestExecutor {
    client: Client,
    target: Target,
    health: Arc<HealthTracker>,
    attempt_timeout: Duration,
}

impl RequestExecutor {
    #[must_use]
    pub fn new(
        client: Client,
        target: Target,
        health: Arc<HealthTracker>,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            client,
            target,
            health,
            attempt_timeout,
        }
    }

    #[must_use]
    pub fn target(&self) -> &Target {
        &self.target
    }

    #[must_use]
    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    /// Runs the request until it succeeds or the policy stops retrying.
    ///
    /// Returns the first 2xx response. The response body is left unread.
    ///
    /// # Errors
    ///
    /// Returns the [`NetworkError`] of the final failed attempt.
    #[instrument(skip(self, request, policy), fields(method = %request.method(), url = request.url()))]
    pub async fn execute(
        &self,
        request: &RequestDescriptor,
        policy: &RetryPolicy,
    ) -> Result<Response, NetworkError> {
        let mut attempt: u32 = 0;
        loop {
            debug!(attempt, "sending request");
            let started = Instant::now();

            let error = match self.attempt(request).await {
                Ok(response) => {
                    let latency = started.elapsed();
                    debug!(
                        attempt,
                        status = response.status().as_u16(),
                        latency_ms = latency.as_millis(),
                        "request succeeded"
                    );
                    self.health.apply(
                        self.target.as_str(),
                        HealthEvent::ConfirmedSuccess {
                            latency: Some(latency),
                        },
                    );
                    return Ok(response);
                }
                Err(error) => error,
            };

            match policy.should_retry(&error, attempt) {
                RetryDecision::Retry {
                    delay,
                    attempt: next_attempt,
                } => {
                    info!(
                        attempt = next_attempt,
                        max_retries = policy.max_retries(),
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "retrying request"
                    );
                    tokio::time::sleep(delay).await;
                    attempt = next_attempt;
                }
                RetryDecision::DoNotRetry { reason } => {
                    warn!(attempt, error = %error, reason = %reason, "request failed");
                    self.health.apply(self.target.as_str(), HealthEvent::Failure);
                    return Err(error);
                }
            }
        }
    }

    /// Runs the request and decodes a JSON body.
    ///
    /// # Errors
    ///
    /// Returns the terminal [`NetworkError`], or an `Unknown` error if the
    /// success body is not valid JSON for `T`. A decode failure does not
    /// trigger another attempt.
    pub async fn execute_json<T: DeserializeOwned>(
        &self,
        request: &RequestDescriptor,
        policy: &RetryPolicy,
    ) -> Result<T, NetworkError> {
        let response = self.execute(request, policy).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| NetworkError::unknown(format!("failed to decode response body: {e}")))
    }

    /// One attempt, bounded by the attempt deadline.
    async fn attempt(&self, request: &RequestDescriptor) -> Result<Response, NetworkError> {
        let started = Instant::now();
        let mut builder = self
            .client
            .request(request.method().clone(), request.url())
            .headers(request.headers().clone());
        if let Some(body) = request.body_bytes() {
            builder = builder.body(body.clone());
        }

        let response = match tokio::time::timeout(self.attempt_timeout, builder.send()).await {
            Err(_elapsed) => return Err(classify(&AttemptOutcome::TimedOut)),
            Ok(Err(e)) => return Err(classify(&AttemptOutcome::from_transport(&e))),
            Ok(Ok(response)) => response,
        };

        if response.status().is_success() {
            return Ok(response);
        }

        let remaining = self.attempt_timeout.saturating_sub(started.elapsed());
        Err(classify(&failed_response_outcome(response, remaining).await))
    }
}

/// Builds a status outcome, reading the error body within `budget`.
async fn failed_response_outcome(response: Response, budget: Duration) -> AttemptOutcome {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_retry_after);

    let detail = match tokio::time::timeout(budget, response.text()).await {
        Ok(Ok(body)) => extract_detail(&body),
        Ok(Err(e)) => {
            debug!(error = %e, "failed to read error body");
            None
        }
        Err(_elapsed) => None,
    };

    AttemptOutcome::Status {
        status: status.as_u16(),
        reason: status.canonical_reason().map(str::to_string),
        detail,
        retry_after,
    }
}
