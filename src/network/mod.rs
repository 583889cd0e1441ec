//! Resilient HTTP access to backend targets.
//!
//! This module turns raw request outcomes into classified [`NetworkError`]s,
//! retries transient failures with exponential backoff, tracks per-target
//! health, probes liveness, and streams job progress over server-sent events.
//!
//! # Architecture
//!
//! - [`classify()`] maps attempt outcomes to errors (pure).
//! - [`RetryPolicy`] decides whether and when to try again (pure).
//! - [`HealthTracker`] holds one [`HealthStatus`] per target, shared by all callers.
//! - [`RequestExecutor`] drives attempts, deadlines and backoff, and reports
//!   terminal outcomes to the tracker.
//! - [`HealthProbe`] sends a single liveness check.
//! - [`ProgressStreamManager`] owns progress subscriptions.
//! - [`NetworkClient`] bundles the above for one target, and
//!   [`ClientRegistry`] hands out one client per target.

mod classify;
mod client;
mod descriptor;
mod error;
mod executor;
mod health;
mod probe;
mod progress;
mod registry;
mod request;
mod retry;
mod target;

pub use classify::{AttemptOutcome, classify, extract_detail, kind_for_status, parse_retry_after};
pub use client::{
    ClientSettings, DEFAULT_ATTEMPT_TIMEOUT, DEFAULT_CONNECT_TIMEOUT, NetworkClient,
    build_http_client,
};
pub use descriptor::ErrorDetails;
pub use error::{ErrorKind, NetworkError, PolicyError, SetupError};
pub use executor::RequestExecutor;
pub use health::{HealthEvent, HealthStatus, HealthTracker, OFFLINE_THRESHOLD};
pub use probe::{DEFAULT_PROBE_PATH, DEFAULT_PROBE_TIMEOUT, HealthProbe, ProbeReport};
pub use progress::{
    DEFAULT_STREAM_LIFETIME, FINAL_STAGES, ProgressCallbacks, ProgressEvent,
    ProgressStreamManager, StreamError, StreamHandle,
};
pub use registry::ClientRegistry;
pub use request::{HeaderError, RequestDescriptor};
pub use retry::{
    DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MAX_RETRIES,
    RetryDecision, RetryPolicy,
};
pub use target::Target;
