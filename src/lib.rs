//! firmament-net: resilient network layer for a document-processing backend.
//!
//! Wraps HTTP access to one or more backend targets with failure
//! classification, exponential-backoff retries, per-target health tracking,
//! liveness probes and server-sent progress streams.
//!
//! # Architecture
//!
//! Everything lives in [`network`]; the most used types are re-exported here.

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod network;
mod user_agent;

// Re-export commonly used types
pub use network::{
    ClientRegistry, ClientSettings, ErrorDetails, ErrorKind, HealthStatus, HealthTracker,
    NetworkClient, NetworkError, ProgressCallbacks, ProgressEvent, RequestDescriptor,
    RetryPolicy, StreamHandle,
};
