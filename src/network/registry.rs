//! One shared client per target.

use std::sync::Arc;

use dashmap::DashMap;
use reqwest::Client;
use tracing::debug;

use super::client::{ClientSettings, NetworkClient, build_http_client};
use super::error::SetupError;
use super::health::HealthTracker;
use super::target::Target;

/// Hands out one [`NetworkClient`] per normalized target.
///
/// All clients share one HTTP connection pool and one [`HealthTracker`], so
/// every caller of a target sees the same health record.
#[derive(Debug)]
pub struct ClientRegistry {
    settings: ClientSettings,
    http: Client,
    health: Arc<HealthTracker>,
    clients: DashMap<Target, Arc<NetworkClient>>,
}

impl ClientRegistry {
    /// # Errors
    ///
    /// Returns [`SetupError::HttpClient`] if the HTTP client cannot be built.
    pub fn new(settings: ClientSettings) -> Result<Self, SetupError> {
        let http = build_http_client(&settings)?;
        Ok(Self {
            settings,
            http,
            health: Arc::new(HealthTracker::new()),
            clients: DashMap::new(),
        })
    }

    /// Returns the client for `base_url`, creating it on first use.
    ///
    /// URLs that normalize to the same target share a client.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::InvalidTarget`] if `base_url` is not a valid
    /// http(s) URL.
    pub fn client_for(&self, base_url: &str) -> Result<Arc<NetworkClient>, SetupError> {
        let target = Target::parse(base_url)?;
        if let Some(client) = self.clients.get(&target) {
            return Ok(Arc::clone(client.value()));
        }

        let client = self
            .clients
            .entry(target.clone())
            .or_insert_with(|| {
                debug!(endpoint = target.as_str(), "registering client");
                Arc::new(NetworkClient::with_http_client(
                    target.clone(),
                    &self.settings,
                    self.http.clone(),
                    Arc::clone(&self.health),
                ))
            })
            .clone();
        Ok(client)
    }

    #[must_use]
    pub fn health_tracker(&self) -> Arc<HealthTracker> {
        Arc::clone(&self.health)
    }

    #[must_use]
    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Drops the client and health record for `base_url`. Returns whether a
    /// client was registered.
    pub fn remove(&self, base_url: &str) -> bool {
        let Ok(target) = Target::parse(base_url) else {
            return false;
        };
        self.health.reset(target.as_str());
        self.clients.remove(&target).is_some()
    }

    /// Drops every client and health record.
    pub fn clear(&self) {
        self.clients.clear();
        self.health.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
