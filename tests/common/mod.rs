//! Shared helpers for socket-bound integration tests.

#![allow(dead_code)]

use std::net::TcpListener;
use std::panic::Location;
use std::sync::Arc;
use std::time::Duration;

use firmament_net::network::{ClientSettings, HealthTracker, NetworkClient};
use wiremock::MockServer;

const REQUIRE_SOCKETS_ENV: &str = "FIRMAMENT_REQUIRE_SOCKET_TESTS";

fn socket_tests_required() -> bool {
    std::env::var(REQUIRE_SOCKETS_ENV)
        .ok()
        .is_some_and(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

/// Returns true (after logging why) when localhost sockets are unavailable.
///
/// Panics instead when `FIRMAMENT_REQUIRE_SOCKET_TESTS` is set, so CI cannot
/// silently skip.
#[track_caller]
pub fn sockets_unavailable() -> bool {
    if TcpListener::bind("127.0.0.1:0").is_ok() {
        return false;
    }

    let location = Location::caller();
    let message = format!(
        "[socket-bound-test] cannot bind localhost at {}:{}",
        location.file(),
        location.line()
    );
    assert!(
        !socket_tests_required(),
        "{message}; unset {REQUIRE_SOCKETS_ENV} to allow skipping"
    );
    eprintln!("{message}; skipping. Set {REQUIRE_SOCKETS_ENV}=1 to fail instead.");
    true
}

pub async fn start_mock_server_or_skip() -> Option<MockServer> {
    if sockets_unavailable() {
        None
    } else {
        Some(MockServer::start().await)
    }
}

/// A base URL on a port that was just released, so connections are refused.
pub fn refused_base_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

/// Settings with short deadlines so timeout paths finish quickly.
pub fn fast_settings() -> ClientSettings {
    ClientSettings::default()
        .with_attempt_timeout(Duration::from_secs(2))
        .with_probe_timeout(Duration::from_secs(1))
}

pub fn client_for(base_url: &str, settings: &ClientSettings) -> NetworkClient {
    NetworkClient::new(base_url, settings, Arc::new(HealthTracker::new())).unwrap()
}
