//! User-Agent string sent with every request.

/// Project URL for User-Agent identification (RFC 9308).
const PROJECT_UA_URL: &str = "https://github.com/fierce/firmament-net";

/// Default User-Agent identifying the client and its version.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("firmament-net/{version} (+{PROJECT_UA_URL})")
}
