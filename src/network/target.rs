//! Normalized base endpoints.

use std::fmt;

use url::Url;

use super::error::SetupError;

/// A backend base endpoint: the unit of health tracking.
///
/// Always an absolute http(s) URL whose path ends in `/`, without query or
/// fragment, so endpoint paths can be appended directly.
///
/// ```
/// use firmament_net::network::Target;
///
/// let target = Target::parse("https://api.example.com/v1").unwrap();
/// assert_eq!(target.as_str(), "https://api.example.com/v1/");
/// assert_eq!(target.url_for("/progress/42"), "https://api.example.com/v1/progress/42");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    base: Url,
}

impl Target {
    /// Parses and normalizes a base endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::InvalidTarget`] if the URL does not parse, is not
    /// http/https, or has no host.
    pub fn parse(base_url: &str) -> Result<Self, SetupError> {
        let mut base = Url::parse(base_url.trim())
            .map_err(|e| SetupError::invalid_target(base_url, e.to_string()))?;

        if !matches!(base.scheme(), "http" | "https") {
            return Err(SetupError::invalid_target(
                base_url,
                format!("unsupported scheme '{}'", base.scheme()),
            ));
        }
        if base.host_str().is_none_or(str::is_empty) {
            return Err(SetupError::invalid_target(base_url, "missing host"));
        }

        base.set_query(None);
        base.set_fragment(None);
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self { base })
    }

    /// The normalized base URL, always ending in `/`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.base.as_str()
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.base
    }

    /// Appends an endpoint path to the base. Leading slashes are ignored so the
    /// base path is always kept.
    #[must_use]
    pub fn url_for(&self, endpoint: &str) -> String {
        format!("{}{}", self.base, endpoint.trim_start_matches('/'))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
