//! File configuration for CLI defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use firmament_net::network::{
    ClientSettings, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, PolicyError, RetryPolicy,
};
use serde::Deserialize;

/// TOML-backed defaults. Every key is optional; CLI flags win over the file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Backend base URL.
    pub base_url: Option<String>,
    /// Retries after the first attempt (0..=10).
    pub max_retries: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub attempt_timeout_secs: Option<u64>,
    pub probe_timeout_secs: Option<u64>,
    pub stream_lifetime_secs: Option<u64>,
    pub verbosity: Option<VerbositySetting>,
}

/// Supported config verbosity labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerbositySetting {
    Default,
    Verbose,
    Quiet,
    Debug,
}

impl VerbositySetting {
    /// Default tracing level for this setting.
    #[must_use]
    pub fn level(self) -> &'static str {
        match self {
            Self::Default => "info",
            Self::Verbose => "debug",
            Self::Quiet => "error",
            Self::Debug => "trace",
        }
    }
}

impl FileConfig {
    /// Validates values against the ranges the CLI accepts.
    pub fn validate(&self) -> Result<()> {
        if let Some(max_retries) = self.max_retries
            && max_retries > 10
        {
            bail!("Invalid config value for `max_retries`: {max_retries}. Expected range: 0..=10");
        }
        if let Some(multiplier) = self.backoff_multiplier
            && !(multiplier.is_finite() && multiplier >= 1.0)
        {
            bail!("Invalid config value for `backoff_multiplier`: {multiplier}. Expected >= 1");
        }
        if self.base_delay_ms.is_some() || self.max_delay_ms.is_some() {
            let base = self.base_delay_ms.unwrap_or_else(|| duration_ms(DEFAULT_BASE_DELAY));
            let max = self.max_delay_ms.unwrap_or_else(|| duration_ms(DEFAULT_MAX_DELAY));
            if max < base {
                bail!("Invalid config: `max_delay_ms` ({max}) is below `base_delay_ms` ({base})");
            }
        }
        validate_timeout_secs("attempt_timeout_secs", self.attempt_timeout_secs)?;
        validate_timeout_secs("probe_timeout_secs", self.probe_timeout_secs)?;
        validate_timeout_secs("stream_lifetime_secs", self.stream_lifetime_secs)?;
        Ok(())
    }

    /// Retry policy from the file, falling back to library defaults.
    pub fn retry_policy(&self) -> Result<RetryPolicy, PolicyError> {
        let defaults = RetryPolicy::default();
        RetryPolicy::new(
            self.max_retries.unwrap_or(defaults.max_retries()),
            self.base_delay_ms
                .map_or(defaults.base_delay(), Duration::from_millis),
            self.max_delay_ms
                .map_or(defaults.max_delay(), Duration::from_millis),
            self.backoff_multiplier
                .unwrap_or(defaults.backoff_multiplier()),
        )
    }

    /// Client settings from the file, falling back to library defaults.
    #[must_use]
    pub fn client_settings(&self) -> ClientSettings {
        let mut settings = ClientSettings::default();
        if let Some(secs) = self.attempt_timeout_secs {
            settings = settings.with_attempt_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.probe_timeout_secs {
            settings = settings.with_probe_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.stream_lifetime_secs {
            settings = settings.with_stream_lifetime(Duration::from_secs(secs));
        }
        settings
    }
}

fn validate_timeout_secs(field: &str, value: Option<u64>) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(1..=3600).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: 1..=3600");
    }
    Ok(())
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/firmament-net/config.toml`
/// 2. `$HOME/.config/firmament-net/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("firmament-net")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("firmament-net")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads the config file.
///
/// An explicit path must exist. The default path is optional: a missing file
/// yields the empty config.
pub fn load(explicit: Option<&Path>) -> Result<FileConfig> {
    if let Some(path) = explicit {
        return load_file_config(path);
    }
    match resolve_default_config_path() {
        Some(path) if path.exists() => load_file_config(&path),
        _ => Ok(FileConfig::default()),
    }
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let config: FileConfig = toml::from_str(raw)?;
    config.validate()?;
    Ok(config)
}
