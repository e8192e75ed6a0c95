//! Transport configuration

use crate::{Error, Result};
use std::collections::BTreeMap;
use std::env;

/// Environment variable holding the provider base URL
pub const BASE_URL_ENV: &str = "AGENT_TURN_BASE_URL";

/// Environment variable holding the request timeout in seconds
pub const TIMEOUT_ENV: &str = "AGENT_TURN_TIMEOUT";

const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Settings shared by every request a [`Transport`](crate::Transport) sends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Base URL that request paths are resolved against
    pub base_url: String,

    /// Headers sent with every request; per-request headers override by name
    pub default_headers: BTreeMap<String, String>,

    /// Request timeout in seconds
    pub timeout: u64,
}

impl TransportConfig {
    /// Create a new builder for TransportConfig
    pub fn builder() -> TransportConfigBuilder {
        TransportConfigBuilder::default()
    }

    /// Build a config from the environment.
    ///
    /// `AGENT_TURN_BASE_URL` is required; `AGENT_TURN_TIMEOUT` falls back to
    /// 60 seconds.
    ///
    /// ```rust,no_run
    /// use agent_turn::TransportConfig;
    ///
    /// let config = TransportConfig::from_env()?;
    /// # Ok::<(), agent_turn::Error>(())
    /// ```
    pub fn from_env() -> Result<Self> {
        let base_url = env::var(BASE_URL_ENV)
            .map_err(|_| Error::config(format!("{} is not set", BASE_URL_ENV)))?;

        let mut builder = Self::builder().base_url(base_url);
        if let Ok(raw) = env::var(TIMEOUT_ENV) {
            let timeout = raw
                .trim()
                .parse::<u64>()
                .map_err(|_| Error::config(format!("{} must be whole seconds", TIMEOUT_ENV)))?;
            builder = builder.timeout(timeout);
        }
        builder.build()
    }
}

/// Builder for TransportConfig
#[derive(Debug, Default)]
pub struct TransportConfigBuilder {
    base_url: Option<String>,
    default_headers: BTreeMap<String, String>,
    timeout: Option<u64>,
}

impl TransportConfigBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Add a default header. Header names are case-insensitive, so the name
    /// is stored lowercased and a later call with the same name wins.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn timeout(mut self, seconds: u64) -> Self {
        self.timeout = Some(seconds);
        self
    }

    pub fn build(self) -> Result<TransportConfig> {
        let base_url = self
            .base_url
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| Error::config("base_url is required"))?;

        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout == 0 {
            return Err(Error::config("timeout must be greater than zero"));
        }

        Ok(TransportConfig {
            base_url,
            default_headers: self.default_headers,
            timeout,
        })
    }
}
