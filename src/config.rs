// Client configuration
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{BreweryDbError, Result};

pub const DEFAULT_BASE_URL: &str = "http://www.brewerydb.com/api";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

pub const ENV_API_KEY: &str = "BREWERYDB_API_KEY";
pub const ENV_FORMAT: &str = "BREWERYDB_FORMAT";
pub const ENV_BASE_URL: &str = "BREWERYDB_BASE_URL";
pub const ENV_TIMEOUT_MS: &str = "BREWERYDB_TIMEOUT_MS";

/// Response format requested from the service through the `format` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    #[default]
    Json,
    Xml,
}

impl ResponseFormat {
    /// Case-insensitive parse that falls back to JSON for anything other than
    /// "json" or "xml".
    pub fn from_lenient(value: &str) -> Self {
        if value.eq_ignore_ascii_case("xml") {
            ResponseFormat::Xml
        } else {
            ResponseFormat::Json
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseFormat::Json => "json",
            ResponseFormat::Xml => "xml",
        }
    }
}

impl fmt::Display for ResponseFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// How to treat a body that does not parse as the requested format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodePolicy {
    // Malformed bodies fail the call with `BreweryDbError::Decode`
    #[default]
    Strict,
    // Malformed JSON becomes `null`, malformed XML an empty mapping
    Lenient,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_key: String,
    pub base_url: String,
    pub format: ResponseFormat,
    pub timeout_ms: u64,
    /// Skips TLS certificate verification. Only for endpoints with broken
    /// certificates; never enable it against untrusted networks.
    pub accept_invalid_certs: bool,
    pub decode_policy: DecodePolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            format: ResponseFormat::Json,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            accept_invalid_certs: false,
            decode_policy: DecodePolicy::Strict,
        }
    }
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    // Reads the key and optional overrides from BREWERYDB_* variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup(ENV_API_KEY).ok_or_else(|| {
            BreweryDbError::Configuration(format!("{} is not set", ENV_API_KEY))
        })?;

        let mut config = Self::new(api_key);

        if let Some(format) = lookup(ENV_FORMAT) {
            config.format = ResponseFormat::from_lenient(&format);
        }
        if let Some(base_url) = lookup(ENV_BASE_URL) {
            config.base_url = base_url;
        }
        if let Some(timeout) = lookup(ENV_TIMEOUT_MS) {
            config.timeout_ms = timeout.trim().parse().map_err(|_| {
                BreweryDbError::Configuration(format!(
                    "{} must be a number of milliseconds, got {:?}",
                    ENV_TIMEOUT_MS, timeout
                ))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_format(mut self, format: ResponseFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_decode_policy(mut self, policy: DecodePolicy) -> Self {
        self.decode_policy = policy;
        self
    }

    pub fn danger_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    // The key itself is not checked: an empty key is dropped from the query
    // like any other empty parameter and the service answers with an error.
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(BreweryDbError::Configuration(
                "base url must not be empty".to_string(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(BreweryDbError::Configuration(
                "timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
