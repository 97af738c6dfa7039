//! Error types for the configuration, credential, cache and fetch layers.
//!
//! Each enum carries a `user_message()` suitable for printing to the
//! terminal; the `Display` output keeps the technical detail for logs.

use std::{fmt, path::PathBuf};

use thiserror::Error;

use crate::config::ConfigSource;

/// Startup configuration errors. These fail fast.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {field} (from {origin}): {reason}")]
    InvalidValue {
        field: &'static str,
        origin: ConfigSource,
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(
        field: &'static str,
        origin: ConfigSource,
        reason: impl Into<String>,
    ) -> Self {
        ConfigError::InvalidValue { field, origin, reason: reason.into() }
    }

    pub fn user_message(&self) -> String {
        match self {
            ConfigError::InvalidValue { field, origin, reason } => {
                format!("Setting {field} from {origin} is invalid: {reason}")
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("the configured credential has an invalid format: {0}")]
    InvalidFormat(&'static str),

    #[error("no secure credential backend is available on this system")]
    BackendUnavailable,

    #[error("secure credential backend failed: {0}")]
    BackendFailure(String),

    #[error("failed to update credential file {path}: {source}")]
    FileFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CredentialError {
    pub fn user_message(&self) -> &'static str {
        match self {
            CredentialError::InvalidFormat(_) => {
                "The API key does not look valid (expected 16-64 characters, no spaces)."
            }
            CredentialError::BackendUnavailable => {
                "Secure keyring storage is not available on this system."
            }
            CredentialError::BackendFailure(_) => "The system keyring rejected the request.",
            CredentialError::FileFailure { .. } => "Could not update the API key file.",
        }
    }
}

/// Cache persistence errors. Always recovered locally.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache file I/O failed for {path}: {source}")]
    IoFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache file {path} could not be parsed: {source}")]
    ParseFailure {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::IoFailure { path: path.into(), source }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            CacheError::IoFailure { .. } => "The cache file could not be read or written.",
            CacheError::ParseFailure { .. } => "The cache file is corrupt and was ignored.",
        }
    }
}

/// Why a lookup was refused for credential reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnauthorizedReason {
    /// No credential resolved from any source.
    Missing,
    /// The provider rejected the credential.
    Rejected,
}

impl fmt::Display for UnauthorizedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnauthorizedReason::Missing => f.write_str("no credential configured"),
            UnauthorizedReason::Rejected => f.write_str("credential rejected by provider"),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("location '{0}' not found")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(UnauthorizedReason),

    #[error("network error: {0}")]
    Network(String),

    #[error("malformed provider response: {0}")]
    Malformed(String),
}

impl FetchError {
    pub fn user_message(&self) -> &'static str {
        match self {
            FetchError::NotFound(_) => {
                "Location not found. Check the spelling and format (City,CC)."
            }
            FetchError::Unauthorized(UnauthorizedReason::Missing) => {
                "No API key configured. Set OWM_API_KEY or run `weather setup api-key set`."
            }
            FetchError::Unauthorized(UnauthorizedReason::Rejected) => {
                "The API key was rejected by OpenWeatherMap. Check that it is correct and active."
            }
            FetchError::Network(_) => {
                "Unable to reach OpenWeatherMap. Check your internet connection."
            }
            FetchError::Malformed(_) => "OpenWeatherMap returned data that could not be read.",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn fetch_failures_have_distinct_user_messages() {
        let errors = [
            FetchError::NotFound("Atlantis".into()),
            FetchError::Unauthorized(UnauthorizedReason::Missing),
            FetchError::Unauthorized(UnauthorizedReason::Rejected),
            FetchError::Network("timeout".into()),
            FetchError::Malformed("missing main".into()),
        ];

        let messages: HashSet<_> = errors.iter().map(FetchError::user_message).collect();
        assert_eq!(messages.len(), errors.len());
    }

    #[test]
    fn config_error_names_field_and_source() {
        let err = ConfigError::invalid("CACHE_TTL", ConfigSource::Env, "not a number: abc");
        let msg = err.to_string();
        assert!(msg.contains("CACHE_TTL"));
        assert!(msg.contains("environment"));
        assert!(err.user_message().contains("CACHE_TTL"));
    }
}
