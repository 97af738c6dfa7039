use std::{fmt::Debug, sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;

use crate::{credential::Credential, model::Units};

pub mod openweather;

/// Undecoded success body from the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPayload {
    pub body: String,
}

impl RawPayload {
    pub fn new(body: impl Into<String>) -> Self {
        Self { body: body.into() }
    }
}

/// Transport-level outcome of a provider call. Messages never contain the
/// request URL, so the credential cannot leak through them.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("failed to read response: {0}")]
    Body(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        let err = err.without_url();
        if err.is_timeout() {
            ProviderError::Timeout
        } else if err.is_connect() {
            ProviderError::Connect(err.to_string())
        } else if let Some(status) = err.status() {
            ProviderError::Status { status: status.as_u16(), body: String::new() }
        } else {
            ProviderError::Body(err.to_string())
        }
    }
}

#[async_trait]
pub trait WeatherProvider: Send + Sync + Debug {
    /// Current conditions for `location` ("City,CC" or "lat,lon").
    /// The call must not outlive `timeout`.
    async fn lookup(
        &self,
        location: &str,
        units: Units,
        credential: &Credential,
        timeout: Duration,
    ) -> Result<RawPayload, ProviderError>;
}

/// Blocking counterpart of [`WeatherProvider`]; same contract.
pub trait BlockingWeatherProvider: Send + Sync + Debug {
    fn lookup_blocking(
        &self,
        location: &str,
        units: Units,
        credential: &Credential,
        timeout: Duration,
    ) -> Result<RawPayload, ProviderError>;
}

/// The pair of transports the orchestrator dispatches between.
#[derive(Debug, Clone)]
pub struct Providers {
    pub async_provider: Arc<dyn WeatherProvider>,
    pub blocking_provider: Arc<dyn BlockingWeatherProvider>,
}

impl Providers {
    pub fn new(
        async_provider: Arc<dyn WeatherProvider>,
        blocking_provider: Arc<dyn BlockingWeatherProvider>,
    ) -> Self {
        Self { async_provider, blocking_provider }
    }

    /// One value serving both paths.
    pub fn shared<P>(provider: Arc<P>) -> Self
    where
        P: WeatherProvider + BlockingWeatherProvider + 'static,
    {
        Self { async_provider: provider.clone(), blocking_provider: provider }
    }
}
