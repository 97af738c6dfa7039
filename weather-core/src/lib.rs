//! Core library for the `weather` CLI.
//!
//! This crate defines:
//! - Layered configuration resolution with per-field provenance
//! - API key storage (system keyring, env-file fallback)
//! - A TTL response cache with optional JSON persistence
//! - The fetch orchestrator over blocking and async OpenWeatherMap clients
//!
//! It is used by `weather-cli`, but can also be reused by other binaries or services.

pub mod cache;
pub mod config;
pub mod credential;
pub mod dotenv;
pub mod error;
pub mod fetch;
pub mod model;
pub mod provider;
pub mod retry;

pub use cache::{Clock, ManualClock, ResponseCache, SystemClock};
pub use config::{CliOverrides, Config, ConfigResolver, ConfigSource, ConfigValue, Resolution};
pub use credential::{Credential, CredentialStore, KeyringBackend, MemoryBackend, SecureBackend};
pub use error::{CacheError, ConfigError, CredentialError, FetchError, UnauthorizedReason};
pub use fetch::{CacheGuard, FetchOrchestrator};
pub use model::{Units, WeatherSnapshot};
pub use provider::{
    BlockingWeatherProvider, Providers, RawPayload, WeatherProvider, openweather::OpenWeatherClient,
};
