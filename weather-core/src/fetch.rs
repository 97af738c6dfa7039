//! Cache-first lookups over the blocking or async provider path.

use std::{ops::Deref, path::PathBuf};

use futures::future::join_all;
use parking_lot::Mutex;

use crate::{
    cache::{DEFAULT_MAX_ENTRIES, ResponseCache, cache_key},
    config::Config,
    credential::Credential,
    error::{CacheError, FetchError, UnauthorizedReason},
    model::WeatherSnapshot,
    provider::{ProviderError, Providers, openweather::parse_snapshot},
    retry::{self, RetryPolicy},
};

const LOG_MAX_LEN: usize = 100;

/// Trim, collapse internal whitespace and tidy the parts around commas:
/// `"  new   york ,  us "` becomes `"new york,us"`. Empty parts are dropped.
pub fn normalize_location(raw: &str) -> String {
    raw.split(',')
        .map(|part| part.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(",")
}

/// Escape control characters and cap the length of user input before it
/// reaches a log line.
pub fn sanitize_for_log(text: &str) -> String {
    let text = text.trim();
    if text.is_empty() {
        return "[empty]".to_string();
    }

    let escaped = text.replace('\n', "\\n").replace('\r', "\\r").replace('\t', "\\t");
    match escaped.char_indices().nth(LOG_MAX_LEN) {
        Some((cut, _)) => format!("{}...", &escaped[..cut]),
        None => escaped,
    }
}

/// Map a provider failure onto the user-facing taxonomy.
fn classify(location: &str, err: ProviderError) -> FetchError {
    match err {
        ProviderError::Status { status: 400 | 404, .. } => {
            FetchError::NotFound(location.to_string())
        }
        ProviderError::Status { status: 401 | 403, .. } => {
            FetchError::Unauthorized(UnauthorizedReason::Rejected)
        }
        other => FetchError::Network(other.to_string()),
    }
}

/// Everything one lookup needs, taken from the config before any I/O.
struct Lookup<'a> {
    location: String,
    key: String,
    credential: &'a Credential,
}

#[derive(Debug)]
pub struct FetchOrchestrator {
    providers: Providers,
    cache: Mutex<ResponseCache>,
    cache_file: PathBuf,
    retry: RetryPolicy,
}

impl FetchOrchestrator {
    pub fn new(providers: Providers, cache: ResponseCache, cache_file: impl Into<PathBuf>) -> Self {
        Self {
            providers,
            cache: Mutex::new(cache),
            cache_file: cache_file.into(),
            retry: RetryPolicy::default(),
        }
    }

    /// Cache sized and persisted as `config` says; nothing loaded yet.
    /// TTL 0 leaves the cache file alone as well: no load, no save.
    pub fn from_config(config: &Config, providers: Providers) -> Self {
        let ttl = config.cache_ttl_seconds.value;
        let cache = ResponseCache::new(DEFAULT_MAX_ENTRIES)
            .persistent(config.cache_persist.value && ttl > 0)
            .with_default_ttl(ttl);
        Self::new(providers, cache, config.cache_file.value.clone())
    }

    /// [`from_config`](Self::from_config), loaded from disk and wrapped in
    /// a guard that saves on drop.
    pub fn open(config: &Config, providers: Providers) -> CacheGuard {
        Self::from_config(config, providers).guard()
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Load the cache file and hand ownership to a [`CacheGuard`].
    /// A missing or corrupt file leaves the cache empty.
    pub fn guard(self) -> CacheGuard {
        if let Err(err) = self.cache.lock().load_from_disk(&self.cache_file) {
            tracing::warn!(error = %err, "Continuing with an empty cache");
        }
        CacheGuard { orchestrator: self }
    }

    pub fn save(&self) -> Result<(), CacheError> {
        self.cache.lock().save_to_disk(&self.cache_file)
    }

    /// Number of entries currently held in memory.
    pub fn cached_entries(&self) -> usize {
        self.cache.lock().len()
    }

    /// Dispatch on `config.use_async`. The async path runs on a fresh
    /// current-thread runtime; called from inside a tokio runtime this
    /// returns an error instead. Async callers use
    /// [`fetch_async`](Self::fetch_async).
    pub fn fetch(&self, location: &str, config: &Config) -> Result<WeatherSnapshot, FetchError> {
        ensure_outside_runtime()?;
        if config.use_async.value {
            block_on(self.fetch_async(location, config))?
        } else {
            self.fetch_blocking(location, config)
        }
    }

    /// Results in input order. Same dispatch rules as [`fetch`](Self::fetch).
    pub fn fetch_many(
        &self,
        locations: &[String],
        config: &Config,
    ) -> Vec<Result<WeatherSnapshot, FetchError>> {
        let results = ensure_outside_runtime().and_then(|()| {
            if config.use_async.value {
                block_on(self.fetch_many_async(locations, config))
            } else {
                Ok(locations.iter().map(|location| self.fetch_blocking(location, config)).collect())
            }
        });

        results.unwrap_or_else(|err| {
            let message = match err {
                FetchError::Network(message) => message,
                other => other.to_string(),
            };
            locations.iter().map(|_| Err(FetchError::Network(message.clone()))).collect()
        })
    }

    pub fn fetch_blocking(
        &self,
        location: &str,
        config: &Config,
    ) -> Result<WeatherSnapshot, FetchError> {
        let lookup = match self.prepare(location, config)? {
            Prepared::Hit(snapshot) => return Ok(snapshot),
            Prepared::Miss(lookup) => lookup,
        };

        tracing::info!(
            location = %sanitize_for_log(&lookup.location),
            "Fetching weather (blocking)"
        );
        let units = config.units.value;
        let timeout = config.request_timeout();
        let provider = &self.providers.blocking_provider;

        let result = retry::run_blocking(self.retry, || {
            provider.lookup_blocking(&lookup.location, units, lookup.credential, timeout)
        });

        self.complete(lookup, result, config)
    }

    pub async fn fetch_async(
        &self,
        location: &str,
        config: &Config,
    ) -> Result<WeatherSnapshot, FetchError> {
        let lookup = match self.prepare(location, config)? {
            Prepared::Hit(snapshot) => return Ok(snapshot),
            Prepared::Miss(lookup) => lookup,
        };

        tracing::info!(location = %sanitize_for_log(&lookup.location), "Fetching weather (async)");
        let units = config.units.value;
        let timeout = config.request_timeout();
        let provider = &self.providers.async_provider;

        let result = retry::run_async(self.retry, || {
            provider.lookup(&lookup.location, units, lookup.credential, timeout)
        })
        .await;

        self.complete(lookup, result, config)
    }

    /// Concurrent lookups on the current event loop, results in input order.
    /// Identical keys are not coalesced; each goes to the provider on a miss.
    pub async fn fetch_many_async(
        &self,
        locations: &[String],
        config: &Config,
    ) -> Vec<Result<WeatherSnapshot, FetchError>> {
        join_all(locations.iter().map(|location| self.fetch_async(location, config))).await
    }

    /// Normalise, then answer from the cache when possible. The lock is
    /// released before returning, so no await ever happens while holding it.
    fn prepare<'a>(&self, location: &str, config: &'a Config) -> Result<Prepared<'a>, FetchError> {
        let location = normalize_location(location);
        if location.is_empty() {
            return Err(FetchError::NotFound(String::new()));
        }

        let key = cache_key(&location, config.units.value);
        let caching = config.cache_ttl_seconds.value > 0;

        if caching {
            if let Some(snapshot) = self.cache.lock().get(&key) {
                tracing::debug!(key = %sanitize_for_log(&key), "Cache hit");
                return Ok(Prepared::Hit(snapshot));
            }
            tracing::debug!(key = %sanitize_for_log(&key), "Cache miss");
        }

        let credential = config
            .credential()
            .ok_or(FetchError::Unauthorized(UnauthorizedReason::Missing))?;

        Ok(Prepared::Miss(Lookup { location, key, credential }))
    }

    fn complete(
        &self,
        lookup: Lookup<'_>,
        result: Result<crate::provider::RawPayload, ProviderError>,
        config: &Config,
    ) -> Result<WeatherSnapshot, FetchError> {
        let payload = result.map_err(|err| {
            let err = classify(&lookup.location, err);
            tracing::warn!(
                location = %sanitize_for_log(&lookup.location),
                error = %err,
                "Weather lookup failed"
            );
            err
        })?;

        let snapshot = parse_snapshot(&lookup.location, config.units.value, &payload.body)?;

        let ttl = config.cache_ttl_seconds.value;
        if ttl > 0 {
            self.cache.lock().put(&lookup.key, snapshot.clone(), ttl);
        }

        Ok(snapshot)
    }
}

enum Prepared<'a> {
    Hit(WeatherSnapshot),
    Miss(Lookup<'a>),
}

/// Both sync entry points would panic on a runtime thread: `block_on` nests a
/// runtime and the blocking reqwest client drops its own.
fn ensure_outside_runtime() -> Result<(), FetchError> {
    match tokio::runtime::Handle::try_current() {
        Ok(_) => Err(FetchError::Network(
            "synchronous fetch called from inside an async runtime".to_string(),
        )),
        Err(_) => Ok(()),
    }
}

fn block_on<F: std::future::Future>(future: F) -> Result<F::Output, FetchError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| FetchError::Network(format!("failed to start async runtime: {err}")))?;
    Ok(runtime.block_on(future))
}

/// Owns the orchestrator and saves its cache when dropped, on every exit
/// path. Save failures are logged, never raised.
#[derive(Debug)]
pub struct CacheGuard {
    orchestrator: FetchOrchestrator,
}

impl Deref for CacheGuard {
    type Target = FetchOrchestrator;

    fn deref(&self) -> &Self::Target {
        &self.orchestrator
    }
}

impl Drop for CacheGuard {
    fn drop(&mut self) {
        if let Err(err) = self.orchestrator.save() {
            tracing::warn!(error = %err, "Failed to save the response cache");
        }
    }
}
