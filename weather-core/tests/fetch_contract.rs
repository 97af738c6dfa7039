//! Behaviour shared by the blocking and async fetch paths. Most scenarios
//! run once per path against a scripted provider.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use weather_core::{
    BlockingWeatherProvider, Config, ConfigSource, ConfigValue, Credential, FetchError,
    FetchOrchestrator, ManualClock, Providers, RawPayload, ResponseCache, UnauthorizedReason,
    Units, WeatherProvider, provider::ProviderError, retry::RetryPolicy,
};

const KEY: &str = "0123456789abcdef0123456789abcdef";

const BODY: &str = r#"{
    "weather": [{"id": 804, "main": "Clouds", "description": "overcast clouds"}],
    "main": {"temp": 12.34, "feels_like": 11.0, "pressure": 1012, "humidity": 81},
    "wind": {"speed": 4.1, "deg": 230},
    "clouds": {"all": 90},
    "visibility": 10000
}"#;

#[derive(Debug, Default)]
struct ScriptedProvider {
    script: Mutex<VecDeque<Result<RawPayload, ProviderError>>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(script: Vec<Result<RawPayload, ProviderError>>) -> Arc<Self> {
        Arc::new(Self { script: Mutex::new(script.into()), calls: AtomicUsize::new(0) })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next(&self) -> Result<RawPayload, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Connect("script exhausted".into())))
    }
}

#[async_trait]
impl WeatherProvider for ScriptedProvider {
    async fn lookup(
        &self,
        _location: &str,
        _units: Units,
        _credential: &Credential,
        _timeout: Duration,
    ) -> Result<RawPayload, ProviderError> {
        self.next()
    }
}

impl BlockingWeatherProvider for ScriptedProvider {
    fn lookup_blocking(
        &self,
        _location: &str,
        _units: Units,
        _credential: &Credential,
        _timeout: Duration,
    ) -> Result<RawPayload, ProviderError> {
        self.next()
    }
}

fn ok() -> Result<RawPayload, ProviderError> {
    Ok(RawPayload::new(BODY))
}

fn status(code: u16) -> Result<RawPayload, ProviderError> {
    Err(ProviderError::Status { status: code, body: String::new() })
}

fn config(use_async: bool) -> Config {
    let mut config = Config::default();
    config.api_key = ConfigValue::new(Some(Credential::new(KEY).unwrap()), ConfigSource::Cli);
    config.use_async = ConfigValue::new(use_async, ConfigSource::Cli);
    config
}

fn orchestrator(provider: &Arc<ScriptedProvider>, cache: ResponseCache) -> FetchOrchestrator {
    FetchOrchestrator::new(Providers::shared(provider.clone()), cache, "unused-cache.json")
        .with_retry(RetryPolicy::new(1, Duration::ZERO))
}

fn both_paths(scenario: impl Fn(bool)) {
    for use_async in [false, true] {
        scenario(use_async);
    }
}

#[test]
fn timeout_then_success_populates_cache_once() {
    both_paths(|use_async| {
        let provider = ScriptedProvider::new(vec![Err(ProviderError::Timeout), ok()]);
        let orch = orchestrator(&provider, ResponseCache::default());
        let config = config(use_async);

        let snap = orch.fetch("London,GB", &config).unwrap();
        assert_eq!(snap.city, "London,GB");
        assert_eq!(snap.temperature, 12.3);
        assert_eq!(provider.calls(), 2);
        assert_eq!(orch.cached_entries(), 1);

        let again = orch.fetch("London,GB", &config).unwrap();
        assert_eq!(again, snap);
        assert_eq!(provider.calls(), 2, "second fetch must be a cache hit");
    });
}

#[test]
fn normalized_locations_share_a_cache_entry() {
    both_paths(|use_async| {
        let provider = ScriptedProvider::new(vec![ok()]);
        let orch = orchestrator(&provider, ResponseCache::default());
        let config = config(use_async);

        let first = orch.fetch("  new   york ,  us ", &config).unwrap();
        let second = orch.fetch("new york,us", &config).unwrap();

        assert_eq!(first.city, "new york,us");
        assert_eq!(second, first);
        assert_eq!(provider.calls(), 1);
    });
}

#[test]
fn rejected_credential_is_not_retried_or_cached() {
    both_paths(|use_async| {
        let provider = ScriptedProvider::new(vec![status(401), ok()]);
        let orch = orchestrator(&provider, ResponseCache::default());

        let err = orch.fetch("London,GB", &config(use_async)).unwrap_err();

        assert!(matches!(err, FetchError::Unauthorized(UnauthorizedReason::Rejected)));
        assert_eq!(provider.calls(), 1);
        assert_eq!(orch.cached_entries(), 0);
    });
}

#[test]
fn missing_credential_never_reaches_the_provider() {
    both_paths(|use_async| {
        let provider = ScriptedProvider::new(vec![ok()]);
        let orch = orchestrator(&provider, ResponseCache::default());
        let mut config = config(use_async);
        config.api_key = ConfigValue::default_value(None);

        let err = orch.fetch("London,GB", &config).unwrap_err();

        assert!(matches!(err, FetchError::Unauthorized(UnauthorizedReason::Missing)));
        assert_eq!(provider.calls(), 0);
    });
}

#[test]
fn not_found_is_not_retried() {
    both_paths(|use_async| {
        let provider = ScriptedProvider::new(vec![status(404), ok()]);
        let orch = orchestrator(&provider, ResponseCache::default());

        let err = orch.fetch("Atlantis,XX", &config(use_async)).unwrap_err();

        assert!(matches!(err, FetchError::NotFound(ref l) if l == "Atlantis,XX"));
        assert_eq!(provider.calls(), 1);
    });
}

#[test]
fn empty_location_is_not_found_without_network() {
    both_paths(|use_async| {
        let provider = ScriptedProvider::new(vec![ok()]);
        let orch = orchestrator(&provider, ResponseCache::default());

        let err = orch.fetch("  ,  ", &config(use_async)).unwrap_err();

        assert!(matches!(err, FetchError::NotFound(_)));
        assert_eq!(provider.calls(), 0);
    });
}

#[test]
fn transient_errors_are_retried_exactly_once() {
    both_paths(|use_async| {
        let provider = ScriptedProvider::new(vec![status(503), Err(ProviderError::Timeout), ok()]);
        let orch = orchestrator(&provider, ResponseCache::default());

        let err = orch.fetch("London,GB", &config(use_async)).unwrap_err();

        assert!(matches!(err, FetchError::Network(_)));
        assert_eq!(provider.calls(), 2);
        assert_eq!(orch.cached_entries(), 0);
    });
}

#[test]
fn unreadable_payload_is_malformed() {
    both_paths(|use_async| {
        let provider = ScriptedProvider::new(vec![Ok(RawPayload::new(r#"{"weather": []}"#))]);
        let orch = orchestrator(&provider, ResponseCache::default());

        let err = orch.fetch("London,GB", &config(use_async)).unwrap_err();

        assert!(matches!(err, FetchError::Malformed(_)));
        assert_eq!(provider.calls(), 1);
        assert_eq!(orch.cached_entries(), 0);
    });
}

#[test]
fn expired_entry_triggers_a_new_lookup() {
    both_paths(|use_async| {
        let provider = ScriptedProvider::new(vec![ok(), ok()]);
        let clock = ManualClock::default();
        let cache = ResponseCache::default().with_clock(Arc::new(clock.clone()));
        let orch = orchestrator(&provider, cache);
        let mut config = config(use_async);
        config.cache_ttl_seconds = ConfigValue::new(5, ConfigSource::Env);

        orch.fetch("London,GB", &config).unwrap();
        clock.advance_secs(5);
        orch.fetch("London,GB", &config).unwrap();
        assert_eq!(provider.calls(), 1);

        clock.advance_secs(1);
        orch.fetch("London,GB", &config).unwrap();
        assert_eq!(provider.calls(), 2);
    });
}

#[test]
fn zero_ttl_bypasses_the_cache() {
    both_paths(|use_async| {
        let provider = ScriptedProvider::new(vec![ok(), ok()]);
        let orch = orchestrator(&provider, ResponseCache::default());
        let mut config = config(use_async);
        config.cache_ttl_seconds = ConfigValue::new(0, ConfigSource::Cli);

        orch.fetch("London,GB", &config).unwrap();
        orch.fetch("London,GB", &config).unwrap();

        assert_eq!(provider.calls(), 2);
        assert_eq!(orch.cached_entries(), 0);
    });
}

#[test]
fn units_are_part_of_the_cache_key() {
    both_paths(|use_async| {
        let provider = ScriptedProvider::new(vec![ok(), ok()]);
        let orch = orchestrator(&provider, ResponseCache::default());
        let mut config = config(use_async);

        orch.fetch("London,GB", &config).unwrap();
        config.units = ConfigValue::new(Units::Imperial, ConfigSource::Cli);
        let imperial = orch.fetch("London,GB", &config).unwrap();

        assert_eq!(imperial.units, Units::Imperial);
        assert_eq!(provider.calls(), 2);
    });
}

#[test]
fn fetch_many_keeps_input_order() {
    both_paths(|use_async| {
        let provider = ScriptedProvider::new(vec![ok(), status(404), ok()]);
        let orch = orchestrator(&provider, ResponseCache::default());
        let locations: Vec<String> =
            ["London,GB", "Atlantis,XX", "Paris,FR"].into_iter().map(String::from).collect();

        let results = orch.fetch_many(&locations, &config(use_async));

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().city, "London,GB");
        assert!(matches!(results[1], Err(FetchError::NotFound(_))));
        assert_eq!(results[2].as_ref().unwrap().city, "Paris,FR");
    });
}

#[test]
fn guard_saves_on_drop_and_reload_serves_from_disk() {
    both_paths(|use_async| {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(use_async);
        config.cache_persist = ConfigValue::new(true, ConfigSource::Env);
        config.cache_file = ConfigValue::new(dir.path().join("cache.json"), ConfigSource::Env);

        let provider = ScriptedProvider::new(vec![ok()]);
        {
            let guard = FetchOrchestrator::open(&config, Providers::shared(provider.clone()));
            guard.fetch("London,GB", &config).unwrap();
        }
        assert!(dir.path().join("cache.json").exists());

        let fresh = ScriptedProvider::new(vec![]);
        let guard = FetchOrchestrator::open(&config, Providers::shared(fresh.clone()));
        let snap = guard.fetch("London,GB", &config).unwrap();

        assert_eq!(snap.city, "London,GB");
        assert_eq!(fresh.calls(), 0);
    });
}

#[test]
fn guard_saves_even_when_the_fetch_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.json");
    let mut config = config(false);
    config.cache_persist = ConfigValue::new(true, ConfigSource::Env);
    config.cache_file = ConfigValue::new(path.clone(), ConfigSource::Env);

    let provider = ScriptedProvider::new(vec![ok(), status(404)]);
    let run = || -> Result<(), FetchError> {
        let guard = FetchOrchestrator::open(&config, Providers::shared(provider.clone()));
        guard.fetch("London,GB", &config)?;
        guard.fetch("Atlantis,XX", &config)?;
        Ok(())
    };

    assert!(run().is_err());
    let saved = std::fs::read_to_string(&path).unwrap();
    assert!(saved.contains("London,GB:metric"));
}

#[test]
fn both_paths_agree_on_snapshot_and_cache() {
    let sync_provider = ScriptedProvider::new(vec![Err(ProviderError::Timeout), ok()]);
    let async_provider = ScriptedProvider::new(vec![Err(ProviderError::Timeout), ok()]);
    let sync_orch = orchestrator(&sync_provider, ResponseCache::default());
    let async_orch = orchestrator(&async_provider, ResponseCache::default());

    let snap_sync = sync_orch.fetch(" London , GB ", &config(false)).unwrap();
    let snap_async = async_orch.fetch(" London , GB ", &config(true)).unwrap();

    assert_eq!(snap_sync, snap_async);
    assert_eq!(sync_orch.cached_entries(), async_orch.cached_entries());
    assert_eq!(sync_provider.calls(), async_provider.calls());
}

#[test]
fn zero_ttl_leaves_an_existing_cache_file_untouched() {
    both_paths(|use_async| {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let snapshot =
            weather_core::provider::openweather::parse_snapshot("London,GB", Units::Metric, BODY)
                .unwrap();
        // entry without freshness metadata, as older versions wrote it
        let legacy = serde_json::json!({ "London,GB:metric": snapshot });
        std::fs::write(&path, legacy.to_string()).unwrap();
        let before = std::fs::read_to_string(&path).unwrap();

        let mut config = config(use_async);
        config.cache_persist = ConfigValue::new(true, ConfigSource::Env);
        config.cache_file = ConfigValue::new(path.clone(), ConfigSource::Env);
        config.cache_ttl_seconds = ConfigValue::new(0, ConfigSource::Cli);

        let provider = ScriptedProvider::new(vec![ok()]);
        {
            let guard = FetchOrchestrator::open(&config, Providers::shared(provider.clone()));
            guard.fetch("Paris,FR", &config).unwrap();
            assert_eq!(guard.cached_entries(), 0);
        }

        let after = std::fs::read_to_string(&path).unwrap();
        assert_eq!(after, before);
        assert!(after.contains("London,GB:metric"));
    });
}

#[tokio::test]
async fn sync_entry_points_refuse_to_run_inside_a_runtime() {
    for use_async in [false, true] {
        let provider = ScriptedProvider::new(vec![ok()]);
        let orch = orchestrator(&provider, ResponseCache::default());
        let config = config(use_async);

        let err = orch.fetch("London,GB", &config).unwrap_err();
        assert!(matches!(err, FetchError::Network(_)));

        let results = orch.fetch_many(&["London,GB".to_string()], &config);
        assert!(matches!(results[0], Err(FetchError::Network(_))));
        assert_eq!(provider.calls(), 0);

        let snap = orch.fetch_async("London,GB", &config).await.unwrap();
        assert_eq!(snap.city, "London,GB");
    }
}
