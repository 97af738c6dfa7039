//! Effective configuration, resolved per field from competing sources.
//!
//! Precedence, highest first: explicit CLI override, process environment,
//! secure credential store (API key only), project `.weather.env`, home
//! `~/.weather.env`, compiled default.
//!
//! Nothing here reads `std::env`; the environment is passed in as a map so
//! resolution is repeatable in tests.

use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use serde::Serialize;

use crate::{
    credential::{Credential, CredentialStore},
    dotenv::{self, DotenvVars},
    error::ConfigError,
    model::Units,
};

/// Option names, shared by the environment, env files and config files.
pub mod keys {
    pub const API_KEY: &str = "OWM_API_KEY";
    pub const UNITS: &str = "OWM_UNITS";
    pub const CACHE_PERSIST: &str = "CACHE_PERSIST";
    pub const CACHE_FILE: &str = "CACHE_FILE";
    pub const CACHE_TTL: &str = "CACHE_TTL";
    pub const REQUEST_TIMEOUT: &str = "REQUEST_TIMEOUT";
    pub const USE_ASYNC: &str = "USE_ASYNC";
    pub const USE_KEYRING: &str = "USE_KEYRING";
    pub const LOG_LEVEL: &str = "LOG_LEVEL";
    pub const LOG_FORMAT: &str = "LOG_FORMAT";
    pub const LOG_FILE: &str = "LOG_FILE";
    pub const BASE_URL: &str = "OWM_BASE_URL";

    pub const ALL: &[&str] = &[
        API_KEY,
        UNITS,
        CACHE_PERSIST,
        CACHE_FILE,
        CACHE_TTL,
        REQUEST_TIMEOUT,
        USE_ASYNC,
        USE_KEYRING,
        LOG_LEVEL,
        LOG_FORMAT,
        LOG_FILE,
        BASE_URL,
    ];
}

pub const DEFAULT_CACHE_FILE_NAME: &str = ".weather_app_cache.json";
pub const DEFAULT_CACHE_TTL_SECONDS: u32 = 600;
pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: u32 = 30;
pub const DEFAULT_LOG_LEVEL: &str = "warn";
pub const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org/data/2.5";

/// Project-local env file, relative to the working directory.
pub const PROJECT_ENV_FILE: &str = ".weather.env";
/// Env file in the user's home directory.
pub const HOME_ENV_FILE: &str = ".weather.env";

pub type EnvMap = HashMap<String, String>;

/// Where a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    Cli,
    Env,
    SecureStore,
    ProjectFile,
    HomeFile,
    Default,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConfigSource::Cli => "command line",
            ConfigSource::Env => "environment",
            ConfigSource::SecureStore => "secure store",
            ConfigSource::ProjectFile => "project env file",
            ConfigSource::HomeFile => "home env file",
            ConfigSource::Default => "default",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }

    pub fn default_value(value: T) -> Self {
        Self::new(value, ConfigSource::Default)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
        })
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}', expected text or json")),
        }
    }
}

/// Explicit overrides from the command line (or a `--config` file, which
/// the CLI folds in underneath its flags).
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub api_key: Option<String>,
    pub units: Option<Units>,
    pub cache_persist: Option<bool>,
    pub cache_file: Option<PathBuf>,
    pub cache_ttl_seconds: Option<u32>,
    pub request_timeout_seconds: Option<u32>,
    pub use_async: Option<bool>,
    pub use_keyring: Option<bool>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub log_file: Option<PathBuf>,
    pub base_url: Option<String>,
}

impl CliOverrides {
    /// Set a field from its option name and a raw string value.
    /// Unknown names are reported as invalid.
    pub fn set_raw(&mut self, key: &str, raw: &str) -> Result<(), ConfigError> {
        let origin = ConfigSource::Cli;
        match key.trim().to_uppercase().as_str() {
            keys::API_KEY => self.api_key = Some(raw.to_string()),
            keys::UNITS => self.units = Some(parse_units(keys::UNITS, origin, raw)?),
            keys::CACHE_PERSIST => {
                self.cache_persist = Some(parse_bool(keys::CACHE_PERSIST, origin, raw)?)
            }
            keys::CACHE_FILE => self.cache_file = Some(PathBuf::from(raw.trim())),
            keys::CACHE_TTL => {
                self.cache_ttl_seconds = Some(parse_seconds(keys::CACHE_TTL, origin, raw, 0)?)
            }
            keys::REQUEST_TIMEOUT => {
                self.request_timeout_seconds =
                    Some(parse_seconds(keys::REQUEST_TIMEOUT, origin, raw, 1)?)
            }
            keys::USE_ASYNC => self.use_async = Some(parse_bool(keys::USE_ASYNC, origin, raw)?),
            keys::USE_KEYRING => {
                self.use_keyring = Some(parse_bool(keys::USE_KEYRING, origin, raw)?)
            }
            keys::LOG_LEVEL => {
                self.log_level = Some(parse_log_level(keys::LOG_LEVEL, origin, raw)?)
            }
            keys::LOG_FORMAT => {
                self.log_format = Some(parse_log_format(keys::LOG_FORMAT, origin, raw)?)
            }
            keys::LOG_FILE => self.log_file = Some(PathBuf::from(raw.trim())),
            keys::BASE_URL => self.base_url = Some(parse_base_url(keys::BASE_URL, origin, raw)?),
            _ => {
                return Err(ConfigError::invalid(
                    "config file",
                    origin,
                    format!("unknown option '{key}'"),
                ));
            }
        }
        Ok(())
    }
}

/// Fully resolved configuration. Every field has a value and a source.
#[derive(Debug, Clone)]
pub struct Config {
    /// The only field that may be absent; its source is `Default` then.
    pub api_key: ConfigValue<Option<Credential>>,
    pub units: ConfigValue<Units>,
    pub cache_persist: ConfigValue<bool>,
    pub cache_file: ConfigValue<PathBuf>,
    pub cache_ttl_seconds: ConfigValue<u32>,
    pub request_timeout_seconds: ConfigValue<u32>,
    pub use_async: ConfigValue<bool>,
    pub use_keyring: ConfigValue<bool>,
    pub log_level: ConfigValue<String>,
    pub log_format: ConfigValue<LogFormat>,
    pub log_file: ConfigValue<Option<PathBuf>>,
    pub base_url: ConfigValue<String>,
}

impl Config {
    /// All compiled defaults. The cache file lives in `home` when known.
    pub fn with_defaults(home: Option<&Path>) -> Self {
        let cache_file = match home {
            Some(home) => home.join(DEFAULT_CACHE_FILE_NAME),
            None => PathBuf::from(DEFAULT_CACHE_FILE_NAME),
        };

        Self {
            api_key: ConfigValue::default_value(None),
            units: ConfigValue::default_value(Units::Metric),
            cache_persist: ConfigValue::default_value(false),
            cache_file: ConfigValue::default_value(cache_file),
            cache_ttl_seconds: ConfigValue::default_value(DEFAULT_CACHE_TTL_SECONDS),
            request_timeout_seconds: ConfigValue::default_value(DEFAULT_REQUEST_TIMEOUT_SECONDS),
            use_async: ConfigValue::default_value(true),
            use_keyring: ConfigValue::default_value(true),
            log_level: ConfigValue::default_value(DEFAULT_LOG_LEVEL.to_string()),
            log_format: ConfigValue::default_value(LogFormat::Text),
            log_file: ConfigValue::default_value(None),
            base_url: ConfigValue::default_value(DEFAULT_BASE_URL.to_string()),
        }
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.api_key.value.as_ref()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.request_timeout_seconds.value))
    }

    /// `(option name, source)` for every field, in `keys::ALL` order.
    pub fn sources(&self) -> Vec<(&'static str, ConfigSource)> {
        vec![
            (keys::API_KEY, self.api_key.source),
            (keys::UNITS, self.units.source),
            (keys::CACHE_PERSIST, self.cache_persist.source),
            (keys::CACHE_FILE, self.cache_file.source),
            (keys::CACHE_TTL, self.cache_ttl_seconds.source),
            (keys::REQUEST_TIMEOUT, self.request_timeout_seconds.source),
            (keys::USE_ASYNC, self.use_async.source),
            (keys::USE_KEYRING, self.use_keyring.source),
            (keys::LOG_LEVEL, self.log_level.source),
            (keys::LOG_FORMAT, self.log_format.source),
            (keys::LOG_FILE, self.log_file.source),
            (keys::BASE_URL, self.base_url.source),
        ]
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::with_defaults(None)
    }
}

/// Outcome of [`ConfigResolver::resolve`].
#[derive(Debug, Clone)]
pub struct Resolution {
    pub config: Config,
    /// Variables the caller must remove from its own process environment
    /// before spawning anything (the API key after migration).
    pub scrub_env: Vec<&'static str>,
}

/// Merges configuration sources. Holds the home directory used for `~`
/// expansion and the default cache path.
#[derive(Debug, Clone, Default)]
pub struct ConfigResolver {
    home_dir: Option<PathBuf>,
}

impl ConfigResolver {
    pub fn new(home_dir: Option<PathBuf>) -> Self {
        Self { home_dir }
    }

    /// Resolve every field.
    ///
    /// An API key found only in `env` is copied into `credentials` when that
    /// store has a backend; the field is then reported as coming from the
    /// secure store and `OWM_API_KEY` is listed in `scrub_env`. A failing
    /// store leaves the environment value in use.
    pub fn resolve(
        &self,
        cli: &CliOverrides,
        env: &EnvMap,
        credentials: &CredentialStore,
        project_file: Option<&Path>,
        home_file: Option<&Path>,
    ) -> Result<Resolution, ConfigError> {
        let sources = Sources {
            env,
            project: project_file.map(dotenv::load).unwrap_or_default(),
            home: home_file.map(dotenv::load).unwrap_or_default(),
        };
        let defaults = Config::with_defaults(self.home_dir.as_deref());

        let (api_key, scrub_env) = resolve_credential(cli, &sources, credentials)?;

        let config = Config {
            api_key,
            units: sources.field(keys::UNITS, cli.units, defaults.units, parse_units)?,
            cache_persist: sources.field(
                keys::CACHE_PERSIST,
                cli.cache_persist,
                defaults.cache_persist,
                parse_bool,
            )?,
            cache_file: sources.field(
                keys::CACHE_FILE,
                cli.cache_file.clone(),
                defaults.cache_file,
                |_, _, raw| Ok(PathBuf::from(raw.trim())),
            )?,
            cache_ttl_seconds: sources.field(
                keys::CACHE_TTL,
                cli.cache_ttl_seconds,
                defaults.cache_ttl_seconds,
                |field, origin, raw| parse_seconds(field, origin, raw, 0),
            )?,
            request_timeout_seconds: sources.field(
                keys::REQUEST_TIMEOUT,
                cli.request_timeout_seconds,
                defaults.request_timeout_seconds,
                |field, origin, raw| parse_seconds(field, origin, raw, 1),
            )?,
            use_async: sources.field(
                keys::USE_ASYNC,
                cli.use_async,
                defaults.use_async,
                parse_bool,
            )?,
            use_keyring: sources.field(
                keys::USE_KEYRING,
                cli.use_keyring,
                defaults.use_keyring,
                parse_bool,
            )?,
            log_level: sources.field(
                keys::LOG_LEVEL,
                cli.log_level.clone(),
                defaults.log_level,
                parse_log_level,
            )?,
            log_format: sources.field(
                keys::LOG_FORMAT,
                cli.log_format,
                defaults.log_format,
                parse_log_format,
            )?,
            log_file: sources.field(
                keys::LOG_FILE,
                cli.log_file.clone().map(Some),
                defaults.log_file,
                |_, _, raw| Ok(Some(PathBuf::from(raw.trim()))),
            )?,
            base_url: sources.field(
                keys::BASE_URL,
                cli.base_url.clone(),
                defaults.base_url,
                parse_base_url,
            )?,
        };

        let config = self.expand_paths(config);

        Ok(Resolution { config, scrub_env })
    }

    fn expand_paths(&self, mut config: Config) -> Config {
        config.cache_file.value = expand_tilde(&config.cache_file.value, self.home_dir.as_deref());
        if let Some(log_file) = config.log_file.value.take() {
            config.log_file.value = Some(expand_tilde(&log_file, self.home_dir.as_deref()));
        }
        config
    }
}

struct Sources<'a> {
    env: &'a EnvMap,
    project: DotenvVars,
    home: DotenvVars,
}

impl Sources<'_> {
    /// First non-empty raw value below the CLI layer.
    fn lookup(&self, key: &str) -> Option<(&str, ConfigSource)> {
        [
            (self.env.get(key), ConfigSource::Env),
            (self.project.get(key), ConfigSource::ProjectFile),
            (self.home.get(key), ConfigSource::HomeFile),
        ]
        .into_iter()
        .find_map(|(value, source)| {
            value.map(|v| v.as_str()).filter(|v| !v.trim().is_empty()).map(|v| (v, source))
        })
    }

    fn field<T>(
        &self,
        key: &'static str,
        cli: Option<T>,
        default: ConfigValue<T>,
        parse: impl Fn(&'static str, ConfigSource, &str) -> Result<T, ConfigError>,
    ) -> Result<ConfigValue<T>, ConfigError> {
        if let Some(value) = cli {
            return Ok(ConfigValue::new(value, ConfigSource::Cli));
        }

        match self.lookup(key) {
            Some((raw, source)) => Ok(ConfigValue::new(parse(key, source, raw)?, source)),
            None => Ok(default),
        }
    }
}

fn resolve_credential(
    cli: &CliOverrides,
    sources: &Sources<'_>,
    store: &CredentialStore,
) -> Result<(ConfigValue<Option<Credential>>, Vec<&'static str>), ConfigError> {
    let parse = |origin: ConfigSource, raw: &str| {
        Credential::new(raw)
            .map_err(|err| ConfigError::invalid(keys::API_KEY, origin, err.user_message()))
    };

    if let Some(raw) = cli.api_key.as_deref() {
        let credential = parse(ConfigSource::Cli, raw)?;
        return Ok((ConfigValue::new(Some(credential), ConfigSource::Cli), Vec::new()));
    }

    if let Some(raw) = sources.env.get(keys::API_KEY).filter(|v| !v.trim().is_empty()) {
        let credential = parse(ConfigSource::Env, raw.as_str())?;

        if store.is_available() {
            match store.set(credential.expose()) {
                Ok(()) => {
                    tracing::info!(
                        "Moved the credential from the environment into the secure store"
                    );
                    return Ok((
                        ConfigValue::new(Some(credential), ConfigSource::SecureStore),
                        vec![keys::API_KEY],
                    ));
                }
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        "Credential migration skipped; using the environment value"
                    );
                }
            }
        }

        return Ok((ConfigValue::new(Some(credential), ConfigSource::Env), Vec::new()));
    }

    if let Some(credential) = store.get() {
        return Ok((ConfigValue::new(Some(credential), ConfigSource::SecureStore), Vec::new()));
    }

    for (vars, origin) in [
        (&sources.project, ConfigSource::ProjectFile),
        (&sources.home, ConfigSource::HomeFile),
    ] {
        if let Some(raw) = vars.get(keys::API_KEY).filter(|v| !v.trim().is_empty()) {
            return Ok((ConfigValue::new(Some(parse(origin, raw.as_str())?), origin), Vec::new()));
        }
    }

    Ok((ConfigValue::default_value(None), Vec::new()))
}

fn parse_units(field: &'static str, origin: ConfigSource, raw: &str) -> Result<Units, ConfigError> {
    raw.parse().map_err(|err: crate::model::UnknownUnits| {
        ConfigError::invalid(field, origin, err.to_string())
    })
}

fn parse_bool(
    field: &'static str,
    origin: ConfigSource,
    raw: &str,
) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(
            field,
            origin,
            format!("expected true or false, got '{}'", raw.trim()),
        )),
    }
}

fn parse_seconds(
    field: &'static str,
    origin: ConfigSource,
    raw: &str,
    min: u32,
) -> Result<u32, ConfigError> {
    let value: u32 = raw.trim().parse().map_err(|_| {
        ConfigError::invalid(
            field,
            origin,
            format!("expected a whole number of seconds, got '{}'", raw.trim()),
        )
    })?;

    if value < min {
        return Err(ConfigError::invalid(field, origin, format!("must be at least {min}")));
    }
    Ok(value)
}

fn parse_log_level(
    field: &'static str,
    origin: ConfigSource,
    raw: &str,
) -> Result<String, ConfigError> {
    let level = raw.trim().to_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(level),
        "warning" => Ok("warn".to_string()),
        "critical" => Ok("error".to_string()),
        _ => Err(ConfigError::invalid(
            field,
            origin,
            format!("unknown log level '{}'", raw.trim()),
        )),
    }
}

fn parse_log_format(
    field: &'static str,
    origin: ConfigSource,
    raw: &str,
) -> Result<LogFormat, ConfigError> {
    raw.parse().map_err(|reason: String| ConfigError::invalid(field, origin, reason))
}

fn parse_base_url(
    field: &'static str,
    origin: ConfigSource,
    raw: &str,
) -> Result<String, ConfigError> {
    let raw = raw.trim();
    let url = reqwest::Url::parse(raw)
        .map_err(|err| ConfigError::invalid(field, origin, format!("invalid URL: {err}")))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::invalid(field, origin, "URL must use http or https"));
    }
    Ok(raw.trim_end_matches('/').to_string())
}

/// Expand a leading `~` against `home`. Left as-is when home is unknown.
pub fn expand_tilde(path: &Path, home: Option<&Path>) -> PathBuf {
    let Some(home) = home else {
        return path.to_path_buf();
    };

    match path.strip_prefix("~") {
        Ok(rest) => home.join(rest),
        Err(_) => path.to_path_buf(),
    }
}
