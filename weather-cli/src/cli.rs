use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use weather_core::{
    CliOverrides, Units,
    config::{LogFormat, keys},
};

use crate::{bootstrap::bootstrap, commands};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "weather", version, about = "Current weather from OpenWeatherMap")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Flags shared by every command. Each one overrides the matching
/// environment variable and env-file setting.
#[derive(Debug, Default, Args)]
pub struct GlobalArgs {
    /// Units: metric, imperial or default (Kelvin).
    #[arg(long, global = true, value_name = "UNITS")]
    pub units: Option<Units>,

    /// API key for this run only. Prefer `weather setup api-key set`.
    #[arg(long, global = true, value_name = "KEY")]
    pub api_key: Option<String>,

    /// Use the async HTTP client.
    #[arg(long = "async", global = true, conflicts_with = "sync")]
    pub use_async: bool,

    /// Use the blocking HTTP client.
    #[arg(long, global = true)]
    pub sync: bool,

    /// Seconds a cached lookup stays fresh.
    #[arg(long, global = true, value_name = "SECONDS")]
    pub cache_ttl: Option<u32>,

    /// Skip the response cache for this run.
    #[arg(long, global = true, conflicts_with = "cache_ttl")]
    pub no_cache: bool,

    /// Per-request timeout in seconds.
    #[arg(
        long,
        global = true,
        value_name = "SECONDS",
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub request_timeout: Option<u32>,

    /// Keep the response cache on disk between runs.
    #[arg(long, global = true, conflicts_with = "no_cache_persist")]
    pub cache_persist: bool,

    #[arg(long, global = true)]
    pub no_cache_persist: bool,

    /// Cache file location (default `~/.weather_app_cache.json`).
    #[arg(long, global = true, value_name = "PATH")]
    pub cache_file: Option<PathBuf>,

    /// Never touch the system keyring.
    #[arg(long, global = true)]
    pub no_keyring: bool,

    /// trace, debug, info, warn or error.
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// text or json.
    #[arg(long, global = true, value_name = "FORMAT")]
    pub log_format: Option<LogFormat>,

    /// Append logs to this file instead of stderr.
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// TOML file of option names and values, applied below explicit flags.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Debug logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

impl GlobalArgs {
    /// Build the command-line override layer: the `--config` file first,
    /// then explicit flags on top.
    pub fn overrides(&self) -> anyhow::Result<CliOverrides> {
        let mut overrides = match &self.config {
            Some(path) => load_config_file(path)?,
            None => CliOverrides::default(),
        };

        if let Some(key) = &self.api_key {
            overrides.api_key = Some(key.clone());
        }
        if let Some(units) = self.units {
            overrides.units = Some(units);
        }
        if self.use_async {
            overrides.use_async = Some(true);
        } else if self.sync {
            overrides.use_async = Some(false);
        }
        if self.no_cache {
            overrides.cache_ttl_seconds = Some(0);
        } else if let Some(ttl) = self.cache_ttl {
            overrides.cache_ttl_seconds = Some(ttl);
        }
        if let Some(timeout) = self.request_timeout {
            overrides.request_timeout_seconds = Some(timeout);
        }
        if self.cache_persist {
            overrides.cache_persist = Some(true);
        } else if self.no_cache_persist {
            overrides.cache_persist = Some(false);
        }
        if let Some(path) = &self.cache_file {
            overrides.cache_file = Some(path.clone());
        }
        if self.no_keyring {
            overrides.use_keyring = Some(false);
        }
        if let Some(level) = &self.log_level {
            overrides.set_raw(keys::LOG_LEVEL, level)?;
        }
        if let Some(format) = self.log_format {
            overrides.log_format = Some(format);
        }
        if let Some(path) = &self.log_file {
            overrides.log_file = Some(path.clone());
        }

        Ok(overrides)
    }
}

/// Read a flat TOML table such as `CACHE_TTL = 300` or `units = "imperial"`.
fn load_config_file(path: &std::path::Path) -> anyhow::Result<CliOverrides> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let table: toml::Table = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    let mut overrides = CliOverrides::default();
    for (key, value) in &table {
        let raw = match value {
            toml::Value::String(s) => s.clone(),
            toml::Value::Integer(i) => i.to_string(),
            toml::Value::Boolean(b) => b.to_string(),
            other => anyhow::bail!("Unsupported value for '{key}' in {}: {other}", path.display()),
        };
        overrides.set_raw(key, &raw)?;
    }

    Ok(overrides)
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show current weather for one or more locations ("City,CC" or "lat,lon").
    Show {
        #[arg(required = true, num_args = 1..)]
        locations: Vec<String>,

        /// Print the snapshot as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Manage stored credentials.
    Setup {
        #[command(subcommand)]
        command: SetupCommand,
    },

    /// Inspect or clear the response cache.
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },

    /// Inspect the resolved configuration.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum SetupCommand {
    /// Manage the OpenWeatherMap API key.
    ApiKey {
        #[command(subcommand)]
        command: ApiKeyCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum ApiKeyCommand {
    /// Store the API key in the keyring (or `~/.weather.env` without one).
    Set {
        /// The key; prompted for when omitted.
        #[arg(long)]
        key: Option<String>,
    },
    /// Show the configured key, masked, and where it came from.
    View,
    /// Delete the stored key.
    Remove {
        /// Do not ask for confirmation.
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// Delete the cache file.
    Clear {
        /// Do not ask for confirmation.
        #[arg(long)]
        force: bool,
    },
    /// Show cache location, size and entries.
    Status,
    /// Show the effective cache TTL.
    Ttl,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Every setting with its value and source.
    Show,
}

impl Cli {
    pub fn run(self) -> anyhow::Result<()> {
        let ctx = bootstrap(&self.global)?;

        match self.command {
            Command::Show { locations, json } => commands::show(&ctx, &locations, json)?,
            Command::Setup { command: SetupCommand::ApiKey { command } } => match command {
                ApiKeyCommand::Set { key } => commands::api_key_set(&ctx, key)?,
                ApiKeyCommand::View => commands::api_key_view(&ctx),
                ApiKeyCommand::Remove { force } => commands::api_key_remove(&ctx, force)?,
            },
            Command::Cache { command } => match command {
                CacheCommand::Clear { force } => commands::cache_clear(&ctx, force)?,
                CacheCommand::Status => commands::cache_status(&ctx)?,
                CacheCommand::Ttl => commands::cache_ttl(&ctx),
            },
            Command::Config { command: ConfigCommand::Show } => commands::config_show(&ctx),
        }

        Ok(())
    }
}
