//! Process startup: the only place that reads the real environment, home
//! directory and keyring.

use std::path::PathBuf;

use anyhow::Context;
use directories::BaseDirs;
use weather_core::{
    Config, ConfigResolver, CredentialStore, KeyringBackend, SecureBackend,
    config::{EnvMap, HOME_ENV_FILE, PROJECT_ENV_FILE, keys},
    credential::DotenvCredentialFile,
};

use crate::{cli::GlobalArgs, logging};

/// Everything a command needs after startup.
#[derive(Debug)]
pub struct AppContext {
    pub config: Config,
    pub store: CredentialStore,
    pub home_dir: Option<PathBuf>,
}

impl AppContext {
    /// Fallback location for the API key when the keyring is unusable.
    pub fn credential_file(&self) -> Option<DotenvCredentialFile> {
        self.home_dir.as_ref().map(|home| DotenvCredentialFile::new(home.join(HOME_ENV_FILE)))
    }
}

/// Resolve configuration, start logging and open the credential store.
///
/// Resolution runs twice: first without a secure store, which is enough to
/// learn `USE_KEYRING` and the logging settings, then with the keyring when
/// it is allowed and usable.
pub fn bootstrap(global: &GlobalArgs) -> anyhow::Result<AppContext> {
    let home_dir = BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf());
    let overrides = global.overrides()?;
    let env = collect_env();
    let project_file = PathBuf::from(PROJECT_ENV_FILE);
    let home_file = home_dir.as_ref().map(|home| home.join(HOME_ENV_FILE));

    let resolver = ConfigResolver::new(home_dir.clone());
    let resolve = |store: &CredentialStore| {
        resolver
            .resolve(&overrides, &env, store, Some(project_file.as_path()), home_file.as_deref())
            .map_err(|err| {
                let message = err.user_message();
                anyhow::Error::new(err).context(message)
            })
    };

    let unavailable = CredentialStore::unavailable();
    let first = resolve(&unavailable)?;

    logging::init(&first.config, global.verbose).context("Failed to initialise logging")?;

    let store = if first.config.use_keyring.value {
        CredentialStore::new(
            KeyringBackend::probe().map(|backend| Box::new(backend) as Box<dyn SecureBackend>),
        )
    } else {
        tracing::debug!("Keyring disabled by configuration");
        CredentialStore::unavailable()
    };

    let resolution = if store.is_available() { resolve(&store)? } else { first };

    scrub_env(&resolution.scrub_env);

    for (field, source) in resolution.config.sources() {
        tracing::debug!(field, %source, "Resolved setting");
    }

    Ok(AppContext { config: resolution.config, store, home_dir })
}

/// Only the option names are taken from the process environment.
fn collect_env() -> EnvMap {
    keys::ALL
        .iter()
        .filter_map(|key| std::env::var(key).ok().map(|value| (key.to_string(), value)))
        .collect()
}

fn scrub_env(names: &[&'static str]) {
    for name in names {
        // SAFETY: called during single-threaded startup, before any runtime
        // or HTTP client threads exist.
        unsafe { std::env::remove_var(name) };
        tracing::debug!(variable = name, "Removed from the process environment");
    }
}
