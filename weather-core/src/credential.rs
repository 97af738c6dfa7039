//! Storage for the provider API key.
//!
//! The secure store is a capability: `CredentialStore` holds an optional
//! backend and degrades to "nothing stored" when there is none or when it
//! errors. Falling back to the env file is a caller decision, see
//! [`DotenvCredentialFile`].

use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
};

use parking_lot::Mutex;
use thiserror::Error;

use crate::{dotenv, error::CredentialError};

/// Keyring service name.
pub const KEYRING_SERVICE: &str = "weather-app";
/// Keyring account holding the OpenWeatherMap key.
pub const KEYRING_ACCOUNT: &str = "openweathermap";
/// Env-file key used by the file fallback.
pub const CREDENTIAL_ENV_KEY: &str = "OWM_API_KEY";

const MIN_LEN: usize = 16;
const MAX_LEN: usize = 64;

/// The provider API key. Only constructible through format validation.
///
/// Deliberately has no `Display`; `Debug` is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(raw: &str) -> Result<Self, CredentialError> {
        let raw = raw.trim();
        validate_format(raw)?;
        Ok(Self(raw.to_string()))
    }

    /// The raw key, for building provider requests only.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Shape check for OpenWeatherMap keys: 16-64 characters, no whitespace.
pub fn validate_format(raw: &str) -> Result<(), CredentialError> {
    if raw.is_empty() {
        return Err(CredentialError::InvalidFormat("value is empty"));
    }
    if raw.chars().any(char::is_whitespace) {
        return Err(CredentialError::InvalidFormat("value contains whitespace"));
    }
    let len = raw.chars().count();
    if !(MIN_LEN..=MAX_LEN).contains(&len) {
        return Err(CredentialError::InvalidFormat("value must be 16-64 characters long"));
    }
    Ok(())
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct BackendError(pub String);

/// An OS-level secret store addressed by `(service, key)`.
pub trait SecureBackend: Send + Sync + fmt::Debug {
    fn get(&self, service: &str, key: &str) -> Result<Option<String>, BackendError>;

    fn set(&self, service: &str, key: &str, value: &str) -> Result<(), BackendError>;

    /// Deleting an absent entry succeeds.
    fn delete(&self, service: &str, key: &str) -> Result<(), BackendError>;
}

/// System keyring (Keychain, Credential Manager, Secret Service).
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyringBackend;

impl KeyringBackend {
    /// Round-trip a throwaway entry to check the keyring actually works on
    /// this machine. Headless Linux sessions often have no Secret Service.
    pub fn probe() -> Option<Self> {
        const PROBE_KEY: &str = "availability-probe";
        const PROBE_VALUE: &str = "probe";

        let backend = KeyringBackend;
        let works = backend.set(KEYRING_SERVICE, PROBE_KEY, PROBE_VALUE).is_ok()
            && matches!(backend.get(KEYRING_SERVICE, PROBE_KEY), Ok(Some(v)) if v == PROBE_VALUE);
        let _ = backend.delete(KEYRING_SERVICE, PROBE_KEY);

        if works {
            Some(backend)
        } else {
            tracing::debug!("System keyring is not usable");
            None
        }
    }

    fn entry(service: &str, key: &str) -> Result<keyring::Entry, BackendError> {
        keyring::Entry::new(service, key).map_err(BackendError::from)
    }
}

impl From<keyring::Error> for BackendError {
    fn from(err: keyring::Error) -> Self {
        BackendError(err.to_string())
    }
}

impl SecureBackend for KeyringBackend {
    fn get(&self, service: &str, key: &str) -> Result<Option<String>, BackendError> {
        match Self::entry(service, key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set(&self, service: &str, key: &str, value: &str) -> Result<(), BackendError> {
        Self::entry(service, key)?.set_password(value).map_err(BackendError::from)
    }

    fn delete(&self, service: &str, key: &str) -> Result<(), BackendError> {
        match Self::entry(service, key)?.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Process-local backend, used in tests and as a stand-in secure store.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<(String, String), String>>,
    failing: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend whose every operation errors, like a locked keyring.
    pub fn failing() -> Self {
        Self { failing: true, ..Self::default() }
    }

    fn check(&self) -> Result<(), BackendError> {
        if self.failing {
            Err(BackendError("backend is locked".to_string()))
        } else {
            Ok(())
        }
    }
}

impl SecureBackend for MemoryBackend {
    fn get(&self, service: &str, key: &str) -> Result<Option<String>, BackendError> {
        self.check()?;
        Ok(self.entries.lock().get(&(service.to_string(), key.to_string())).cloned())
    }

    fn set(&self, service: &str, key: &str, value: &str) -> Result<(), BackendError> {
        self.check()?;
        self.entries
            .lock()
            .insert((service.to_string(), key.to_string()), value.to_string());
        Ok(())
    }

    fn delete(&self, service: &str, key: &str) -> Result<(), BackendError> {
        self.check()?;
        self.entries.lock().remove(&(service.to_string(), key.to_string()));
        Ok(())
    }
}

/// Holds exactly one secret: the provider API key.
#[derive(Debug)]
pub struct CredentialStore {
    backend: Option<Box<dyn SecureBackend>>,
}

impl CredentialStore {
    pub fn new(backend: Option<Box<dyn SecureBackend>>) -> Self {
        Self { backend }
    }

    pub fn with_backend(backend: impl SecureBackend + 'static) -> Self {
        Self::new(Some(Box::new(backend)))
    }

    /// A store with no secure backend; `get` always returns `None`.
    pub fn unavailable() -> Self {
        Self::new(None)
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    /// Backend errors and malformed stored values both read as "absent".
    pub fn get(&self) -> Option<Credential> {
        let backend = self.backend.as_ref()?;

        match backend.get(KEYRING_SERVICE, KEYRING_ACCOUNT) {
            Ok(Some(raw)) => match Credential::new(&raw) {
                Ok(credential) => Some(credential),
                Err(_) => {
                    tracing::warn!("Ignoring the stored credential: it has an invalid format");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    "Secure store lookup failed; treating credential as absent"
                );
                None
            }
        }
    }

    pub fn set(&self, raw: &str) -> Result<(), CredentialError> {
        let credential = Credential::new(raw)?;
        let backend = self.backend.as_ref().ok_or(CredentialError::BackendUnavailable)?;

        backend
            .set(KEYRING_SERVICE, KEYRING_ACCOUNT, credential.expose())
            .map_err(|err| CredentialError::BackendFailure(err.0))?;

        tracing::info!("Stored the configured credential in the secure store");
        Ok(())
    }

    /// Idempotent. Without a backend there is nothing to remove.
    pub fn remove(&self) -> Result<(), CredentialError> {
        let Some(backend) = self.backend.as_ref() else {
            return Ok(());
        };

        backend
            .delete(KEYRING_SERVICE, KEYRING_ACCOUNT)
            .map_err(|err| CredentialError::BackendFailure(err.0))
    }
}

/// File fallback: the `OWM_API_KEY=` line of an env file (normally
/// `~/.weather.env`), for systems without a usable keyring.
#[derive(Debug, Clone)]
pub struct DotenvCredentialFile {
    path: PathBuf,
}

impl DotenvCredentialFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, credential: &Credential) -> Result<(), CredentialError> {
        dotenv::upsert(&self.path, CREDENTIAL_ENV_KEY, credential.expose()).map_err(|source| {
            CredentialError::FileFailure { path: self.path.clone(), source }
        })
    }

    /// Returns whether a key was present.
    pub fn remove(&self) -> Result<bool, CredentialError> {
        dotenv::remove(&self.path, CREDENTIAL_ENV_KEY).map_err(|source| {
            CredentialError::FileFailure { path: self.path.clone(), source }
        })
    }
}
