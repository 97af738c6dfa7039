//! TTL-bounded lookup cache with optional JSON persistence.
//!
//! Entries expire lazily: `get` checks the age and drops a stale entry in
//! the same call. There is no background sweep, which is fine for a CLI
//! that lives for one command but would leak stale entries in a daemon.
//!
//! Capacity eviction is FIFO by insertion order, not LRU; reads never touch
//! the order or `stored_at`.
//!
//! The cache file is not locked. Two processes writing it at once can lose
//! entries; the single-user CLI does not do that.

use std::{
    collections::{HashMap, VecDeque},
    fmt, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    config::DEFAULT_CACHE_TTL_SECONDS,
    error::CacheError,
    model::{Units, WeatherSnapshot},
};

pub const DEFAULT_MAX_ENTRIES: usize = 100;

/// `"{location}:{units}"`, the key format of the cache file.
pub fn cache_key(location: &str, units: Units) -> String {
    format!("{location}:{units}")
}

/// Source of "now" for expiry checks.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Arc::new(Mutex::new(start)) }
    }

    pub fn advance_secs(&self, secs: i64) {
        let mut now = self.now.lock();
        *now += TimeDelta::seconds(secs);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub payload: WeatherSnapshot,
    pub stored_at: DateTime<Utc>,
    pub ttl_seconds: u32,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.stored_at) > TimeDelta::seconds(i64::from(self.ttl_seconds))
    }
}

/// On-disk shape: the snapshot fields plus optional freshness metadata.
/// Files written before the metadata existed carry only the snapshot.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedEntry {
    #[serde(flatten)]
    snapshot: WeatherSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    stored_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ttl_seconds: Option<u32>,
}

/// Summary of a cache file, for `weather cache status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheFileInfo {
    pub size_bytes: u64,
    pub entries: usize,
    pub keys: Vec<String>,
}

#[derive(Debug)]
pub struct ResponseCache {
    entries: HashMap<String, CacheEntry>,
    /// Keys, oldest insertion first.
    order: VecDeque<String>,
    max_entries: usize,
    /// TTL applied to loaded entries that carry none.
    default_ttl_seconds: u32,
    persist: bool,
    clock: Arc<dyn Clock>,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl ResponseCache {
    /// In-memory cache holding at most `max_entries` (at least one).
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            max_entries: max_entries.max(1),
            default_ttl_seconds: DEFAULT_CACHE_TTL_SECONDS,
            persist: false,
            clock: Arc::new(SystemClock),
        }
    }

    /// Enable or disable disk persistence. Disabled makes
    /// `load_from_disk`/`save_to_disk` no-ops.
    pub fn persistent(mut self, enabled: bool) -> Self {
        self.persist = enabled;
        self
    }

    pub fn with_default_ttl(mut self, ttl_seconds: u32) -> Self {
        self.default_ttl_seconds = ttl_seconds;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in insertion order, expired entries included.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Whether `key` holds an unexpired entry. Unlike `get`, never removes.
    pub fn contains_fresh(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.entries.get(key).is_some_and(|entry| !entry.is_expired(now))
    }

    /// Fresh payload for `key`. An expired entry is removed before returning.
    pub fn get(&mut self, key: &str) -> Option<WeatherSnapshot> {
        let now = self.clock.now();
        let expired = self.entries.get(key)?.is_expired(now);

        if expired {
            tracing::debug!(key, "Cache entry expired");
            self.remove(key);
            return None;
        }

        self.entries.get(key).map(|entry| entry.payload.clone())
    }

    pub fn put(&mut self, key: &str, snapshot: WeatherSnapshot, ttl_seconds: u32) {
        let entry = CacheEntry {
            key: key.to_string(),
            payload: snapshot,
            stored_at: self.clock.now(),
            ttl_seconds,
        };
        self.insert(entry);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    fn insert(&mut self, entry: CacheEntry) {
        if self.entries.contains_key(&entry.key) {
            self.order.retain(|k| k != &entry.key);
        } else {
            while self.entries.len() >= self.max_entries {
                let Some(oldest) = self.order.pop_front() else { break };
                tracing::debug!(key = %oldest, "Evicting oldest cache entry");
                self.entries.remove(&oldest);
            }
        }

        self.order.push_back(entry.key.clone());
        self.entries.insert(entry.key.clone(), entry);
    }

    fn remove(&mut self, key: &str) {
        if self.entries.remove(key).is_some() {
            self.order.retain(|k| k != key);
        }
    }

    /// Merge entries from `path`. A missing file is fine. A file that is not
    /// a JSON object leaves the cache empty; a single bad entry is skipped.
    pub fn load_from_disk(&mut self, path: &Path) -> Result<(), CacheError> {
        if !self.persist {
            return Ok(());
        }

        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Cache file does not exist");
                return Ok(());
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "Failed to read cache file");
                return Err(CacheError::io(path, err));
            }
        };

        let raw: Map<String, Value> = match serde_json::from_str(&contents) {
            Ok(raw) => raw,
            Err(source) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %source,
                    "Cache file is corrupt; starting empty"
                );
                self.clear();
                return Err(CacheError::ParseFailure { path: path.to_path_buf(), source });
            }
        };

        let now = self.clock.now();
        let mut loaded = 0usize;

        for (key, value) in raw {
            let persisted: PersistedEntry = match serde_json::from_value(value) {
                Ok(persisted) => persisted,
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "Skipping unreadable cache entry");
                    continue;
                }
            };

            let entry = CacheEntry {
                key,
                payload: persisted.snapshot,
                stored_at: persisted.stored_at.unwrap_or(now),
                ttl_seconds: persisted.ttl_seconds.unwrap_or(self.default_ttl_seconds),
            };

            if entry.is_expired(now) {
                continue;
            }

            self.insert(entry);
            loaded += 1;
        }

        tracing::info!(path = %path.display(), entries = loaded, "Loaded cache from disk");
        Ok(())
    }

    /// Write every fresh entry to `path`, oldest first, via a temp file.
    pub fn save_to_disk(&self, path: &Path) -> Result<(), CacheError> {
        if !self.persist {
            return Ok(());
        }

        let now = self.clock.now();
        let mut out = Map::new();

        for key in &self.order {
            let Some(entry) = self.entries.get(key) else { continue };
            if entry.is_expired(now) {
                continue;
            }

            let persisted = PersistedEntry {
                snapshot: entry.payload.clone(),
                stored_at: Some(entry.stored_at),
                ttl_seconds: Some(entry.ttl_seconds),
            };
            let value = serde_json::to_value(&persisted)
                .map_err(|source| CacheError::ParseFailure { path: path.to_path_buf(), source })?;
            out.insert(key.clone(), value);
        }

        let json = serde_json::to_string_pretty(&out)
            .map_err(|source| CacheError::ParseFailure { path: path.to_path_buf(), source })?;

        write_atomic(path, &json).map_err(|err| {
            tracing::warn!(path = %path.display(), error = %err, "Failed to save cache");
            CacheError::io(path, err)
        })?;

        tracing::debug!(path = %path.display(), entries = out.len(), "Saved cache to disk");
        Ok(())
    }

    /// Delete the cache file. Returns whether a file was there.
    pub fn clear_file(path: &Path) -> Result<bool, CacheError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(CacheError::io(path, err)),
        }
    }

    /// Size and keys of a cache file, `None` when it does not exist.
    pub fn inspect_file(path: &Path) -> Result<Option<CacheFileInfo>, CacheError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(CacheError::io(path, err)),
        };

        let raw: Map<String, Value> = serde_json::from_str(&contents)
            .map_err(|source| CacheError::ParseFailure { path: path.to_path_buf(), source })?;

        Ok(Some(CacheFileInfo {
            size_bytes: contents.len() as u64,
            entries: raw.len(),
            keys: raw.keys().cloned().collect(),
        }))
    }
}

fn write_atomic(path: &Path, contents: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let temp_path: PathBuf = path.with_extension("tmp");
    fs::write(&temp_path, contents)?;
    fs::rename(&temp_path, path)
}
