//! Per-repository record of what was last checked and installed.
//!
//! Entries carry an absolute expiry. Expired entries are invisible to
//! [`Cache::get`] and are dropped by [`Cache::purge_expired`], which runs on
//! load and can be scheduled with [`Cache::spawn_sweeper`].

use crate::target::is_repository_reference;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("could not read cache file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not write cache file {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not parse cache file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("could not encode cache: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("'{0}' is not an owner/repo reference")]
    InvalidRepository(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimit {
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub remaining: u32,
    #[serde(default)]
    pub reset: Option<DateTime<Utc>>,
}

impl RateLimit {
    /// When the quota is used up, returns the time it resets.
    pub fn exceeded_until(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.reset {
            Some(reset) if self.limit > 0 && self.remaining == 0 && reset > now => Some(reset),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepositoryCacheEntry {
    pub id: String,
    pub name: String,
    pub last_check_at: DateTime<Utc>,
    #[serde(default)]
    pub last_download_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_download_tag: String,
    #[serde(default)]
    pub last_release_date: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub filters: Vec<String>,
}

impl RepositoryCacheEntry {
    pub fn new(
        name: impl Into<String>,
        target: impl Into<String>,
        filters: Vec<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            name: name.into(),
            last_check_at: Utc::now(),
            last_download_at: None,
            last_download_tag: String::new(),
            last_release_date: None,
            expires_at,
            target: target.into(),
            filters,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheData {
    #[serde(default)]
    pub rate_limit: RateLimit,
    #[serde(default)]
    pub repositories: BTreeMap<String, RepositoryCacheEntry>,
}

#[derive(Debug)]
pub struct Cache {
    path: PathBuf,
    data: Mutex<CacheData>,
}

impl Cache {
    /// An empty cache that will persist to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            data: Mutex::new(CacheData::default()),
        }
    }

    /// Loads the cache at `path`, writing an empty one if it does not exist.
    /// Expired entries are purged on the way in.
    pub fn load_from_file(path: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let cache = Self::new(path);

        if !cache.path.exists() {
            tracing::debug!("Creating cache file at {}", cache.path.display());
            cache.save_to_file()?;
            return Ok(cache);
        }

        let content = fs::read_to_string(&cache.path).map_err(|source| CacheError::Read {
            path: cache.path.clone(),
            source,
        })?;
        let data: CacheData = serde_json::from_str(&content).map_err(|source| CacheError::Parse {
            path: cache.path.clone(),
            source,
        })?;
        *cache.lock() = data;

        let purged = cache.purge_expired()?;
        tracing::debug!("Loaded cache from {} ({} expired)", cache.path.display(), purged);
        Ok(cache)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, CacheData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self, data: &CacheData) -> Result<(), CacheError> {
        let content = serde_json::to_string_pretty(data).map_err(CacheError::Encode)?;
        let write_error = |source| CacheError::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_error)?;
        }
        fs::write(&self.path, content).map_err(write_error)
    }

    /// Writes the whole document.
    pub fn save_to_file(&self) -> Result<(), CacheError> {
        let data = self.lock();
        self.write(&data)
    }

    /// Returns a copy of the live entry under `key`.
    pub fn get(&self, key: &str) -> Option<RepositoryCacheEntry> {
        let now = Utc::now();
        self.lock()
            .repositories
            .get(key)
            .filter(|entry| !entry.is_expired_at(now))
            .cloned()
    }

    pub fn set(&self, key: &str, entry: RepositoryCacheEntry) -> Result<(), CacheError> {
        let mut data = self.lock();
        data.repositories.insert(key.to_string(), entry);
        self.write(&data)
    }

    /// Case-insensitive lookup by repository name, expired or not.
    pub fn has(&self, name: &str) -> bool {
        self.lock()
            .repositories
            .values()
            .any(|entry| entry.name.eq_ignore_ascii_case(name))
    }

    pub fn add_repository(
        &self,
        name: &str,
        target: &str,
        filters: Vec<String>,
        expires_at: DateTime<Utc>,
    ) -> Result<RepositoryCacheEntry, CacheError> {
        if !is_repository_reference(name) {
            return Err(CacheError::InvalidRepository(name.to_string()));
        }
        let entry = RepositoryCacheEntry::new(name, target, filters, expires_at);
        self.set(name, entry.clone())?;
        tracing::debug!("Added repository {} to cache", name);
        Ok(entry)
    }

    /// Applies `update` to the live entry under `key` and persists. Returns
    /// whether such an entry existed.
    fn update(
        &self,
        key: &str,
        update: impl FnOnce(&mut RepositoryCacheEntry),
    ) -> Result<bool, CacheError> {
        let mut data = self.lock();
        let now = Utc::now();
        match data.repositories.get_mut(key) {
            Some(entry) if !entry.is_expired_at(now) => {
                update(entry);
                self.write(&data)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn touch(&self, key: &str) -> Result<bool, CacheError> {
        self.update(key, |entry| entry.last_check_at = Utc::now())
    }

    pub fn record_download(&self, key: &str, tag: &str) -> Result<bool, CacheError> {
        self.update(key, |entry| {
            entry.last_download_at = Some(Utc::now());
            entry.last_download_tag = tag.to_string();
        })
    }

    pub fn set_filters(&self, key: &str, filters: Vec<String>) -> Result<bool, CacheError> {
        self.update(key, |entry| entry.filters = filters)
    }

    pub fn set_release_date(&self, key: &str, date: DateTime<Utc>) -> Result<bool, CacheError> {
        self.update(key, |entry| entry.last_release_date = Some(date))
    }

    pub fn rate_limit(&self) -> RateLimit {
        self.lock().rate_limit.clone()
    }

    pub fn set_rate_limit(
        &self,
        limit: u32,
        remaining: u32,
        reset: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        let mut data = self.lock();
        data.rate_limit = RateLimit {
            service: "github".to_string(),
            limit,
            remaining,
            reset: Some(reset),
        };
        self.write(&data)
    }

    /// Drops expired entries and resets an elapsed rate limit window.
    /// Returns the number of entries removed.
    pub fn purge_expired(&self) -> Result<usize, CacheError> {
        let now = Utc::now();
        let mut data = self.lock();

        let before = data.repositories.len();
        data.repositories.retain(|_, entry| !entry.is_expired_at(now));
        let removed = before - data.repositories.len();

        let rate_limit = &mut data.rate_limit;
        if rate_limit.reset.is_some_and(|reset| now > reset) {
            rate_limit.remaining = rate_limit.limit;
            rate_limit.reset = None;
        }

        self.write(&data)?;
        Ok(removed)
    }

    /// Purges expired entries every `interval` until the task is aborted.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match self.purge_expired() {
                    Ok(0) => {}
                    Ok(n) => tracing::debug!("Purged {} expired cache entries", n),
                    Err(e) => tracing::warn!("Cache sweep failed: {}", e),
                }
            }
        })
    }

    pub fn snapshot(&self) -> CacheData {
        self.lock().clone()
    }
}
