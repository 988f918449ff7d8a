//! In-memory key/value cache
//!
//! Stands in for the platform storage API. Plugins read and write tokens and
//! tenant ids here during boot. Keys may be namespaced with a prefix so
//! several caches can share one backing store.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value as JsonValue;

use crate::core::{AppResult, ErrorContext};

#[derive(Debug, Clone)]
struct CacheEntry {
    value: JsonValue,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

pub const DEFAULT_DELIMITER: &str = "-";

/// Thread-safe cache with optional per-entry expiry
pub struct MemoryCache {
    entries: Arc<DashMap<String, CacheEntry>>,
    prefix: Option<String>,
    delimiter: String,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            prefix: None,
            delimiter: DEFAULT_DELIMITER.to_string(),
        }
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store every key as `{prefix}{delimiter}{key}`; the delimiter defaults to `-`
    pub fn with_prefix(prefix: impl Into<String>, delimiter: Option<&str>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            delimiter: delimiter.unwrap_or(DEFAULT_DELIMITER).to_string(),
            ..Self::default()
        }
    }

    /// A view over the same backing store under another prefix
    pub fn namespace(&self, prefix: impl Into<String>) -> Self {
        Self {
            entries: self.entries.clone(),
            prefix: Some(prefix.into()),
            delimiter: self.delimiter.clone(),
        }
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// The key an entry is stored under in the backing store
    pub fn storage_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}{}{key}", self.delimiter),
            None => key.to_string(),
        }
    }

    fn owns(&self, storage_key: &str) -> bool {
        match &self.prefix {
            Some(prefix) => storage_key
                .strip_prefix(prefix.as_str())
                .is_some_and(|rest| rest.starts_with(self.delimiter.as_str())),
            None => true,
        }
    }

    pub fn set(&self, key: impl Into<String>, value: JsonValue) {
        self.entries.insert(
            self.storage_key(&key.into()),
            CacheEntry {
                value,
                expires_at: None,
            },
        );
    }

    pub fn set_with_ttl(&self, key: impl Into<String>, value: JsonValue, ttl: Duration) {
        self.entries.insert(
            self.storage_key(&key.into()),
            CacheEntry {
                value,
                expires_at: Some(Instant::now() + ttl),
            },
        );
    }

    /// Serialize and store a typed value
    pub fn set_as<T: Serialize>(&self, key: impl Into<String>, value: &T) -> AppResult<()> {
        let value = serde_json::to_value(value).with_context("cache serialize")?;
        self.set(key, value);
        Ok(())
    }

    /// Expired entries read as absent and are dropped
    pub fn get(&self, key: &str) -> Option<JsonValue> {
        let key = self.storage_key(key);
        let now = Instant::now();
        if let Some(entry) = self.entries.get(&key) {
            if !entry.is_expired(now) {
                return Some(entry.value.clone());
            }
        }
        self.entries.remove_if(&key, |_, entry| entry.is_expired(now));
        None
    }

    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> AppResult<Option<T>> {
        self.get(key)
            .map(serde_json::from_value)
            .transpose()
            .with_context("cache deserialize")
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            JsonValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn remove(&self, key: &str) -> Option<JsonValue> {
        self.entries
            .remove(&self.storage_key(key))
            .map(|(_, entry)| entry.value)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Drop every entry in this namespace, or everything without a prefix
    pub fn clear(&self) {
        match self.prefix {
            Some(_) => self.entries.retain(|key, _| !self.owns(key)),
            None => self.entries.clear(),
        }
    }

    /// Entries in this namespace, expired ones included until read
    pub fn len(&self) -> usize {
        match self.prefix {
            Some(_) => self.entries.iter().filter(|entry| self.owns(entry.key())).count(),
            None => self.entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
