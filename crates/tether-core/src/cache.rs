//! Persisted display data.
//!
//! Small key/value store for whatever the UI wants to restore on the next
//! start (camera pose, panel layout, last opened scene). Everything lives in
//! memory and is written to a single JSON file on demand.

use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

const CACHE_VERSION: u32 = 1;

/// On-disk layout
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheFile {
    version: u32,
    saved_at: u64,
    #[serde(default)]
    entries: HashMap<String, Value>,
}

/// Key/value cache for display data
#[derive(Debug, Default)]
pub struct DisplayCache {
    entries: HashMap<String, Value>,
    dirty: bool,
}

impl DisplayCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the cache file. A missing or unreadable file yields an empty
    /// cache.
    ///
    /// # Errors
    ///
    /// Returns an error only if the file exists but cannot be read.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("Display cache not found at {}", path.display());
            return Ok(Self::new());
        }

        let content = std::fs::read_to_string(path)?;
        let file: CacheFile = match serde_json::from_str(&content) {
            Ok(file) => file,
            Err(e) => {
                warn!(
                    "Failed to parse display cache: {} (at line {}, column {})",
                    e,
                    e.line(),
                    e.column()
                );
                return Ok(Self::new());
            }
        };

        if file.version != CACHE_VERSION {
            warn!(
                "Ignoring display cache with version {} (expected {CACHE_VERSION})",
                file.version
            );
            return Ok(Self::new());
        }

        info!("Loaded {} display cache entries", file.entries.len());
        Ok(Self {
            entries: file.entries,
            dirty: false,
        })
    }

    /// Write the cache if anything changed since the last load or save.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or its parent directory cannot be written.
    pub fn save(&mut self, path: &Path) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        let file = CacheFile {
            version: CACHE_VERSION,
            saved_at: now_millis(),
            entries: self.entries.clone(),
        };
        let content = serde_json::to_string(&file)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        self.dirty = false;

        debug!("Saved {} display cache entries", self.entries.len());
        Ok(())
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Deserialize an entry, `None` if missing or of the wrong shape.
    #[must_use]
    pub fn get_as<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.entries.get(key)?;
        serde_json::from_value(value.clone()).ok()
    }

    /// Store `value` under `key`. Setting an identical value keeps the
    /// cache clean.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        if self.entries.get(&key) == Some(&value) {
            return;
        }
        self.entries.insert(key, value);
        self.dirty = true;
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            self.entries.clear();
            self.dirty = true;
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

// Millis since epoch fit in u64 until the year 584 million
#[allow(clippy::cast_possible_truncation)]
fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
