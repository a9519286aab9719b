//! Cache configuration

use crate::error::{DiskCacheError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for a [`DiskCache`](crate::DiskCache)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskCacheConfig {
    /// Directory holding one file per entry
    pub cache_dir: PathBuf,
    /// Byte budget before eviction starts
    pub capacity: u64,
}

impl Default for DiskCacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("./cache/disk"),
            capacity: u64::MAX,
        }
    }
}

impl DiskCacheConfig {
    pub fn new(cache_dir: impl Into<PathBuf>, capacity: u64) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            capacity,
        }
    }

    /// Load configuration from `CACHE_DIR` and `MAX_CACHE_SIZE`.
    ///
    /// Unset variables fall back to [`Default`]; a `MAX_CACHE_SIZE` that is
    /// not a byte count is an error.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let cache_dir = lookup("CACHE_DIR")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.cache_dir);

        let capacity = match lookup("MAX_CACHE_SIZE") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|e| {
                DiskCacheError::Config(format!("MAX_CACHE_SIZE {:?}: {}", raw, e))
            })?,
            None => defaults.capacity,
        };

        Ok(Self {
            cache_dir,
            capacity,
        })
    }
}
