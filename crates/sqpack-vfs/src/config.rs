//! Configuration for the virtual filesystem

use crate::{Result, VfsError};
use serde::{Deserialize, Serialize};
use sqpack_formats::Platform;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for opening an archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VfsConfig {
    /// Game directory (the one containing `sqpack/`)
    pub game_path: PathBuf,

    /// Platform suffix of index and dat file names
    pub platform: Platform,

    /// Compressed hash database cache; names fall back to hashes when unset
    pub hash_db_cache: Option<PathBuf>,

    /// Number of open file bindings kept by the lookup cache
    pub lookup_cache_capacity: usize,

    /// Default worker count for searches
    pub search_threads: usize,

    /// Default time budget for matching a single entry during search
    pub search_entry_timeout: Duration,
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            game_path: PathBuf::from("./game"),
            platform: Platform::Win32,
            hash_db_cache: None,
            lookup_cache_capacity: 128,
            search_threads: 4,
            search_entry_timeout: Duration::from_millis(100),
        }
    }
}

impl VfsConfig {
    /// Create a new configuration for the specified game directory
    pub fn new<P: AsRef<Path>>(game_path: P) -> Self {
        Self {
            game_path: game_path.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Load a configuration from a JSON file; missing fields take defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| VfsError::Config(format!("{}: {e}", path.as_ref().display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Set the platform
    #[must_use]
    pub const fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Set the hash database cache location
    #[must_use]
    pub fn with_hash_db_cache<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.hash_db_cache = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set the lookup cache capacity
    #[must_use]
    pub const fn with_lookup_cache_capacity(mut self, capacity: usize) -> Self {
        self.lookup_cache_capacity = capacity;
        self
    }

    /// Set the default search worker count
    #[must_use]
    pub const fn with_search_threads(mut self, threads: usize) -> Self {
        self.search_threads = threads;
        self
    }

    /// Set the default per-entry search timeout
    #[must_use]
    pub const fn with_search_entry_timeout(mut self, timeout: Duration) -> Self {
        self.search_entry_timeout = timeout;
        self
    }

    /// Reject values the filesystem cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.lookup_cache_capacity == 0 {
            return Err(VfsError::Config(
                "lookup_cache_capacity must be greater than zero".to_string(),
            ));
        }
        if self.search_threads == 0 {
            return Err(VfsError::Config(
                "search_threads must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
