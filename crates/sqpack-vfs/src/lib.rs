//! Browsable virtual filesystem over a SqPack game archive.
//!
//! SqPack indexes only store hashes of paths. This crate pairs them with a
//! [`HashDatabase`] of known paths and exposes the result as a lazily built
//! folder tree:
//!
//! - **Hash database**: known folder and file names keyed by `(index id,
//!   hash)`, built from a path list and cached as a compressed blob
//! - **Archive access**: discovery of `.index`/`.datN` sets under `sqpack/`
//!   and shared read handles to dat files
//! - **Virtual filesystem**: folders are populated on first access by a
//!   single background task; file names are resolved in a separate pass
//! - **Lookup cache**: bounded LRU of open file bindings
//! - **Search**: cancellable, time-bounded query matching over the tree
//!
//! # Example
//!
//! ```rust,no_run
//! use sqpack_vfs::{VfsConfig, VirtualFileSystem};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = VfsConfig::new("/path/to/game").with_hash_db_cache("paths.db");
//! let vfs = VirtualFileSystem::open(config)?;
//!
//! let root = vfs.folders_resolved(vfs.root()).await?;
//! for category in vfs.folders(root)? {
//!     println!("{}", vfs.folder_path(category)?);
//! }
//!
//! let file = vfs.find_file("exd/root.exl").await?;
//! let bytes = vfs.lookup(file)?.read_all()?;
//! println!("{} bytes", bytes.len());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

use sqpack_formats::{IndexId, SqPackError};
use thiserror::Error;

// Archive discovery and dat handles
pub mod archive;

// Cooperative cancellation
pub mod cancel;

// Configuration
pub mod config;

// Known path names
pub mod hashdb;

// Open file bindings
pub mod lookup;

// Typed views over file contents
pub mod resource;

// Query matching over the tree
pub mod search;

// Lazy folder tree
pub mod tree;

pub use archive::{DatFile, GameData};
pub use cancel::CancellationToken;
pub use config::VfsConfig;
pub use hashdb::{FolderEntry, HashDatabase};
pub use lookup::{FileLookup, LookupCache};
pub use resource::Resource;
pub use search::{MatchOutcome, Query, SearchObserver, SearchOptions, SearchProgress, SearchResults};
pub use tree::{FileId, FolderId, NodeId, ResolutionState, VirtualFileSystem};

/// Result type for virtual filesystem operations.
pub type Result<T> = std::result::Result<T, VfsError>;

/// Errors that can occur while browsing an archive.
#[derive(Debug, Error)]
pub enum VfsError {
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Archive format error.
    #[error("Format error: {0}")]
    Format(#[from] SqPackError),

    /// No `.index` file exists for this index id.
    #[error("Index not found: {0}")]
    IndexNotFound(IndexId),

    /// Folder id or path not present in the tree.
    #[error("Folder not found: {0}")]
    FolderNotFound(String),

    /// File id or path not present in the archive.
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// Hash database cache failed validation.
    #[error("Hash database cache corrupt: {0}")]
    CacheCorrupt(String),

    /// Search query could not be parsed.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// Background task failed to complete.
    #[error("Background task failed: {0}")]
    Task(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Path list download failed.
    #[cfg(feature = "remote")]
    #[error("Download failed: {0}")]
    Download(String),
}

impl From<VfsError> for std::io::Error {
    fn from(error: VfsError) -> Self {
        match error {
            VfsError::Io(e) => e,
            VfsError::Format(e) => e.into_io(),
            other => Self::other(other),
        }
    }
}
