//! Open file bindings and their LRU cache
//!
//! A [`FileLookup`] ties a tree file to its dat file and packed header; the
//! block layout is resolved by the first stream that reads. Streams handed out by [`FileLookup::create_stream`] are clones of
//! a prototype: they share the layout and the dat handle but keep their own
//! position and block buffer, so several readers can use one lookup at once.

use crate::archive::DatFile;
use crate::resource::Resource;
use crate::tree::{FileId, VirtualFileSystem};
use crate::Result;
use lru::LruCache;
use parking_lot::Mutex;
use sqpack_formats::{IndexId, PackedFileHeader, PackedFileKind, PackedFileStream};
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::debug;

/// A file bound to its packed data
pub struct FileLookup {
    file: FileId,
    path: String,
    index_id: IndexId,
    data_file_id: u8,
    offset: u64,
    header: PackedFileHeader,
    kind: PackedFileKind,
    prototype: PackedFileStream<Arc<DatFile>>,
}

impl FileLookup {
    /// Bind a file: open its dat file and read its packed header.
    ///
    /// The block layout is left to the first stream access.
    pub fn open(vfs: &VirtualFileSystem, file: FileId) -> Result<Self> {
        let (index_id, data_file_id, offset) = vfs.file_location(file)?;
        let path = vfs.file_path(file)?;
        let dat = vfs.game_data().open_dat(index_id, data_file_id)?;

        let header = PackedFileHeader::read_from(dat.as_ref(), offset)?;
        let kind = header.kind()?;
        debug!(
            "Bound {} to {:?} at {:#x}: {} file, {} bytes",
            path,
            dat.path(),
            offset,
            kind,
            header.decompressed_size
        );

        Ok(Self {
            file,
            path,
            index_id,
            data_file_id,
            offset,
            header,
            kind,
            prototype: PackedFileStream::new(dat, offset),
        })
    }

    /// File this lookup belongs to
    pub const fn file(&self) -> FileId {
        self.file
    }

    /// Full path at the time the lookup was created
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Index set holding the file
    pub const fn index_id(&self) -> IndexId {
        self.index_id
    }

    /// `N` in `.datN`
    pub const fn data_file_id(&self) -> u8 {
        self.data_file_id
    }

    /// Byte offset of the packed file in its dat file
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Packed-file type
    pub const fn kind(&self) -> PackedFileKind {
        self.kind
    }

    /// Packed-file header as stored
    pub const fn header(&self) -> &PackedFileHeader {
        &self.header
    }

    /// Logical size in bytes
    pub fn size(&self) -> Result<u64> {
        Ok(u64::from(self.header.decompressed_size))
    }

    /// Whether the block layout has been resolved by a stream yet
    pub fn layout_resolved(&self) -> bool {
        self.prototype.layout_resolved()
    }

    /// On-disk space reserved for the entry, padding included
    pub const fn reserved_bytes(&self) -> u64 {
        self.header.reserved_bytes()
    }

    /// On-disk space actually used by the entry
    pub const fn occupied_bytes(&self) -> u64 {
        self.header.occupied_bytes()
    }

    /// Fresh seekable stream positioned at 0
    pub fn create_stream(&self) -> PackedFileStream<Arc<DatFile>> {
        self.prototype.clone()
    }

    /// Decompress the whole file
    pub fn read_all(&self) -> Result<Vec<u8>> {
        Ok(self.create_stream().read_all()?)
    }

    /// Decode the file contents as `T`
    pub fn as_resource<T: Resource>(&self) -> Result<T> {
        T::from_packed(self.read_all()?, Some(&self.path))
    }
}

/// Bounded LRU of file lookups
pub struct LookupCache {
    entries: Mutex<LruCache<FileId, Arc<FileLookup>>>,
}

impl LookupCache {
    /// Cache holding at most `capacity` lookups
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Cached lookup for `file`, or build one with `open`.
    ///
    /// `open` runs without the cache lock held. A failed build leaves the
    /// cache unchanged. When two callers build the same lookup concurrently
    /// the first insert wins.
    pub fn get_or_insert_with<F>(&self, file: FileId, open: F) -> Result<Arc<FileLookup>>
    where
        F: FnOnce() -> Result<FileLookup>,
    {
        if let Some(hit) = self.entries.lock().get(&file) {
            return Ok(Arc::clone(hit));
        }

        let built = Arc::new(open()?);

        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(&file) {
            return Ok(Arc::clone(existing));
        }
        if let Some((evicted, _)) = entries.push(file, Arc::clone(&built)) {
            debug!("Evicted lookup for {} from cache", evicted);
        }
        Ok(built)
    }

    /// Cached lookup without building one
    pub fn get(&self, file: FileId) -> Option<Arc<FileLookup>> {
        self.entries.lock().get(&file).cloned()
    }

    /// Whether `file` is cached, without touching its recency
    pub fn contains(&self, file: FileId) -> bool {
        self.entries.lock().contains(&file)
    }

    /// Number of cached lookups
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Maximum number of cached lookups
    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }

    /// Drop every cached lookup
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
