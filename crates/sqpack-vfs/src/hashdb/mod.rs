//! Database of known folder and file names
//!
//! Indexes only carry hashes, so names come from a list of known paths.
//! The database groups them by `(index id, folder hash)` and stores every
//! name once in a shared blob. It is immutable once built or loaded.
//!
//! # Cache format
//!
//! `[i32 compressed length][raw DEFLATE payload]`, where the payload is
//! `[i32 folder table offset][i32 file table offset][i32 end offset]`
//! followed by the NUL-terminated name blob, the folder records (20 bytes,
//! sorted by index id then hash) and the file records (8 bytes, grouped by
//! folder, sorted by hash within a folder). Name offsets are relative to
//! the start of the blob. All integers are little-endian.

mod builder;
#[cfg(feature = "remote")]
mod remote;

#[cfg(feature = "remote")]
pub use remote::{download_path_list, write_cached_file_from_url};

use crate::{Result, VfsError};
use binrw::io::Cursor;
use binrw::{BinRead, BinWrite};
use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use sqpack_formats::IndexId;
use std::io::{Read, Write};
use std::path::Path;
use tracing::{debug, info, warn};

/// Size of the payload header holding the three table offsets
pub const PAYLOAD_HEADER_SIZE: usize = 12;

/// Size of one folder record
pub const FOLDER_RECORD_SIZE: usize = 20;

/// Size of one file record
pub const FILE_RECORD_SIZE: usize = 8;

/// Upper bound on the decompressed payload of a cache file
const MAX_PAYLOAD_SIZE: u64 = 1 << 30;

/// Folder record as stored in the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct FolderRecord {
    /// Offset of the folder name in the blob
    pub name_offset: i32,
    /// Index set the folder lives in
    pub index_id: u32,
    /// Hash of the folder path
    pub hash: u32,
    /// First file record of this folder
    pub file_start: i32,
    /// Number of file records
    pub file_count: i32,
}

/// File record as stored in the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct FileRecord {
    /// Offset of the file name in the blob
    pub name_offset: i32,
    /// Hash of the file name
    pub hash: u32,
}

/// Known folder and file names
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashDatabase {
    blob: String,
    folders: Vec<FolderRecord>,
    files: Vec<FileRecord>,
}

/// A folder known to the database
#[derive(Debug, Clone, Copy)]
pub struct FolderEntry<'a> {
    db: &'a HashDatabase,
    position: usize,
}

impl<'a> FolderEntry<'a> {
    fn record(&self) -> &'a FolderRecord {
        &self.db.folders[self.position]
    }

    fn file_records(&self) -> &'a [FileRecord] {
        let record = self.record();
        let start = record.file_start as usize;
        &self.db.files[start..start + record.file_count as usize]
    }

    /// Position in the folder table, usable with [`HashDatabase::folder_at`]
    pub const fn position(&self) -> usize {
        self.position
    }

    /// Full folder path, e.g. `chara/equipment/e0001/model`
    pub fn name(&self) -> &'a str {
        self.db.name_at(self.record().name_offset).unwrap_or_default()
    }

    /// Index set the folder lives in
    pub fn index_id(&self) -> IndexId {
        IndexId(self.record().index_id)
    }

    /// Hash of the folder path
    pub fn hash(&self) -> u32 {
        self.record().hash
    }

    /// Number of known files in the folder
    pub fn file_count(&self) -> usize {
        self.record().file_count as usize
    }

    /// Known files as `(hash, name)`, sorted by hash
    pub fn files(&self) -> impl Iterator<Item = (u32, &'a str)> + 'a {
        let db = self.db;
        self.file_records()
            .iter()
            .map(move |f| (f.hash, db.name_at(f.name_offset).unwrap_or_default()))
    }

    /// Name of the file with `file_hash` in this folder
    pub fn file_name(&self, file_hash: u32) -> Option<&'a str> {
        let files = self.file_records();
        let i = files.binary_search_by_key(&file_hash, |f| f.hash).ok()?;
        self.db.name_at(files[i].name_offset)
    }
}

impl HashDatabase {
    /// Database with no names; every lookup misses
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of known folders
    pub fn folder_count(&self) -> usize {
        self.folders.len()
    }

    /// Number of known files
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// No names at all
    pub fn is_empty(&self) -> bool {
        self.folders.is_empty()
    }

    /// All folders in table order
    pub fn folders(&self) -> impl Iterator<Item = FolderEntry<'_>> {
        (0..self.folders.len()).map(move |position| FolderEntry { db: self, position })
    }

    /// Folder at a table position
    pub fn folder_at(&self, position: usize) -> Option<FolderEntry<'_>> {
        (position < self.folders.len()).then_some(FolderEntry { db: self, position })
    }

    /// Find the folder with `folder_hash` in `index_id`
    pub fn resolve_folder(&self, index_id: IndexId, folder_hash: u32) -> Option<FolderEntry<'_>> {
        self.folders
            .binary_search_by_key(&(index_id.0, folder_hash), |f| (f.index_id, f.hash))
            .ok()
            .map(|position| FolderEntry { db: self, position })
    }

    /// Name of a file within a known folder
    pub fn resolve_file_name<'a>(&'a self, folder: &FolderEntry<'a>, file_hash: u32) -> Option<&'a str> {
        folder.file_name(file_hash)
    }

    /// Search every folder of `index_id` for a file with `file_hash`.
    ///
    /// Used when the folder lookup misses; costs one binary search per
    /// folder in the index set.
    pub fn find_file_name_any_folder(&self, index_id: IndexId, file_hash: u32) -> Option<&str> {
        let start = self.folders.partition_point(|f| f.index_id < index_id.0);
        let end = self.folders.partition_point(|f| f.index_id <= index_id.0);
        (start..end).find_map(|position| FolderEntry { db: self, position }.file_name(file_hash))
    }

    fn name_at(&self, offset: i32) -> Option<&str> {
        let start = usize::try_from(offset).ok()?;
        let rest = self.blob.get(start..)?;
        let end = rest.find('\0')?;
        Some(&rest[..end])
    }

    /// Load a cache file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        let db = Self::from_cache_bytes(&data)?;
        info!(
            "Loaded hash database {}: {} folders, {} files",
            path.as_ref().display(),
            db.folder_count(),
            db.file_count()
        );
        Ok(db)
    }

    /// Load a cache file, falling back to an empty database when it is
    /// missing or fails validation
    pub fn load_or_empty<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path.as_ref()) {
            Ok(db) => db,
            Err(VfsError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    "No hash database at {}, names will show as hashes",
                    path.as_ref().display()
                );
                Self::empty()
            }
            Err(e) => {
                warn!(
                    "Ignoring hash database {}: {}",
                    path.as_ref().display(),
                    e
                );
                Self::empty()
            }
        }
    }

    /// Decode the cache file format
    pub fn from_cache_bytes(data: &[u8]) -> Result<Self> {
        let header: [u8; 4] = data
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| corrupt("file shorter than its length prefix"))?;
        let compressed_len = usize::try_from(i32::from_le_bytes(header))
            .map_err(|_| corrupt("negative compressed length"))?;
        let compressed = data
            .get(4..4 + compressed_len)
            .ok_or_else(|| corrupt(format!("compressed length {compressed_len} exceeds file size")))?;

        let mut payload = Vec::new();
        DeflateDecoder::new(compressed)
            .take(MAX_PAYLOAD_SIZE)
            .read_to_end(&mut payload)
            .map_err(|e| corrupt(format!("inflate failed: {e}")))?;

        Self::from_payload(&payload)
    }

    /// Decode and validate a decompressed payload
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        let offset_at = |at: usize| -> Result<usize> {
            let bytes: [u8; 4] = payload
                .get(at..at + 4)
                .and_then(|b| b.try_into().ok())
                .ok_or_else(|| corrupt("payload shorter than its header"))?;
            usize::try_from(i32::from_le_bytes(bytes))
                .map_err(|_| corrupt(format!("negative table offset at {at}")))
        };

        let folder_off = offset_at(0)?;
        let file_off = offset_at(4)?;
        let end_off = offset_at(8)?;

        if !(PAYLOAD_HEADER_SIZE <= folder_off
            && folder_off <= file_off
            && file_off <= end_off
            && end_off <= payload.len())
        {
            return Err(corrupt(format!(
                "table offsets {folder_off}/{file_off}/{end_off} invalid for payload of {} bytes",
                payload.len()
            )));
        }
        if (file_off - folder_off) % FOLDER_RECORD_SIZE != 0 || (end_off - file_off) % FILE_RECORD_SIZE != 0 {
            return Err(corrupt("table sizes are not whole records"));
        }

        let blob = std::str::from_utf8(&payload[PAYLOAD_HEADER_SIZE..folder_off])
            .map_err(|e| corrupt(format!("name blob is not UTF-8: {e}")))?
            .to_string();

        let folder_count = (file_off - folder_off) / FOLDER_RECORD_SIZE;
        let mut folders = Vec::with_capacity(folder_count);
        let mut cursor = Cursor::new(&payload[folder_off..file_off]);
        for _ in 0..folder_count {
            folders.push(FolderRecord::read(&mut cursor).map_err(|e| corrupt(e.to_string()))?);
        }

        let file_count = (end_off - file_off) / FILE_RECORD_SIZE;
        let mut files = Vec::with_capacity(file_count);
        let mut cursor = Cursor::new(&payload[file_off..end_off]);
        for _ in 0..file_count {
            files.push(FileRecord::read(&mut cursor).map_err(|e| corrupt(e.to_string()))?);
        }

        let db = Self {
            blob,
            folders,
            files,
        };
        db.validate()?;
        debug!(
            "Decoded hash database: {} folders, {} files, {} byte name blob",
            db.folders.len(),
            db.files.len(),
            db.blob.len()
        );
        Ok(db)
    }

    fn validate(&self) -> Result<()> {
        for pair in self.folders.windows(2) {
            if (pair[0].index_id, pair[0].hash) >= (pair[1].index_id, pair[1].hash) {
                return Err(corrupt("folder table is not sorted"));
            }
        }

        for (i, folder) in self.folders.iter().enumerate() {
            let start = usize::try_from(folder.file_start)
                .map_err(|_| corrupt(format!("folder {i} has a negative file start")))?;
            let count = usize::try_from(folder.file_count)
                .map_err(|_| corrupt(format!("folder {i} has a negative file count")))?;
            let files = start
                .checked_add(count)
                .and_then(|end| self.files.get(start..end))
                .ok_or_else(|| corrupt(format!("folder {i} file range exceeds file table")))?;

            if self.name_at(folder.name_offset).is_none() {
                return Err(corrupt(format!("folder {i} name offset is invalid")));
            }
            if files.windows(2).any(|w| w[0].hash >= w[1].hash) {
                return Err(corrupt(format!("files of folder {i} are not sorted")));
            }
        }

        if let Some(i) = self.files.iter().position(|f| self.name_at(f.name_offset).is_none()) {
            return Err(corrupt(format!("file {i} name offset is invalid")));
        }

        Ok(())
    }

    /// Encode the decompressed payload
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        let folder_off = PAYLOAD_HEADER_SIZE + self.blob.len();
        let file_off = folder_off + self.folders.len() * FOLDER_RECORD_SIZE;
        let end_off = file_off + self.files.len() * FILE_RECORD_SIZE;
        let to_i32 = |v: usize| {
            i32::try_from(v).map_err(|_| VfsError::Config("hash database exceeds 2 GiB".to_string()))
        };

        let mut payload = Vec::with_capacity(end_off);
        let mut cursor = Cursor::new(&mut payload);
        for offset in [folder_off, file_off, end_off] {
            to_i32(offset)?
                .write_le(&mut cursor)
                .map_err(|e| VfsError::Io(std::io::Error::other(e.to_string())))?;
        }
        cursor.write_all(self.blob.as_bytes())?;
        for folder in &self.folders {
            folder
                .write(&mut cursor)
                .map_err(|e| VfsError::Io(std::io::Error::other(e.to_string())))?;
        }
        for file in &self.files {
            file.write(&mut cursor)
                .map_err(|e| VfsError::Io(std::io::Error::other(e.to_string())))?;
        }
        Ok(payload)
    }

    /// Encode the cache file format
    pub fn to_cache_bytes(&self) -> Result<Vec<u8>> {
        let payload = self.to_payload()?;
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(&payload)?;
        let compressed = encoder.finish()?;

        let len = i32::try_from(compressed.len())
            .map_err(|_| VfsError::Config("hash database exceeds 2 GiB".to_string()))?;
        let mut out = Vec::with_capacity(4 + compressed.len());
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&compressed);
        Ok(out)
    }

    /// Write the cache file format to `path`
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let bytes = self.to_cache_bytes()?;
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path.as_ref(), &bytes)?;
        info!(
            "Wrote hash database {} ({} bytes, {} folders, {} files)",
            path.as_ref().display(),
            bytes.len(),
            self.folder_count(),
            self.file_count()
        );
        Ok(())
    }
}

fn corrupt(reason: impl Into<String>) -> VfsError {
    VfsError::CacheCorrupt(reason.into())
}
