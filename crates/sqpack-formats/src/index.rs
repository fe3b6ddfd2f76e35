//! SqPack `.index` files
//!
//! An index file starts with the common SqPack header, followed by an index
//! segment header describing where the hash table and the synonym table
//! live. Hash table rows map a `(folder hash, file hash)` pair to a packed
//! `(data file id, offset)` locator. Rows whose hash pair collides with
//! another path carry the synonym flag; the colliding files are listed in
//! the synonym table together with their literal paths.

use crate::error::{Result, SqPackError};
use binrw::BinRead;
use binrw::io::Cursor;
use std::path::Path;
use tracing::{debug, trace};

/// SqPack magic bytes
pub const SQPACK_MAGIC: [u8; 8] = *b"SqPack\0\0";

/// Size of one hash table row
pub const HASH_ENTRY_SIZE: usize = 16;

/// Size of one synonym table row
pub const SYNONYM_ENTRY_SIZE: usize = 256;

/// Width of the NUL-padded path buffer in a synonym row
pub const SYNONYM_PATH_SIZE: usize = 240;

/// Common header at the start of `.index` and `.dat` files
#[derive(Debug, Clone, Copy, BinRead)]
#[br(little)]
pub struct SqPackHeader {
    /// Always `SqPack\0\0`
    pub magic: [u8; 8],
    /// Platform id (0 = win32)
    #[br(pad_after = 3)]
    pub platform_id: u8,
    /// Size of this header, also the offset of the next segment header
    pub header_size: u32,
    /// Format version
    pub version: u32,
    /// 1 = dat, 2 = index
    pub kind: u32,
}

impl SqPackHeader {
    /// Parse and check the magic
    pub fn parse(data: &[u8]) -> Result<Self> {
        let header = Self::read(&mut Cursor::new(data))?;
        if header.magic != SQPACK_MAGIC {
            return Err(SqPackError::InvalidMagic(header.magic));
        }
        Ok(header)
    }
}

/// Location of one table inside an index file
#[derive(Debug, Clone, Copy, BinRead)]
#[br(little)]
pub struct Segment {
    /// Absolute offset in the index file
    pub offset: u32,
    /// Size in bytes
    pub size: u32,
    /// SHA-1 of the segment (not verified)
    #[br(pad_after = 44)]
    pub sha1: [u8; 20],
}

impl Segment {
    fn bytes<'a>(&self, data: &'a [u8], name: &str) -> Result<&'a [u8]> {
        let start = self.offset as usize;
        let end = start
            .checked_add(self.size as usize)
            .ok_or_else(|| SqPackError::OutOfBounds(format!("{name} segment size overflows")))?;
        data.get(start..end).ok_or_else(|| {
            SqPackError::OutOfBounds(format!(
                "{name} segment 0x{start:X}..0x{end:X} exceeds file size 0x{:X}",
                data.len()
            ))
        })
    }
}

/// Index segment header, located right after the SqPack header
#[derive(Debug, Clone, Copy, BinRead)]
#[br(little)]
pub struct IndexHeader {
    /// Size of this header
    pub size: u32,
    /// Header version
    pub version: u32,
    /// Hash table (`folder hash, file hash` rows)
    pub hash_table: Segment,
    /// Number of `.datN` files in this set
    pub data_file_count: u32,
    /// Synonym table (literal path rows)
    pub synonym_table: Segment,
    /// Free-space table
    pub empty_blocks: Segment,
    /// Folder summary table
    pub folders: Segment,
    /// 0 = hash-pair index, 2 = full-path index
    pub index_type: u32,
}

#[derive(BinRead)]
#[br(little)]
struct RawHashEntry {
    file_hash: u32,
    folder_hash: u32,
    #[br(pad_after = 4)]
    packed: u32,
}

#[derive(BinRead)]
#[br(little)]
struct RawSynonymEntry {
    file_hash: u32,
    folder_hash: u32,
    packed: u32,
    conflict_index: u32,
    path: [u8; SYNONYM_PATH_SIZE],
}

/// Where a file lives, unpacked from an index locator word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Locator {
    /// Set when the real entries are in the synonym table
    pub is_synonym: bool,
    /// `N` in `.datN`
    pub data_file_id: u8,
    /// Byte offset of the packed file in the dat
    pub offset: u64,
}

impl Locator {
    /// Unpack a locator word: bit 0 synonym, bits 1-3 dat id, the rest is offset / 8
    pub const fn unpack(packed: u32) -> Self {
        Self {
            is_synonym: packed & 1 != 0,
            data_file_id: ((packed >> 1) & 0x7) as u8,
            offset: (packed & !0xF) as u64 * 8,
        }
    }

    /// Pack back into a locator word (offset must be a multiple of 128)
    pub const fn pack(&self) -> u32 {
        ((self.offset / 8) as u32 & !0xF) | ((self.data_file_id as u32 & 0x7) << 1) | self.is_synonym as u32
    }
}

/// One row of the hash table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// `(folder hash << 32) | file hash`
    pub hash: u64,
    /// `N` in `.datN`
    pub data_file_id: u8,
    /// Byte offset in the dat file
    pub offset: u64,
    /// Real entries for this hash pair are in the synonym table
    pub is_synonym: bool,
}

impl IndexEntry {
    /// Folder half of the composite hash
    pub const fn folder_hash(&self) -> u32 {
        (self.hash >> 32) as u32
    }

    /// File half of the composite hash
    pub const fn file_hash(&self) -> u32 {
        self.hash as u32
    }
}

/// One row of the synonym table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynonymEntry {
    /// Folder hash of `path`
    pub folder_hash: u32,
    /// File hash of `path`
    pub file_hash: u32,
    /// `N` in `.datN`
    pub data_file_id: u8,
    /// Byte offset in the dat file
    pub offset: u64,
    /// Position among entries sharing the hash pair
    pub conflict_index: u32,
    /// Literal full path
    pub path: String,
}

/// A parsed `.index` file
#[derive(Debug, Clone)]
pub struct IndexFile {
    /// Common SqPack header
    pub header: SqPackHeader,
    /// Index segment header
    pub index_header: IndexHeader,
    entries: Vec<IndexEntry>,
    synonyms: Vec<SynonymEntry>,
}

impl IndexFile {
    /// Read and parse an index file from disk
    pub fn open(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        debug!("Parsing index {} ({} bytes)", path.display(), data.len());
        Self::parse(&data)
    }

    /// Parse an index file held in memory
    pub fn parse(data: &[u8]) -> Result<Self> {
        let header = SqPackHeader::parse(data)?;

        let index_start = header.header_size as usize;
        let index_bytes = data.get(index_start..).ok_or_else(|| {
            SqPackError::OutOfBounds(format!(
                "index header at 0x{index_start:X} beyond file size 0x{:X}",
                data.len()
            ))
        })?;
        let index_header = IndexHeader::read(&mut Cursor::new(index_bytes))?;

        let entries = Self::parse_hash_table(index_header.hash_table.bytes(data, "hash table")?)?;
        let synonyms =
            Self::parse_synonym_table(index_header.synonym_table.bytes(data, "synonym table")?)?;

        debug!(
            "Index has {} hash entries, {} synonyms, {} data files",
            entries.len(),
            synonyms.len(),
            index_header.data_file_count
        );

        Ok(Self {
            header,
            index_header,
            entries,
            synonyms,
        })
    }

    fn parse_hash_table(table: &[u8]) -> Result<Vec<IndexEntry>> {
        let count = table.len() / HASH_ENTRY_SIZE;
        let mut cursor = Cursor::new(table);
        let mut entries = Vec::with_capacity(count);

        for _ in 0..count {
            let raw = RawHashEntry::read(&mut cursor)?;
            let locator = Locator::unpack(raw.packed);
            entries.push(IndexEntry {
                hash: (u64::from(raw.folder_hash) << 32) | u64::from(raw.file_hash),
                data_file_id: locator.data_file_id,
                offset: locator.offset,
                is_synonym: locator.is_synonym,
            });
        }

        // Binary search below relies on this; shipped indexes are already sorted.
        entries.sort_by_key(|e| e.hash);
        Ok(entries)
    }

    fn parse_synonym_table(table: &[u8]) -> Result<Vec<SynonymEntry>> {
        let mut cursor = Cursor::new(table);
        let mut synonyms = Vec::new();

        while (cursor.position() as usize) + SYNONYM_ENTRY_SIZE <= table.len() {
            let raw = RawSynonymEntry::read(&mut cursor)?;
            let path_len = raw
                .path
                .iter()
                .position(|&b| b == 0)
                .unwrap_or(SYNONYM_PATH_SIZE);
            if path_len == 0 {
                trace!("Synonym table terminator after {} rows", synonyms.len());
                break;
            }

            let locator = Locator::unpack(raw.packed);
            synonyms.push(SynonymEntry {
                folder_hash: raw.folder_hash,
                file_hash: raw.file_hash,
                data_file_id: locator.data_file_id,
                offset: locator.offset,
                conflict_index: raw.conflict_index,
                path: String::from_utf8_lossy(&raw.path[..path_len]).into_owned(),
            });
        }

        Ok(synonyms)
    }

    /// All hash table rows, sorted by composite hash
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// All synonym rows in table order
    pub fn synonyms(&self) -> &[SynonymEntry] {
        &self.synonyms
    }

    /// Number of files this index declares: non-synonym rows plus synonym rows
    pub fn file_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_synonym).count() + self.synonyms.len()
    }

    /// Look up a hash pair in the hash table
    pub fn find(&self, folder_hash: u32, file_hash: u32) -> Option<&IndexEntry> {
        let key = (u64::from(folder_hash) << 32) | u64::from(file_hash);
        self.entries
            .binary_search_by_key(&key, |e| e.hash)
            .ok()
            .map(|i| &self.entries[i])
    }

    /// Look up a literal path in the synonym table (case-insensitive)
    pub fn find_synonym(&self, path: &str) -> Option<&SynonymEntry> {
        self.synonyms
            .iter()
            .find(|s| s.path.eq_ignore_ascii_case(path))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_locator_unpack() {
        let locator = Locator::unpack(0x0000_1235);
        assert!(locator.is_synonym);
        assert_eq!(locator.data_file_id, 2);
        assert_eq!(locator.offset, 0x1230 * 8);
    }

    #[test]
    fn test_locator_pack_roundtrip() {
        let locator = Locator {
            is_synonym: false,
            data_file_id: 3,
            offset: 0x800,
        };
        assert_eq!(Locator::unpack(locator.pack()), locator);
    }

    #[test]
    fn test_bad_magic() {
        let data = vec![0u8; 0x800];
        assert!(matches!(
            IndexFile::parse(&data),
            Err(SqPackError::InvalidMagic(_))
        ));
    }

    #[test]
    fn test_truncated_header() {
        let mut data = Vec::new();
        data.extend_from_slice(&SQPACK_MAGIC);
        assert!(IndexFile::parse(&data).is_err());
    }
}
