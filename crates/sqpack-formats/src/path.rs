//! Path hashing and archive addressing
//!
//! SqPack never stores readable paths for most entries. A path is reduced to
//! a folder hash and a file hash (CRC-32/JAMCRC over the lowercased text),
//! and its first segments select which index/dat set ("index id") holds it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Hash a path fragment the way SqPack indexes do.
///
/// The input is ASCII-lowercased before hashing.
pub fn sqpack_hash(text: &str) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    for chunk in text.as_bytes().chunks(256) {
        let mut lowered = [0u8; 256];
        for (dst, src) in lowered.iter_mut().zip(chunk) {
            *dst = src.to_ascii_lowercase();
        }
        hasher.update(&lowered[..chunk.len()]);
    }
    !hasher.finalize()
}

/// Folder, file and full-path hashes for one path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PathHashes {
    /// Hash of everything before the last `/`
    pub folder: u32,
    /// Hash of the last segment
    pub file: u32,
    /// Hash of the whole path
    pub full: u32,
}

impl PathHashes {
    /// Hash a full path. A path without `/` has an empty folder part.
    pub fn of(path: &str) -> Self {
        let (folder, file) = split_path(path);
        Self {
            folder: sqpack_hash(folder),
            file: sqpack_hash(file),
            full: sqpack_hash(path),
        }
    }

    /// Composite key used by index hash tables: `(folder << 32) | file`
    pub const fn composite(&self) -> u64 {
        ((self.folder as u64) << 32) | self.file as u64
    }
}

/// Split a path into `(folder, file)` at the last `/`.
pub fn split_path(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(pos) => (&path[..pos], &path[pos + 1..]),
        None => ("", path),
    }
}

/// Known top-level categories and their ids
pub const CATEGORIES: &[(&str, u8)] = &[
    ("common", 0x00),
    ("bgcommon", 0x01),
    ("bg", 0x02),
    ("cut", 0x03),
    ("chara", 0x04),
    ("shader", 0x05),
    ("ui", 0x06),
    ("sound", 0x07),
    ("vfx", 0x08),
    ("ui_script", 0x09),
    ("exd", 0x0a),
    ("game_script", 0x0b),
    ("music", 0x0c),
    ("sqpack_test", 0x12),
    ("debug", 0x13),
];

/// Category id for a category name (case-insensitive)
pub fn category_id(name: &str) -> Option<u8> {
    CATEGORIES
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|&(_, id)| id)
}

/// Category name for a category id
pub fn category_name(id: u8) -> Option<&'static str> {
    CATEGORIES
        .iter()
        .find(|&&(_, i)| i == id)
        .map(|&(n, _)| n)
}

/// Identifies one index/dat set: `(category << 16) | (expansion << 8) | chunk`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexId(pub u32);

impl IndexId {
    /// Build from parts
    pub const fn new(category: u8, expansion: u8, chunk: u8) -> Self {
        Self(((category as u32) << 16) | ((expansion as u32) << 8) | chunk as u32)
    }

    /// Category id
    pub const fn category(self) -> u8 {
        (self.0 >> 16) as u8
    }

    /// Expansion number (0 = base game)
    pub const fn expansion(self) -> u8 {
        (self.0 >> 8) as u8
    }

    /// Chunk number within the category/expansion
    pub const fn chunk(self) -> u8 {
        self.0 as u8
    }

    /// Directory under `sqpack/` holding this set
    pub fn expansion_dir(self) -> String {
        match self.expansion() {
            0 => "ffxiv".to_string(),
            n => format!("ex{n}"),
        }
    }

    /// `.index` file name, e.g. `040000.win32.index`
    pub fn index_file_name(self, platform: Platform) -> String {
        format!("{:06x}.{}.index", self.0, platform.as_str())
    }

    /// `.dat` file name, e.g. `040000.win32.dat0`
    pub fn dat_file_name(self, platform: Platform, data_file_id: u8) -> String {
        format!("{:06x}.{}.dat{}", self.0, platform.as_str(), data_file_id)
    }

    /// Parse a six-digit hex index id as used in file names
    pub fn from_hex(text: &str) -> Option<Self> {
        if text.len() != 6 || !text.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        u32::from_str_radix(text, 16).ok().map(Self)
    }

    /// Work out which index set a path belongs to.
    ///
    /// Returns `None` for paths whose first segment is neither a known
    /// category nor an explicit six-digit index id.
    pub fn from_path(path: &str) -> Option<Self> {
        let mut segments = path.split('/');
        let first = segments.next()?;

        if let Some(explicit) = Self::from_hex(first) {
            return Some(explicit);
        }

        let category = category_id(first)?;
        let expansion = segments
            .next()
            .and_then(|s| {
                let digits = s.strip_prefix("ex").or_else(|| s.strip_prefix("EX"))?;
                digits.parse::<u8>().ok()
            })
            .unwrap_or(0);

        let chunk = if category == 0x02 && expansion > 0 {
            segments
                .next()
                .and_then(|s| s.get(..2))
                .and_then(|digits| digits.parse::<u8>().ok())
                .unwrap_or(0)
        } else {
            0
        };

        Some(Self::new(category, expansion, chunk))
    }
}

impl fmt::Display for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06x}", self.0)
    }
}

/// Platform suffix used in index/dat file names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Windows client
    #[default]
    Win32,
    /// PlayStation 3
    Ps3,
    /// PlayStation 4
    Ps4,
    /// PlayStation 5
    Ps5,
}

impl Platform {
    /// File name component
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Win32 => "win32",
            Self::Ps3 => "ps3",
            Self::Ps4 => "ps4",
            Self::Ps5 => "ps5",
        }
    }

    /// Platform id stored in SqPack headers
    pub const fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::Win32),
            1 => Some(Self::Ps3),
            2 => Some(Self::Ps4),
            3 => Some(Self::Ps5),
            _ => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_case_insensitive() {
        assert_eq!(sqpack_hash("Chara/Equipment"), sqpack_hash("chara/equipment"));
        assert_ne!(sqpack_hash("chara/equipment"), sqpack_hash("chara/weapon"));
    }

    #[test]
    fn test_hash_is_inverted_crc32() {
        assert_eq!(sqpack_hash("exd"), !crc32fast::hash(b"exd"));
        assert_eq!(sqpack_hash(""), !crc32fast::hash(b""));
    }

    #[test]
    fn test_hash_long_input() {
        let long = "A".repeat(1000);
        assert_eq!(sqpack_hash(&long), !crc32fast::hash(long.to_lowercase().as_bytes()));
    }

    #[test]
    fn test_path_hashes() {
        let hashes = PathHashes::of("exd/root.exl");
        assert_eq!(hashes.folder, sqpack_hash("exd"));
        assert_eq!(hashes.file, sqpack_hash("root.exl"));
        assert_eq!(hashes.full, sqpack_hash("exd/root.exl"));
        assert_eq!(hashes.composite() >> 32, u64::from(hashes.folder));
        assert_eq!(hashes.composite() & 0xFFFF_FFFF, u64::from(hashes.file));
    }

    #[test]
    fn test_split_path() {
        assert_eq!(split_path("a/b/c.txt"), ("a/b", "c.txt"));
        assert_eq!(split_path("c.txt"), ("", "c.txt"));
    }

    #[test]
    fn test_index_id_from_path() {
        assert_eq!(IndexId::from_path("exd/root.exl"), Some(IndexId(0x0a0000)));
        assert_eq!(
            IndexId::from_path("chara/equipment/e0001/model/c0101e0001_top.mdl"),
            Some(IndexId(0x040000))
        );
        assert_eq!(
            IndexId::from_path("bg/ex1/01_roc_r2/twn/r2t1/level/planlive.lgb"),
            Some(IndexId(0x020101))
        );
        assert_eq!(
            IndexId::from_path("bg/ffxiv/sea_s1/twn/s1t1/level/bg.lgb"),
            Some(IndexId(0x020000))
        );
        assert_eq!(
            IndexId::from_path("music/ex2/bgm_ex2_field_01.scd"),
            Some(IndexId(0x0c0200))
        );
        assert_eq!(IndexId::from_path("000000/abc.dat"), Some(IndexId(0)));
        assert_eq!(IndexId::from_path("nonsense/file.txt"), None);
    }

    #[test]
    fn test_file_names() {
        let id = IndexId::new(0x02, 1, 1);
        assert_eq!(id.expansion_dir(), "ex1");
        assert_eq!(id.index_file_name(Platform::Win32), "020101.win32.index");
        assert_eq!(id.dat_file_name(Platform::Ps4, 3), "020101.ps4.dat3");
        assert_eq!(IndexId(0x0a0000).expansion_dir(), "ffxiv");
        assert_eq!(IndexId::from_hex("0a0000"), Some(IndexId(0x0a0000)));
        assert_eq!(IndexId::from_hex("0a00"), None);
    }

    #[test]
    fn test_category_lookup() {
        assert_eq!(category_id("CHARA"), Some(0x04));
        assert_eq!(category_name(0x0c), Some("music"));
        assert_eq!(category_name(0x55), None);
    }
}
