//! Writes synthetic `sqpack/` directories
//!
//! Hashes and index ids are supplied by the caller so this crate does not
//! depend on the crates it helps test.

use crate::encode::{ALIGNMENT, push_u32};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

const SQPACK_HEADER_SIZE: usize = 0x400;
const SEGMENT_HEADER_SIZE: usize = 0x400;
const SYNONYM_PATH_SIZE: usize = 240;

#[derive(Default)]
struct IndexSet {
    dat: Vec<u8>,
    rows: BTreeMap<(u32, u32), u32>,
    synonyms: Vec<(u32, u32, u32, String)>,
    /// Rows left in the synonym segment after the terminator
    stale_synonyms: Vec<(u32, u32, String)>,
}

impl IndexSet {
    fn append(&mut self, packed_file: &[u8]) -> u64 {
        if self.dat.is_empty() {
            self.dat = sqpack_header(1);
            self.dat.resize(SQPACK_HEADER_SIZE + SEGMENT_HEADER_SIZE, 0);
        }
        let offset = self.dat.len() as u64;
        self.dat.extend_from_slice(packed_file);
        self.dat.resize(self.dat.len().next_multiple_of(ALIGNMENT), 0);
        offset
    }
}

/// Builder for a synthetic game directory
///
/// Every index set gets a single `.dat0`.
pub struct GameDirBuilder {
    platform: String,
    sets: BTreeMap<u32, IndexSet>,
}

impl Default for GameDirBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GameDirBuilder {
    /// Empty builder for the `win32` platform
    pub fn new() -> Self {
        Self {
            platform: "win32".to_string(),
            sets: BTreeMap::new(),
        }
    }

    /// Use a different platform suffix in file names
    pub fn with_platform(mut self, platform: &str) -> Self {
        self.platform = platform.to_string();
        self
    }

    /// Add a file addressed by its hash pair. Returns its offset in `.dat0`.
    pub fn add_file(
        &mut self,
        index_id: u32,
        folder_hash: u32,
        file_hash: u32,
        packed_file: &[u8],
    ) -> u64 {
        let set = self.sets.entry(index_id).or_default();
        let offset = set.append(packed_file);
        set.rows.insert((folder_hash, file_hash), locator(offset, false));
        offset
    }

    /// Add a file whose hash pair collides with another path.
    ///
    /// The hash row gets the synonym flag and the file is listed in the
    /// synonym table under its literal `path`.
    pub fn add_synonym(
        &mut self,
        index_id: u32,
        folder_hash: u32,
        file_hash: u32,
        path: &str,
        packed_file: &[u8],
    ) -> u64 {
        let set = self.sets.entry(index_id).or_default();
        let offset = set.append(packed_file);
        set.rows.insert((folder_hash, file_hash), locator(0, true));
        set.synonyms
            .push((folder_hash, file_hash, locator(offset, false), path.to_string()));
        offset
    }

    /// Leave a well-formed synonym row after the table's terminator.
    ///
    /// Readers must stop at the terminator and never report this row.
    pub fn add_stale_synonym(&mut self, index_id: u32, folder_hash: u32, file_hash: u32, path: &str) {
        self.sets
            .entry(index_id)
            .or_default()
            .stale_synonyms
            .push((folder_hash, file_hash, path.to_string()));
    }

    /// Add an index set with no files
    pub fn add_index(&mut self, index_id: u32) {
        self.sets.entry(index_id).or_default();
    }

    /// Write `sqpack/{ffxiv|exN}/{id}.{platform}.index` and `.dat0` under `root`
    pub fn write(&self, root: &Path) -> io::Result<()> {
        for (&index_id, set) in &self.sets {
            let dir = root.join("sqpack").join(expansion_dir(index_id));
            std::fs::create_dir_all(&dir)?;

            let stem = format!("{index_id:06x}.{}", self.platform);
            std::fs::write(dir.join(format!("{stem}.index")), build_index(set))?;

            let dat = if set.dat.is_empty() {
                let mut dat = sqpack_header(1);
                dat.resize(SQPACK_HEADER_SIZE + SEGMENT_HEADER_SIZE, 0);
                dat
            } else {
                set.dat.clone()
            };
            std::fs::write(dir.join(format!("{stem}.dat0")), dat)?;
        }
        Ok(())
    }

    /// Write into a fresh temporary directory
    pub fn write_temp(&self) -> io::Result<tempfile::TempDir> {
        let dir = tempfile::tempdir()?;
        self.write(dir.path())?;
        Ok(dir)
    }

    /// Path of the `.dat0` file for `index_id` under `root`
    pub fn dat_path(&self, root: &Path, index_id: u32) -> PathBuf {
        root.join("sqpack")
            .join(expansion_dir(index_id))
            .join(format!("{index_id:06x}.{}.dat0", self.platform))
    }
}

fn expansion_dir(index_id: u32) -> String {
    match (index_id >> 8) & 0xFF {
        0 => "ffxiv".to_string(),
        n => format!("ex{n}"),
    }
}

fn locator(offset: u64, synonym: bool) -> u32 {
    (offset / 8) as u32 | u32::from(synonym)
}

fn sqpack_header(kind: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(SQPACK_HEADER_SIZE);
    out.extend_from_slice(b"SqPack\0\0");
    out.extend_from_slice(&[0, 0, 0, 0]);
    push_u32(&mut out, SQPACK_HEADER_SIZE as u32);
    push_u32(&mut out, 1);
    push_u32(&mut out, kind);
    out.resize(SQPACK_HEADER_SIZE, 0);
    out
}

fn push_segment(out: &mut Vec<u8>, offset: usize, size: usize) {
    push_u32(out, offset as u32);
    push_u32(out, size as u32);
    out.resize(out.len() + 20 + 44, 0);
}

fn push_synonym_row(out: &mut Vec<u8>, folder: u32, file: u32, packed: u32, conflict_index: usize, path: &str) {
    push_u32(out, file);
    push_u32(out, folder);
    push_u32(out, packed);
    push_u32(out, conflict_index as u32);
    let mut name = path.as_bytes().to_vec();
    name.resize(SYNONYM_PATH_SIZE, 0);
    out.extend_from_slice(&name);
}

fn build_index(set: &IndexSet) -> Vec<u8> {
    let mut hash_table = Vec::with_capacity(set.rows.len() * 16);
    // BTreeMap order is (folder, file), which is the composite-hash order
    for (&(folder, file), &packed) in &set.rows {
        push_u32(&mut hash_table, file);
        push_u32(&mut hash_table, folder);
        push_u32(&mut hash_table, packed);
        push_u32(&mut hash_table, 0);
    }

    let mut synonym_table = Vec::new();
    for (conflict_index, (folder, file, packed, path)) in set.synonyms.iter().enumerate() {
        push_synonym_row(&mut synonym_table, *folder, *file, *packed, conflict_index, path);
    }
    if !set.synonyms.is_empty() || !set.stale_synonyms.is_empty() {
        // Terminator row
        synonym_table.resize(synonym_table.len() + 256, 0);
    }
    for (conflict_index, (folder, file, path)) in set.stale_synonyms.iter().enumerate() {
        let conflict_index = set.synonyms.len() + conflict_index;
        push_synonym_row(&mut synonym_table, *folder, *file, locator(0, false), conflict_index, path);
    }

    let hash_offset = SQPACK_HEADER_SIZE + SEGMENT_HEADER_SIZE;
    let synonym_offset = hash_offset + hash_table.len();
    let end = synonym_offset + synonym_table.len();

    let mut out = sqpack_header(2);
    push_u32(&mut out, SEGMENT_HEADER_SIZE as u32);
    push_u32(&mut out, 1);
    push_segment(&mut out, hash_offset, hash_table.len());
    push_u32(&mut out, 1);
    push_segment(&mut out, synonym_offset, synonym_table.len());
    push_segment(&mut out, end, 0);
    push_segment(&mut out, end, 0);
    push_u32(&mut out, 0);
    out.resize(hash_offset, 0);
    out.extend_from_slice(&hash_table);
    out.extend_from_slice(&synonym_table);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::{Block, standard_file};

    #[test]
    fn test_layout_on_disk() {
        let mut builder = GameDirBuilder::new();
        let offset = builder.add_file(0x0a0000, 1, 2, &standard_file(&[Block::Raw(vec![1; 8])]));
        assert_eq!(offset, 0x800);
        builder.add_index(0x020101);

        let dir = builder.write_temp().unwrap();
        assert!(dir.path().join("sqpack/ffxiv/0a0000.win32.index").is_file());
        assert!(dir.path().join("sqpack/ex1/020101.win32.index").is_file());
        assert!(builder.dat_path(dir.path(), 0x0a0000).is_file());

        let index = std::fs::read(dir.path().join("sqpack/ffxiv/0a0000.win32.index")).unwrap();
        assert_eq!(&index[..6], b"SqPack");
        assert_eq!(index.len(), 0x800 + 16);
    }

    #[test]
    fn test_locator_encoding() {
        assert_eq!(locator(0x800, false), 0x100);
        assert_eq!(locator(0, true), 1);
    }
}
