//! Access to the index and dat files of a game directory

use crate::{Result, VfsError};
use dashmap::DashMap;
use memmap2::{Mmap, MmapOptions};
use parking_lot::Mutex;
use sqpack_formats::{IndexFile, IndexId, PackedFileHeader, Platform, ReadAt};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

enum Backing {
    Mapped(Mmap),
    File(Mutex<File>),
}

/// An open `.datN` file, memory-mapped when possible
pub struct DatFile {
    path: PathBuf,
    size: u64,
    backing: Backing,
}

impl DatFile {
    /// Open a dat file for reading
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();

        debug!("Opening dat: {:?} (size: {} bytes)", path, size);

        let mapped = if size > 0 {
            #[allow(unsafe_code)]
            match unsafe { MmapOptions::new().map(&file) } {
                Ok(mmap) => Some(mmap),
                Err(e) => {
                    debug!("Failed to memory-map dat, using file reader: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let backing = match mapped {
            Some(mmap) => Backing::Mapped(mmap),
            None => Backing::File(Mutex::new(file)),
        };

        Ok(Self {
            path: path.to_path_buf(),
            size,
            backing,
        })
    }

    /// Location on disk
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether reads go through a memory map
    pub const fn is_mapped(&self) -> bool {
        matches!(self.backing, Backing::Mapped(_))
    }
}

impl ReadAt for DatFile {
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        match &self.backing {
            Backing::Mapped(mmap) => mmap[..].read_exact_at(offset, buf),
            Backing::File(file) => {
                let mut file = file.lock();
                file.seek(SeekFrom::Start(offset))?;
                file.read_exact(buf)
            }
        }
    }

    fn size(&self) -> u64 {
        self.size
    }
}

/// Index sets available in a game directory, with lazily loaded indexes
/// and shared dat handles
pub struct GameData {
    game_path: PathBuf,
    platform: Platform,
    available: BTreeSet<IndexId>,
    indexes: DashMap<IndexId, Arc<IndexFile>>,
    dats: DashMap<PathBuf, Weak<DatFile>>,
}

impl GameData {
    /// Scan `sqpack/*/` under `game_path` for `*.{platform}.index` files
    pub fn discover(game_path: &Path, platform: Platform) -> Result<Self> {
        let sqpack = game_path.join("sqpack");
        if !sqpack.is_dir() {
            return Err(VfsError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no sqpack directory under {}", game_path.display()),
            )));
        }

        let suffix = format!(".{}.index", platform.as_str());
        let mut available = BTreeSet::new();

        for dir in std::fs::read_dir(&sqpack)? {
            let dir = dir?;
            if !dir.file_type()?.is_dir() {
                continue;
            }
            let dir_name = dir.file_name().to_string_lossy().into_owned();

            for entry in std::fs::read_dir(dir.path())? {
                let name = entry?.file_name().to_string_lossy().into_owned();
                let Some(stem) = name.strip_suffix(&suffix) else {
                    continue;
                };
                match IndexId::from_hex(stem) {
                    Some(id) if id.expansion_dir() == dir_name => {
                        available.insert(id);
                    }
                    _ => warn!("Skipping unexpected index file {}/{}", dir_name, name),
                }
            }
        }

        info!(
            "Discovered {} index sets under {}",
            available.len(),
            sqpack.display()
        );

        Ok(Self {
            game_path: game_path.to_path_buf(),
            platform,
            available,
            indexes: DashMap::new(),
            dats: DashMap::new(),
        })
    }

    /// Game directory
    pub fn game_path(&self) -> &Path {
        &self.game_path
    }

    /// Platform used in file names
    pub const fn platform(&self) -> Platform {
        self.platform
    }

    /// All discovered index ids, ascending
    pub fn index_ids(&self) -> impl Iterator<Item = IndexId> + '_ {
        self.available.iter().copied()
    }

    /// Whether an index set exists
    pub fn has_index(&self, id: IndexId) -> bool {
        self.available.contains(&id)
    }

    /// Discovered index ids grouped by category id
    pub fn categories(&self) -> BTreeMap<u8, Vec<IndexId>> {
        let mut categories: BTreeMap<u8, Vec<IndexId>> = BTreeMap::new();
        for id in &self.available {
            categories.entry(id.category()).or_default().push(*id);
        }
        categories
    }

    fn set_dir(&self, id: IndexId) -> PathBuf {
        self.game_path.join("sqpack").join(id.expansion_dir())
    }

    /// Path of the `.index` file of a set
    pub fn index_path(&self, id: IndexId) -> PathBuf {
        self.set_dir(id).join(id.index_file_name(self.platform))
    }

    /// Path of a `.datN` file of a set
    pub fn dat_path(&self, id: IndexId, data_file_id: u8) -> PathBuf {
        self.set_dir(id).join(id.dat_file_name(self.platform, data_file_id))
    }

    /// Parsed index of a set, loaded on first use
    pub fn index(&self, id: IndexId) -> Result<Arc<IndexFile>> {
        if !self.has_index(id) {
            return Err(VfsError::IndexNotFound(id));
        }
        if let Some(index) = self.indexes.get(&id) {
            return Ok(Arc::clone(index.value()));
        }

        let parsed = Arc::new(IndexFile::open(&self.index_path(id))?);
        let index = self.indexes.entry(id).or_insert(parsed);
        Ok(Arc::clone(index.value()))
    }

    /// Open a dat file, reusing a handle that is still alive elsewhere
    pub fn open_dat(&self, id: IndexId, data_file_id: u8) -> Result<Arc<DatFile>> {
        let path = self.dat_path(id, data_file_id);
        if let Some(dat) = self.dats.get(&path).and_then(|weak| weak.upgrade()) {
            return Ok(dat);
        }

        let dat = Arc::new(DatFile::open(&path)?);
        self.dats.insert(path, Arc::downgrade(&dat));
        Ok(dat)
    }

    /// Read the packed-file header of an entry
    pub fn packed_header(&self, id: IndexId, data_file_id: u8, offset: u64) -> Result<PackedFileHeader> {
        let dat = self.open_dat(id, data_file_id)?;
        Ok(PackedFileHeader::read_from(dat.as_ref(), offset)?)
    }

    /// Number of dat handles currently alive
    pub fn open_dat_count(&self) -> usize {
        self.dats.iter().filter(|weak| weak.strong_count() > 0).count()
    }
}
