//! Building a hash database from a list of known paths

use super::{FileRecord, FolderRecord, HashDatabase};
use crate::Result;
use sqpack_formats::{IndexId, sqpack_hash, split_path};
use std::collections::{BTreeMap, HashMap};
use std::io::BufRead;
use std::path::Path;
use tracing::{debug, info, warn};

type FolderBucket = (String, BTreeMap<u32, String>);

#[derive(Default)]
struct NameBlob {
    text: String,
    offsets: HashMap<String, i32>,
}

impl NameBlob {
    fn intern(&mut self, name: &str) -> i32 {
        if let Some(&offset) = self.offsets.get(name) {
            return offset;
        }
        let offset = self.text.len() as i32;
        self.text.push_str(name);
        self.text.push('\0');
        self.offsets.insert(name.to_string(), offset);
        offset
    }
}

/// Folder buckets collected before the name blob is laid out
#[derive(Default)]
struct PathCollector {
    buckets: BTreeMap<(u32, u32), FolderBucket>,
    accepted: usize,
    discarded: usize,
}

impl PathCollector {
    fn add(&mut self, path: &str) {
        let path = path.trim();
        if path.is_empty() {
            return;
        }

        let (folder, file) = split_path(path);
        let Some(index_id) = IndexId::from_path(path).filter(|_| !file.is_empty()) else {
            self.discarded += 1;
            return;
        };

        let (_, files) = self
            .buckets
            .entry((index_id.0, sqpack_hash(folder)))
            .or_insert_with(|| (folder.to_string(), BTreeMap::new()));
        files
            .entry(sqpack_hash(file))
            .or_insert_with(|| file.to_string());
        self.accepted += 1;
    }

    fn finish(self) -> HashDatabase {
        let mut blob = NameBlob::default();
        let mut folders = Vec::with_capacity(self.buckets.len());
        let mut files = Vec::new();

        for ((index_id, hash), (name, bucket)) in self.buckets {
            folders.push(FolderRecord {
                name_offset: blob.intern(&name),
                index_id,
                hash,
                file_start: files.len() as i32,
                file_count: bucket.len() as i32,
            });
            for (file_hash, file_name) in bucket {
                files.push(FileRecord {
                    name_offset: blob.intern(&file_name),
                    hash: file_hash,
                });
            }
        }

        debug!(
            "Hash database from {} paths ({} discarded): {} folders, {} files",
            self.accepted,
            self.discarded,
            folders.len(),
            files.len()
        );

        HashDatabase {
            blob: blob.text,
            folders,
            files,
        }
    }
}

impl HashDatabase {
    /// Build from full paths such as `chara/equipment/e0001/model/c0101e0001_top.mdl`.
    ///
    /// Paths outside every known category are skipped. When two paths hash
    /// identically the first one wins.
    pub fn build<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut collector = PathCollector::default();
        for path in paths {
            collector.add(path.as_ref());
        }
        collector.finish()
    }

    /// Build from newline-delimited paths.
    ///
    /// Lines are consumed one at a time; a line that is not UTF-8 is logged
    /// and skipped. Read errors still fail the build.
    pub fn build_from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut collector = PathCollector::default();
        for (number, line) in reader.split(b'\n').enumerate() {
            let line = line?;
            match std::str::from_utf8(&line) {
                Ok(path) => collector.add(path),
                Err(e) => warn!("Skipping path list line {}: {}", number + 1, e),
            }
        }
        Ok(collector.finish())
    }

    /// Build from a newline-delimited path list and write the cache file
    pub fn write_cached_file<R: BufRead, P: AsRef<Path>>(reader: R, cache_path: P) -> Result<Self> {
        let db = Self::build_from_reader(reader)?;
        db.save(cache_path.as_ref())?;
        info!(
            "Built hash database with {} folders and {} files",
            db.folder_count(),
            db.file_count()
        );
        Ok(db)
    }
}
