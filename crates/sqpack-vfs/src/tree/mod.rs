//! Lazy folder tree over an archive
//!
//! Nodes live in two arenas owned by the filesystem and refer to their parent
//! by id. A folder's children appear when it is first resolved through
//! [`VirtualFileSystem::folders_resolved`]; the pass runs on the blocking pool
//! and concurrent callers share it. File names are resolved by a second pass,
//! [`VirtualFileSystem::file_names_resolved`]. Until then a file shows its
//! hash as `{:08X}`.

mod node;
mod populate;

pub use node::{FileId, FolderId, NodeId, ResolutionState};
pub use populate::UNKNOWN_FOLDER;

use crate::archive::GameData;
use crate::config::VfsConfig;
use crate::hashdb::HashDatabase;
use crate::lookup::{FileLookup, LookupCache};
use crate::{Result, VfsError};
use dashmap::DashMap;
use futures::FutureExt;
use node::{PassFuture, VirtualFile, VirtualFolder};
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use sqpack_formats::{IndexId, PathHashes, split_path};
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

const ROOT: FolderId = FolderId(0);

pub(crate) struct Inner {
    config: VfsConfig,
    game: GameData,
    hashdb: Arc<HashDatabase>,
    folders: RwLock<Vec<Arc<VirtualFolder>>>,
    files: RwLock<Vec<Arc<VirtualFile>>>,
    category_folders: RwLock<BTreeMap<u8, FolderId>>,
    locations: DashMap<(IndexId, u8, u64), Vec<FileId>>,
    population_count: AtomicUsize,
    lookups: LookupCache,
}

impl Inner {
    fn folder_node(&self, id: FolderId) -> Option<Arc<VirtualFolder>> {
        self.folders.read().get(id.0).cloned()
    }

    fn file_node(&self, id: FileId) -> Option<Arc<VirtualFile>> {
        self.files.read().get(id.0).cloned()
    }

    fn resolve_names(&self, folder: &VirtualFolder) {
        let files: Vec<Arc<VirtualFile>> = folder
            .file_ids()
            .into_iter()
            .filter_map(|id| self.file_node(id))
            .collect();

        files
            .par_iter()
            .filter(|file| !file.is_name_resolved())
            .for_each(|file| {
                file.resolve_name(&self.hashdb);
            });

        folder.mark_names_resolved();
        debug!("Resolved {} file names in {}", files.len(), folder.name);
    }
}

fn claim_pass(slot: &Mutex<Option<PassFuture>>, start: impl FnOnce() -> PassFuture) -> PassFuture {
    slot.lock().get_or_insert_with(start).clone()
}

/// Browsable view of one game directory
#[derive(Clone)]
pub struct VirtualFileSystem {
    inner: Arc<Inner>,
}

impl VirtualFileSystem {
    /// Discover the archive and load the hash database named in `config`.
    ///
    /// A missing or corrupt hash database cache is not an error; every name
    /// then shows as a hash.
    pub fn open(config: VfsConfig) -> Result<Self> {
        let hashdb = config
            .hash_db_cache
            .as_ref()
            .map_or_else(HashDatabase::empty, HashDatabase::load_or_empty);
        Self::with_hash_database(config, hashdb)
    }

    /// Discover the archive and use an already built hash database
    pub fn with_hash_database(config: VfsConfig, hashdb: HashDatabase) -> Result<Self> {
        config.validate()?;
        let game = GameData::discover(&config.game_path, config.platform)?;
        let capacity = NonZeroUsize::new(config.lookup_cache_capacity)
            .ok_or_else(|| VfsError::Config("lookup_cache_capacity must be greater than zero".to_string()))?;

        let root = Arc::new(VirtualFolder::new(
            ROOT,
            String::new(),
            None,
            Vec::new(),
            ResolutionState::Unresolved,
        ));

        info!(
            "Opened {} ({} index sets, {} known folders)",
            config.game_path.display(),
            game.index_ids().count(),
            hashdb.folder_count()
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                game,
                hashdb: Arc::new(hashdb),
                folders: RwLock::new(vec![root]),
                files: RwLock::new(Vec::new()),
                category_folders: RwLock::new(BTreeMap::new()),
                locations: DashMap::new(),
                population_count: AtomicUsize::new(0),
                lookups: LookupCache::new(capacity),
            }),
        })
    }

    /// Configuration the filesystem was opened with
    pub fn config(&self) -> &VfsConfig {
        &self.inner.config
    }

    /// Underlying index and dat access
    pub fn game_data(&self) -> &GameData {
        &self.inner.game
    }

    /// Names used to label the tree
    pub fn hash_database(&self) -> &HashDatabase {
        &self.inner.hashdb
    }

    /// Cache of open file bindings
    pub fn lookup_cache(&self) -> &LookupCache {
        &self.inner.lookups
    }

    /// The root folder; its children are the categories
    pub const fn root(&self) -> FolderId {
        ROOT
    }

    /// Number of population passes run so far
    pub fn population_count(&self) -> usize {
        self.inner.population_count.load(Ordering::Relaxed)
    }

    fn folder_node(&self, id: FolderId) -> Result<Arc<VirtualFolder>> {
        self.inner
            .folder_node(id)
            .ok_or_else(|| VfsError::FolderNotFound(id.to_string()))
    }

    pub(crate) fn file_node(&self, id: FileId) -> Result<Arc<VirtualFile>> {
        self.inner
            .file_node(id)
            .ok_or_else(|| VfsError::FileNotFound(id.to_string()))
    }

    /// Population state of a folder
    pub fn resolution_state(&self, id: FolderId) -> Result<ResolutionState> {
        Ok(self.folder_node(id)?.state())
    }

    /// Whether the file names of a folder have been resolved
    pub fn file_names_are_resolved(&self, id: FolderId) -> Result<bool> {
        Ok(self.folder_node(id)?.names_resolved())
    }

    /// Populate a folder if that has not happened yet.
    ///
    /// At most one pass ever runs per folder; callers arriving while it runs
    /// wait for the same pass.
    pub async fn folders_resolved(&self, id: FolderId) -> Result<FolderId> {
        let folder = self.folder_node(id)?;
        if folder.state() == ResolutionState::Resolved {
            return Ok(id);
        }

        let pass = claim_pass(&folder.population, || {
            folder.set_state(ResolutionState::Resolving);
            let inner = Arc::clone(&self.inner);
            let handle = tokio::task::spawn_blocking(move || inner.populate(id));
            async move {
                match handle.await {
                    Ok(result) => result.map_err(|e| e.to_string()),
                    Err(e) => Err(e.to_string()),
                }
            }
            .boxed()
            .shared()
        });

        pass.await.map_err(VfsError::Task)?;
        Ok(id)
    }

    /// Resolve the names of every file directly in a folder, populating it first
    pub async fn file_names_resolved(&self, id: FolderId) -> Result<FolderId> {
        self.folders_resolved(id).await?;
        let folder = self.folder_node(id)?;
        if folder.names_resolved() {
            return Ok(id);
        }

        let pass = claim_pass(&folder.name_pass, || {
            let inner = Arc::clone(&self.inner);
            let folder = Arc::clone(&folder);
            let handle = tokio::task::spawn_blocking(move || inner.resolve_names(&folder));
            async move { handle.await.map_err(|e| e.to_string()) }
                .boxed()
                .shared()
        });

        pass.await.map_err(VfsError::Task)?;
        Ok(id)
    }

    /// Child folders, sorted by name. Empty until the folder is resolved.
    pub fn folders(&self, id: FolderId) -> Result<Vec<FolderId>> {
        Ok(self.folder_node(id)?.child_ids())
    }

    /// Files directly in a folder. Empty until the folder is resolved.
    pub fn files(&self, id: FolderId) -> Result<Vec<FileId>> {
        Ok(self.folder_node(id)?.file_ids())
    }

    /// Parent of a node; `None` for the root
    pub fn parent(&self, node: NodeId) -> Result<Option<FolderId>> {
        match node {
            NodeId::Folder(id) => Ok(self.folder_node(id)?.parent),
            NodeId::File(id) => Ok(Some(self.file_node(id)?.parent)),
        }
    }

    /// Name of a folder; empty for the root
    pub fn folder_name(&self, id: FolderId) -> Result<String> {
        Ok(self.folder_node(id)?.name.clone())
    }

    /// Current name of a file, or its hash as `{:08X}` while unresolved
    pub fn file_name(&self, id: FileId) -> Result<String> {
        Ok(self.file_node(id)?.display_name())
    }

    /// Path of a folder with a trailing `/`; empty for the root
    pub fn folder_path(&self, id: FolderId) -> Result<String> {
        let mut names = Vec::new();
        let mut current = Some(id);
        while let Some(folder_id) = current {
            let folder = self.folder_node(folder_id)?;
            if folder.parent.is_some() {
                names.push(folder.name.clone());
            }
            current = folder.parent;
        }

        let mut path = String::new();
        for name in names.iter().rev() {
            path.push_str(name);
            path.push('/');
        }
        Ok(path)
    }

    /// Parent folder path followed by the file name
    pub fn file_path(&self, id: FileId) -> Result<String> {
        let file = self.file_node(id)?;
        let mut path = self.folder_path(file.parent)?;
        path.push_str(&file.display_name());
        Ok(path)
    }

    /// Full path of any node
    pub fn full_path(&self, node: NodeId) -> Result<String> {
        match node {
            NodeId::Folder(id) => self.folder_path(id),
            NodeId::File(id) => self.file_path(id),
        }
    }

    /// Index set, data file and offset of a file
    pub fn file_location(&self, id: FileId) -> Result<(IndexId, u8, u64)> {
        let file = self.file_node(id)?;
        Ok((file.index_id, file.data_file_id, file.offset))
    }

    /// Folder and file hash of a file
    pub fn file_hashes(&self, id: FileId) -> Result<(u32, u32)> {
        let file = self.file_node(id)?;
        Ok((file.folder_hash, file.file_hash))
    }

    async fn category_folder(&self, category: u8) -> Result<FolderId> {
        self.folders_resolved(ROOT).await?;
        let found = self.inner.category_folders.read().get(&category).copied();
        found.ok_or_else(|| VfsError::FolderNotFound(format!("category {category:02x}")))
    }

    /// Resolve a folder by path, populating each folder on the way.
    /// Segments compare case-insensitively.
    pub async fn find_folder(&self, path: &str) -> Result<FolderId> {
        let mut current = self.folders_resolved(ROOT).await?;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let folder = self.folder_node(current)?;
            let next = folder
                .contents
                .read()
                .children
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(segment))
                .map(|(_, child)| child.id);
            current = next.ok_or_else(|| VfsError::FolderNotFound(path.to_string()))?;
            self.folders_resolved(current).await?;
        }
        Ok(current)
    }

    /// Resolve a literal path to a file.
    ///
    /// The path is hashed and looked up in its index; the owning category is
    /// populated if needed. The file takes its name from `path` even when the
    /// hash database does not know it.
    pub async fn find_file(&self, path: &str) -> Result<FileId> {
        let not_found = || VfsError::FileNotFound(path.to_string());

        let index_id = IndexId::from_path(path).ok_or_else(not_found)?;
        let index = match self.inner.game.index(index_id) {
            Ok(index) => index,
            Err(VfsError::IndexNotFound(_)) => return Err(not_found()),
            Err(e) => return Err(e),
        };

        let hashes = PathHashes::of(path);
        let (data_file_id, offset) = match index.find(hashes.folder, hashes.file) {
            Some(entry) if !entry.is_synonym => (entry.data_file_id, entry.offset),
            Some(_) => {
                let synonym = index.find_synonym(path).ok_or_else(not_found)?;
                (synonym.data_file_id, synonym.offset)
            }
            None => return Err(not_found()),
        };

        let category = self.category_folder(index_id.category()).await?;
        self.folders_resolved(category).await?;

        let candidates = self
            .inner
            .locations
            .get(&(index_id, data_file_id, offset))
            .map(|ids| ids.value().clone())
            .unwrap_or_default();
        let file = candidates
            .into_iter()
            .filter_map(|id| self.inner.file_node(id))
            .find(|file| file.folder_hash == hashes.folder && file.file_hash == hashes.file)
            .ok_or_else(not_found)?;

        let (_, name) = split_path(path);
        file.set_known_name(name);
        Ok(file.id)
    }

    /// Open binding for a file, cached in the lookup cache
    pub fn lookup(&self, id: FileId) -> Result<Arc<FileLookup>> {
        self.inner
            .lookups
            .get_or_insert_with(id, || FileLookup::open(self, id))
    }
}
