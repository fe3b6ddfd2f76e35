//! Population passes that build the folder tree from index tables
//!
//! The root pass creates one folder per category found on disk. A category
//! pass walks every index set of that category: hash rows are placed by the
//! folder name the hash database knows for them, synonym rows by their
//! literal path. Rows whose folder hash is unknown go under
//! `<unknown>/~{index id}~{folder hash}` so no entry is dropped. Folders
//! created by a category pass stay `Resolving` and share the category's pass
//! until it ends.

use super::Inner;
use super::node::{FileId, FolderId, NameState, PassFuture, ResolutionState, VirtualFile, VirtualFolder};
use crate::{Result, VfsError};
use parking_lot::Mutex;
use sqpack_formats::path::category_name;
use sqpack_formats::{IndexEntry, IndexId, SynonymEntry, split_path};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::{debug, warn};

/// Name of the bucket holding folders missing from the hash database
pub const UNKNOWN_FOLDER: &str = "<unknown>";

impl Inner {
    pub(super) fn populate(&self, id: FolderId) -> Result<()> {
        let folder = self
            .folder_node(id)
            .ok_or_else(|| VfsError::FolderNotFound(id.to_string()))?;
        self.population_count.fetch_add(1, Ordering::Relaxed);

        if folder.parent.is_none() {
            self.populate_root(&folder);
        } else {
            self.populate_category(&folder);
            let finished = finish_subfolders(&folder);
            debug!("Finished {} subfolders of {}", finished, folder.name);
        }

        folder.set_state(ResolutionState::Resolved);
        Ok(())
    }

    fn populate_root(&self, root: &Arc<VirtualFolder>) {
        let mut categories = self.category_folders.write();
        for (category, index_ids) in self.game.categories() {
            let name = category_name(category).map_or_else(|| format!("{category:02x}"), str::to_string);
            let folder = self.create_folder(root, &name, index_ids, ResolutionState::Unresolved, None);
            categories.insert(category, folder.id);
        }
        debug!("Populated root with {} categories", categories.len());
    }

    fn populate_category(&self, folder: &Arc<VirtualFolder>) {
        let mut total = 0usize;
        for &index_id in &folder.index_ids {
            let index = match self.game.index(index_id) {
                Ok(index) => index,
                Err(e) => {
                    warn!("Skipping index {} of {}: {}", index_id, folder.name, e);
                    continue;
                }
            };

            let mut placed: HashMap<u32, (Arc<VirtualFolder>, Option<usize>)> = HashMap::new();
            for entry in index.entries().iter().filter(|e| !e.is_synonym) {
                let (parent, position) = placed
                    .entry(entry.folder_hash())
                    .or_insert_with(|| self.place_hashed_folder(folder, index_id, entry.folder_hash()))
                    .clone();
                self.add_hashed_file(&parent, index_id, entry, position);
            }

            for synonym in index.synonyms() {
                self.add_synonym_file(folder, index_id, synonym);
            }

            debug!(
                "Populated {} from index {}: {} files",
                folder.name,
                index_id,
                index.file_count()
            );
            total += index.file_count();
        }
        debug!("Category {} holds {} files", folder.name, total);
    }

    fn place_hashed_folder(
        &self,
        category: &Arc<VirtualFolder>,
        index_id: IndexId,
        folder_hash: u32,
    ) -> (Arc<VirtualFolder>, Option<usize>) {
        match self.hashdb.resolve_folder(index_id, folder_hash) {
            Some(known) => {
                let relative = relative_folder(known.name(), &category.name);
                (self.ensure_path(category, relative), Some(known.position()))
            }
            None => {
                let bucket = self.ensure_child(category, UNKNOWN_FOLDER);
                let name = format!("~{index_id}~{folder_hash:08X}");
                (self.ensure_child(&bucket, &name), None)
            }
        }
    }

    fn add_hashed_file(
        &self,
        parent: &Arc<VirtualFolder>,
        index_id: IndexId,
        entry: &IndexEntry,
        folder_position: Option<usize>,
    ) {
        self.add_file(
            parent,
            index_id,
            entry.folder_hash(),
            entry.file_hash(),
            entry.data_file_id,
            entry.offset,
            NameState::Unresolved { folder_position },
        );
    }

    fn add_synonym_file(&self, category: &Arc<VirtualFolder>, index_id: IndexId, synonym: &SynonymEntry) {
        let (folder_path, file_name) = split_path(&synonym.path);
        let parent = self.ensure_path(category, relative_folder(folder_path, &category.name));
        self.add_file(
            &parent,
            index_id,
            synonym.folder_hash,
            synonym.file_hash,
            synonym.data_file_id,
            synonym.offset,
            NameState::Resolved(file_name.to_string()),
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn add_file(
        &self,
        parent: &Arc<VirtualFolder>,
        index_id: IndexId,
        folder_hash: u32,
        file_hash: u32,
        data_file_id: u8,
        offset: u64,
        name: NameState,
    ) -> FileId {
        let id = {
            let mut files = self.files.write();
            let id = FileId(files.len());
            files.push(Arc::new(VirtualFile {
                id,
                parent: parent.id,
                index_id,
                folder_hash,
                file_hash,
                data_file_id,
                offset,
                name: Mutex::new(name),
            }));
            id
        };
        parent.contents.write().files.push(id);
        self.locations
            .entry((index_id, data_file_id, offset))
            .or_default()
            .push(id);
        id
    }

    /// Create a folder that is not yet in `parent`
    pub(super) fn create_folder(
        &self,
        parent: &Arc<VirtualFolder>,
        name: &str,
        index_ids: Vec<IndexId>,
        state: ResolutionState,
        pass: Option<PassFuture>,
    ) -> Arc<VirtualFolder> {
        let mut contents = parent.contents.write();
        if let Some(existing) = contents.children.get(name) {
            return Arc::clone(existing);
        }

        let mut folders = self.folders.write();
        let folder = Arc::new(VirtualFolder::new(
            FolderId(folders.len()),
            name.to_string(),
            Some(parent.id),
            index_ids,
            state,
        ));
        *folder.population.lock() = pass;
        folders.push(Arc::clone(&folder));
        contents.children.insert(name.to_string(), Arc::clone(&folder));
        folder
    }

    fn ensure_child(&self, parent: &Arc<VirtualFolder>, name: &str) -> Arc<VirtualFolder> {
        if let Some(existing) = parent.contents.read().children.get(name) {
            return Arc::clone(existing);
        }
        // Callers reaching the child before the pass ends wait on the pass
        let pass = parent.population.lock().clone();
        self.create_folder(parent, name, Vec::new(), ResolutionState::Resolving, pass)
    }

    fn ensure_path(&self, base: &Arc<VirtualFolder>, relative: &str) -> Arc<VirtualFolder> {
        relative
            .split('/')
            .filter(|segment| !segment.is_empty())
            .fold(Arc::clone(base), |folder, segment| self.ensure_child(&folder, segment))
    }
}

/// Mark every folder created below `category` by its pass as resolved
fn finish_subfolders(category: &VirtualFolder) -> usize {
    let mut stack: Vec<Arc<VirtualFolder>> = category.contents.read().children.values().cloned().collect();
    let mut finished = 0;
    while let Some(folder) = stack.pop() {
        stack.extend(folder.contents.read().children.values().cloned());
        if folder.state() == ResolutionState::Resolving {
            folder.set_state(ResolutionState::Resolved);
            finished += 1;
        }
    }
    finished
}

/// Strip a leading category segment from a folder path
fn relative_folder<'a>(path: &'a str, category: &str) -> &'a str {
    match path.split_once('/') {
        Some((first, rest)) if first.eq_ignore_ascii_case(category) => rest,
        None if path.eq_ignore_ascii_case(category) => "",
        _ => path,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{HashDatabase, VfsConfig, VirtualFileSystem};
    use futures::FutureExt;
    use sqpack_formats::PathHashes;
    use sqpack_test_utils::{GameDirBuilder, encode};

    #[test]
    fn test_relative_folder() {
        assert_eq!(relative_folder("chara/equipment/e0001", "chara"), "equipment/e0001");
        assert_eq!(relative_folder("exd", "exd"), "");
        assert_eq!(relative_folder("000000", "common"), "000000");
        assert_eq!(relative_folder("charactor/x", "chara"), "charactor/x");
    }

    fn child(folder: &VirtualFolder, name: &str) -> Arc<VirtualFolder> {
        Arc::clone(&folder.contents.read().children[name])
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_subfolders_wait_for_category_pass() {
        let paths = [
            "chara/equipment/e0001/model/c0101e0001_top.mdl",
            "chara/equipment/e0001/model/c0101e0001_dwn.mdl",
        ];
        let mut builder = GameDirBuilder::new();
        for path in paths {
            let hashes = PathHashes::of(path);
            let packed = encode::standard_file(&encode::chunk(path.as_bytes(), 300));
            builder.add_file(IndexId::from_path(path).unwrap().0, hashes.folder, hashes.file, &packed);
        }
        let dir = builder.write_temp().unwrap();
        let vfs = VirtualFileSystem::with_hash_database(VfsConfig::new(dir.path()), HashDatabase::build(paths)).unwrap();

        let root = vfs.folders_resolved(vfs.root()).await.unwrap();
        let chara = vfs.inner.folder_node(vfs.folders(root).unwrap()[0]).unwrap();
        assert_eq!(chara.name, "chara");

        // Hold the category pass open while the tree is filled in
        let (release, held) = futures::channel::oneshot::channel::<()>();
        chara.set_state(ResolutionState::Resolving);
        *chara.population.lock() = Some(async move { held.await.map_err(|e| e.to_string()) }.boxed().shared());
        vfs.inner.populate_category(&chara);

        let model = child(&child(&child(&chara, "equipment"), "e0001"), "model");
        assert_eq!(model.state(), ResolutionState::Resolving);
        let mut waiting = Box::pin(vfs.folders_resolved(model.id));
        assert!(waiting.as_mut().now_or_never().is_none());

        assert_eq!(finish_subfolders(&chara), 3);
        chara.set_state(ResolutionState::Resolved);
        release.send(()).unwrap();

        assert_eq!(waiting.await.unwrap(), model.id);
        assert_eq!(model.state(), ResolutionState::Resolved);
        assert_eq!(vfs.files(model.id).unwrap().len(), 2);
    }
}
