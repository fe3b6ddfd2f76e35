//! Folder and file nodes of the virtual tree

use crate::hashdb::HashDatabase;
use futures::future::{BoxFuture, Shared};
use parking_lot::{Mutex, RwLock};
use sqpack_formats::IndexId;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Single-flight background pass; the error is stringified so the output is `Clone`
pub(crate) type PassFuture = Shared<BoxFuture<'static, std::result::Result<(), String>>>;

/// Position of a folder in the tree arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FolderId(pub(crate) usize);

/// Position of a file in the tree arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId(pub(crate) usize);

/// Either kind of tree node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeId {
    /// A folder
    Folder(FolderId),
    /// A file
    File(FileId),
}

impl From<FolderId> for NodeId {
    fn from(id: FolderId) -> Self {
        Self::Folder(id)
    }
}

impl From<FileId> for NodeId {
    fn from(id: FileId) -> Self {
        Self::File(id)
    }
}

impl fmt::Display for FolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "folder #{}", self.0)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file #{}", self.0)
    }
}

/// Population progress of a folder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResolutionState {
    /// No population pass has been requested
    Unresolved = 0,
    /// A population pass is running
    Resolving = 1,
    /// Children are final
    Resolved = 2,
}

impl ResolutionState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Unresolved,
            1 => Self::Resolving,
            _ => Self::Resolved,
        }
    }
}

#[derive(Default)]
pub(crate) struct FolderContents {
    pub(crate) children: BTreeMap<String, Arc<VirtualFolder>>,
    pub(crate) files: Vec<FileId>,
}

pub(crate) struct VirtualFolder {
    pub(crate) id: FolderId,
    pub(crate) name: String,
    pub(crate) parent: Option<FolderId>,
    /// Index sets this folder populates from; empty for folders created by a pass
    pub(crate) index_ids: Vec<IndexId>,
    pub(crate) contents: RwLock<FolderContents>,
    state: AtomicU8,
    pub(crate) population: Mutex<Option<PassFuture>>,
    names_resolved: AtomicBool,
    pub(crate) name_pass: Mutex<Option<PassFuture>>,
}

impl VirtualFolder {
    pub(crate) fn new(
        id: FolderId,
        name: String,
        parent: Option<FolderId>,
        index_ids: Vec<IndexId>,
        state: ResolutionState,
    ) -> Self {
        Self {
            id,
            name,
            parent,
            index_ids,
            contents: RwLock::new(FolderContents::default()),
            state: AtomicU8::new(state as u8),
            population: Mutex::new(None),
            names_resolved: AtomicBool::new(false),
            name_pass: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> ResolutionState {
        ResolutionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: ResolutionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn names_resolved(&self) -> bool {
        self.names_resolved.load(Ordering::Acquire)
    }

    pub(crate) fn mark_names_resolved(&self) {
        self.names_resolved.store(true, Ordering::Release);
    }

    pub(crate) fn child_ids(&self) -> Vec<FolderId> {
        self.contents.read().children.values().map(|c| c.id).collect()
    }

    pub(crate) fn file_ids(&self) -> Vec<FileId> {
        self.contents.read().files.clone()
    }
}

/// Name of a file.
///
/// `Unresolved` moves to `Resolved` or `Fallback` once. A `Fallback` name can
/// still become `Resolved` when a literal path hashing to the file is found;
/// a `Resolved` name never changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum NameState {
    /// Not looked up yet; carries the hash database folder when known
    Unresolved { folder_position: Option<usize> },
    /// Known name
    Resolved(String),
    /// Looked up without success; shown as the hex hash
    Fallback,
}

pub(crate) struct VirtualFile {
    pub(crate) id: FileId,
    pub(crate) parent: FolderId,
    pub(crate) index_id: IndexId,
    pub(crate) folder_hash: u32,
    pub(crate) file_hash: u32,
    pub(crate) data_file_id: u8,
    pub(crate) offset: u64,
    pub(crate) name: Mutex<NameState>,
}

impl VirtualFile {
    pub(crate) fn fallback_name(&self) -> String {
        format!("{:08X}", self.file_hash)
    }

    /// Current display name without running the resolver
    pub(crate) fn display_name(&self) -> String {
        match &*self.name.lock() {
            NameState::Resolved(name) => name.clone(),
            NameState::Unresolved { .. } | NameState::Fallback => self.fallback_name(),
        }
    }

    pub(crate) fn is_name_resolved(&self) -> bool {
        !matches!(&*self.name.lock(), NameState::Unresolved { .. })
    }

    /// Run the resolver if it has not run yet and return the display name
    pub(crate) fn resolve_name(&self, db: &HashDatabase) -> String {
        let mut state = self.name.lock();
        if let NameState::Unresolved { folder_position } = *state {
            let found = folder_position
                .and_then(|position| db.folder_at(position))
                .and_then(|folder| folder.file_name(self.file_hash))
                .or_else(|| db.find_file_name_any_folder(self.index_id, self.file_hash));
            *state = match found {
                Some(name) => NameState::Resolved(name.to_string()),
                None => NameState::Fallback,
            };
        }
        match &*state {
            NameState::Resolved(name) => name.clone(),
            NameState::Unresolved { .. } | NameState::Fallback => self.fallback_name(),
        }
    }

    /// Record a name learned from a literal path whose hashes match this file.
    ///
    /// Replaces an unresolved or hash fallback name; a resolved name is kept.
    pub(crate) fn set_known_name(&self, name: &str) {
        let mut state = self.name.lock();
        if !matches!(&*state, NameState::Resolved(_)) {
            *state = NameState::Resolved(name.to_string());
        }
    }
}
