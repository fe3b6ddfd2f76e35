//! Cancellable search over the folder tree
//!
//! Every folder below the search root is resolved (folders and file names)
//! and each child is matched against a [`Query`]. Folders are processed by
//! spawned tasks; a semaphore caps how many run at once. Matching one entry
//! has a time budget and an entry that runs out of it counts as not
//! matching. Errors while processing a folder skip that folder.

mod query;

pub use query::{Candidate, MatchOutcome, Query};

use crate::cancel::CancellationToken;
use crate::config::VfsConfig;
use crate::tree::{FileId, FolderId, NodeId, VirtualFileSystem};
use crate::{Result, VfsError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Minimum time between two progress reports
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

/// Search tuning
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Folders processed at the same time
    pub threads: usize,
    /// Time budget for matching one entry
    pub entry_timeout: Duration,
    /// Stops the search when cancelled
    pub cancel: CancellationToken,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self::from_config(&VfsConfig::default())
    }
}

impl SearchOptions {
    /// Options using the search defaults of a configuration
    pub fn from_config(config: &VfsConfig) -> Self {
        Self {
            threads: config.search_threads,
            entry_timeout: config.search_entry_timeout,
            cancel: CancellationToken::new(),
        }
    }

    /// Set the worker count
    #[must_use]
    pub const fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Set the per-entry time budget
    #[must_use]
    pub const fn with_entry_timeout(mut self, timeout: Duration) -> Self {
        self.entry_timeout = timeout;
        self
    }

    /// Use a cancellation token shared with the caller
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Counters passed to [`SearchObserver::progress`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchProgress {
    /// Entries discovered so far
    pub total: usize,
    /// Entries matched so far
    pub processed: usize,
    /// Most recently matched entry
    pub last: Option<NodeId>,
}

/// Receives search events. Calls come from worker tasks.
pub trait SearchObserver: Send + Sync {
    /// Periodic counters, at most every [`PROGRESS_INTERVAL`] plus a final report
    fn progress(&self, _progress: &SearchProgress) {}

    /// A folder matched
    fn folder_found(&self, _folder: FolderId) {}

    /// A file matched
    fn file_found(&self, _file: FileId) {}
}

impl SearchObserver for () {}

/// Everything a finished search matched
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResults {
    /// Matching folders, sorted by id
    pub folders: Vec<FolderId>,
    /// Matching files, sorted by id
    pub files: Vec<FileId>,
    /// Entries matched against the query
    pub processed: usize,
    /// Entries that ran out of time
    pub timed_out: usize,
}

struct SearchState {
    query: Query,
    entry_timeout: Duration,
    cancel: CancellationToken,
    observer: Arc<dyn SearchObserver>,
    total: AtomicUsize,
    processed: AtomicUsize,
    timed_out: AtomicUsize,
    last: Mutex<Option<NodeId>>,
    last_report: Mutex<Instant>,
    folders: Mutex<Vec<FolderId>>,
    files: Mutex<Vec<FileId>>,
}

impl SearchState {
    fn progress(&self) -> SearchProgress {
        SearchProgress {
            total: self.total.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            last: *self.last.lock(),
        }
    }

    fn report(&self, force: bool) {
        {
            let mut last_report = self.last_report.lock();
            if !force && last_report.elapsed() < PROGRESS_INTERVAL {
                return;
            }
            *last_report = Instant::now();
        }
        self.observer.progress(&self.progress());
    }

    /// Match one entry. Returns `false` once the search is cancelled.
    fn visit(&self, node: NodeId, path: &str, name: &str) -> bool {
        let deadline = Instant::now() + self.entry_timeout;
        let candidate = Candidate {
            path: path.trim_end_matches('/'),
            name,
        };
        let outcome = self.query.matches(candidate, deadline, &self.cancel);
        if outcome == MatchOutcome::Cancelled {
            return false;
        }

        self.processed.fetch_add(1, Ordering::Relaxed);
        *self.last.lock() = Some(node);
        match (outcome, node) {
            (MatchOutcome::Matched, NodeId::Folder(id)) => {
                self.folders.lock().push(id);
                self.observer.folder_found(id);
            }
            (MatchOutcome::Matched, NodeId::File(id)) => {
                self.files.lock().push(id);
                self.observer.file_found(id);
            }
            (MatchOutcome::TimedOut, _) => {
                self.timed_out.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
        self.report(false);
        true
    }

    fn results(&self) -> SearchResults {
        let mut folders = self.folders.lock().clone();
        let mut files = self.files.lock().clone();
        folders.sort_unstable();
        files.sort_unstable();
        SearchResults {
            folders,
            files,
            processed: self.processed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
        }
    }
}

async fn search_folder(
    vfs: VirtualFileSystem,
    state: Arc<SearchState>,
    workers: Arc<Semaphore>,
    folder: FolderId,
) -> Result<Vec<FolderId>> {
    let _permit = workers
        .acquire_owned()
        .await
        .map_err(|e| VfsError::Task(e.to_string()))?;
    if state.cancel.is_cancelled() {
        return Ok(Vec::new());
    }

    vfs.file_names_resolved(folder).await?;
    let base = vfs.folder_path(folder)?;
    let children = vfs.folders(folder)?;
    let files = vfs.files(folder)?;
    state
        .total
        .fetch_add(children.len() + files.len(), Ordering::Relaxed);

    for &child in &children {
        let name = vfs.folder_name(child)?;
        if !state.visit(NodeId::Folder(child), &format!("{base}{name}"), &name) {
            return Ok(Vec::new());
        }
    }
    for &file in &files {
        let name = vfs.file_name(file)?;
        if !state.visit(NodeId::File(file), &format!("{base}{name}"), &name) {
            return Ok(Vec::new());
        }
    }

    Ok(children)
}

impl VirtualFileSystem {
    /// Match every folder and file below `root` against `query`.
    ///
    /// Folders are resolved as the search reaches them. Returns
    /// [`VfsError::InvalidQuery`] for a malformed or empty query and
    /// [`VfsError::Cancelled`] when `options.cancel` fires; in-flight folders
    /// finish matching their current entry before the search returns.
    pub async fn search(
        &self,
        root: FolderId,
        query: &str,
        options: SearchOptions,
        observer: Arc<dyn SearchObserver>,
    ) -> Result<SearchResults> {
        let query = Query::parse(query)?;
        if options.cancel.is_cancelled() {
            return Err(VfsError::Cancelled);
        }
        self.folders_resolved(root).await?;

        let state = Arc::new(SearchState {
            query,
            entry_timeout: options.entry_timeout,
            cancel: options.cancel,
            observer,
            total: AtomicUsize::new(0),
            processed: AtomicUsize::new(0),
            timed_out: AtomicUsize::new(0),
            last: Mutex::new(None),
            last_report: Mutex::new(Instant::now()),
            folders: Mutex::new(Vec::new()),
            files: Mutex::new(Vec::new()),
        });
        let workers = Arc::new(Semaphore::new(options.threads.max(1)));

        debug!(
            "Searching {} for {:?} with {} workers",
            root,
            state.query.as_str(),
            options.threads
        );

        let mut tasks = JoinSet::new();
        tasks.spawn(search_folder(
            self.clone(),
            Arc::clone(&state),
            Arc::clone(&workers),
            root,
        ));

        while let Some(joined) = tasks.join_next().await {
            let subfolders = match joined {
                Ok(Ok(subfolders)) => subfolders,
                Ok(Err(e)) => {
                    warn!("Search skipped a folder: {}", e);
                    Vec::new()
                }
                Err(e) => {
                    warn!("Search worker failed: {}", e);
                    Vec::new()
                }
            };
            if state.cancel.is_cancelled() {
                continue;
            }
            for folder in subfolders {
                tasks.spawn(search_folder(
                    self.clone(),
                    Arc::clone(&state),
                    Arc::clone(&workers),
                    folder,
                ));
            }
        }

        state.report(true);
        if state.cancel.is_cancelled() {
            return Err(VfsError::Cancelled);
        }

        let results = state.results();
        debug!(
            "Search for {:?} matched {} folders and {} files out of {} entries",
            state.query.as_str(),
            results.folders.len(),
            results.files.len(),
            results.processed
        );
        Ok(results)
    }
}
