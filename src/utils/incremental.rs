// Change detection for watch mode
// Tracks what every module file looked like at the last successful build

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use serde::{Serialize, Deserialize};
use crate::core::models::ModuleGraph;
use crate::utils::hash::content_hash;

/// File fingerprint for change detection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStamp {
    pub hash: String,
    pub modified: Option<SystemTime>,
}

impl FileStamp {
    /// Create a stamp from a file on disk
    pub fn read(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok();
        Ok(Self {
            hash: content_hash(&bytes),
            modified,
        })
    }
}

/// Outcome of comparing reported paths against the stamps
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Tracked files whose content differs or that are gone
    pub modified: Vec<PathBuf>,
    /// Files the last build never loaded
    pub untracked: Vec<PathBuf>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.modified.is_empty() && self.untracked.is_empty()
    }
}

/// Path -> stamp for every module file of the last good build
#[derive(Debug, Clone, Default)]
pub struct WatchState {
    stamps: HashMap<PathBuf, FileStamp>,
}

impl WatchState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamps taken from the graph's own content hashes, so a file saved
    /// without edits never counts as a change.
    pub fn from_graph(graph: &ModuleGraph) -> Self {
        let mut state = Self::new();
        state.refresh(graph);
        state
    }

    /// Sync with a new graph: new modules are added, dropped modules forgotten
    pub fn refresh(&mut self, graph: &ModuleGraph) {
        let mut stamps = HashMap::with_capacity(graph.len());
        for node in graph.nodes() {
            let path = node.id.path().to_path_buf();
            let modified = std::fs::metadata(&path).and_then(|m| m.modified()).ok();
            stamps.insert(
                path,
                FileStamp {
                    hash: node.content_hash.clone(),
                    modified,
                },
            );
        }
        self.stamps = stamps;
    }

    pub fn track(&mut self, path: PathBuf, stamp: FileStamp) {
        self.stamps.insert(path, stamp);
    }

    pub fn get(&self, path: &Path) -> Option<&FileStamp> {
        self.stamps.get(path)
    }

    /// Classify reported paths. Tracked files with an unchanged hash are dropped.
    pub fn detect_changes<'a, I>(&self, paths: I) -> ChangeSet
    where
        I: IntoIterator<Item = &'a PathBuf>,
    {
        let mut changes = ChangeSet::default();
        for path in paths {
            match self.stamps.get(path) {
                Some(stamp) => match FileStamp::read(path) {
                    Ok(current) if current.hash == stamp.hash => {}
                    // Deleted or unreadable counts as modified
                    _ => changes.modified.push(path.clone()),
                },
                None => changes.untracked.push(path.clone()),
            }
        }
        changes.modified.sort();
        changes.modified.dedup();
        changes.untracked.sort();
        changes.untracked.dedup();
        changes
    }

    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }

    /// Clear all state
    pub fn clear(&mut self) {
        self.stamps.clear();
    }
}
