use std::path::{Path, PathBuf};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use crate::core::config::WatchOptions;
use crate::utils::{Logger, Result};

/// Decides which file system events reach the coordinator
#[derive(Debug, Clone)]
pub struct EventFilter {
    options: WatchOptions,
    outdir: PathBuf,
}

impl EventFilter {
    pub fn new(options: WatchOptions, outdir: PathBuf) -> Self {
        Self { options, outdir }
    }

    /// Paths of `event` worth a rebuild. Build output and editor droppings
    /// never count, or every emit would trigger the next build.
    pub fn relevant_paths(&self, event: &Event) -> Vec<PathBuf> {
        if matches!(event.kind, EventKind::Access(_) | EventKind::Other) {
            return Vec::new();
        }
        event
            .paths
            .iter()
            .filter(|p| !self.is_ignored(p))
            .cloned()
            .collect()
    }

    pub fn is_ignored(&self, path: &Path) -> bool {
        if path.starts_with(&self.outdir) || self.options.is_ignored(path) {
            return true;
        }
        let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        name.ends_with('~') || name.ends_with(".swp") || name.ends_with(".tmp")
    }
}

/// `notify` watcher feeding changed paths into a tokio channel.
/// Dropping it stops the watch.
pub struct FsWatcher {
    _watcher: RecommendedWatcher,
    root: PathBuf,
}

impl FsWatcher {
    pub fn start(root: &Path, filter: EventFilter) -> Result<(Self, UnboundedReceiver<Vec<PathBuf>>)> {
        let (tx, rx) = unbounded_channel();
        let mut watcher = Self::create(tx, filter)?;
        watcher.watch(root, RecursiveMode::Recursive)?;
        Logger::debug(&format!("Watching {}", root.display()));

        Ok((
            Self {
                _watcher: watcher,
                root: root.to_path_buf(),
            },
            rx,
        ))
    }

    fn create(tx: UnboundedSender<Vec<PathBuf>>, filter: EventFilter) -> Result<RecommendedWatcher> {
        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let paths = filter.relevant_paths(&event);
                    if !paths.is_empty() {
                        let _ = tx.send(paths);
                    }
                }
                Err(e) => Logger::warn(&format!("Watch error: {}", e)),
            },
            notify::Config::default(),
        )?;
        Ok(watcher)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
