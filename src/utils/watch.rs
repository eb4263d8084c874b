// Watch mode
// Turns file change notifications into incremental rebuilds

use crate::core::interfaces::BuildService;
use crate::core::models::{BuildManifest, BuildSnapshot, ModuleId};
use crate::utils::{Logger, Result, StitchError, WatchState};
use std::collections::BTreeSet;
use std::future::Future;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    Watching,
    Rebuilding,
    Stopped,
}

/// What `handle_changes` did with a batch of paths
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebuildOutcome {
    /// The coordinator is not watching
    Ignored,
    /// Nothing tracked actually changed
    Unchanged,
    Rebuilt { written: Vec<String> },
    /// Last-known-good output was kept
    Failed(String),
}

/// Drives rebuilds for watch mode.
///
/// Keeps the last successful snapshot. A failed rebuild leaves it (and the
/// files on disk) untouched and remembers the failed paths, so the next
/// change retries them too.
pub struct IncrementalCoordinator<B: BuildService> {
    service: B,
    state: CoordinatorState,
    watch_state: WatchState,
    snapshot: Option<BuildSnapshot>,
    /// Paths of failed attempts, retried with the next batch
    dirty: BTreeSet<PathBuf>,
    debounce: Duration,
}

impl<B: BuildService> IncrementalCoordinator<B> {
    pub fn new(service: B, debounce: Duration) -> Self {
        Self {
            service,
            state: CoordinatorState::Idle,
            watch_state: WatchState::new(),
            snapshot: None,
            dirty: BTreeSet::new(),
            debounce,
        }
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    /// Last successful build
    pub fn snapshot(&self) -> Option<&BuildSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn manifest(&self) -> Option<&BuildManifest> {
        self.snapshot.as_ref().map(|s| &s.manifest)
    }

    pub fn watch_state(&self) -> &WatchState {
        &self.watch_state
    }

    pub fn service(&self) -> &B {
        &self.service
    }

    /// Idle -> Watching, with an initial full build. A failing initial build
    /// is logged; the next change retries it.
    pub async fn start(&mut self) -> Result<()> {
        if self.state != CoordinatorState::Idle {
            return Err(StitchError::watch(format!("cannot start from {:?}", self.state)));
        }
        self.transition(CoordinatorState::Watching);

        Logger::info("🔨 Initial build...");
        if let Err(e) = self.full_build().await {
            Logger::error(&format!("Initial build failed:\n{}", e.format_detailed()));
        }
        Ok(())
    }

    pub fn stop(&mut self) {
        if self.state == CoordinatorState::Stopped {
            return;
        }
        self.transition(CoordinatorState::Stopped);
        self.watch_state.clear();
        self.dirty.clear();
    }

    pub async fn handle_changes(&mut self, paths: &[PathBuf]) -> RebuildOutcome {
        if self.state != CoordinatorState::Watching {
            return RebuildOutcome::Ignored;
        }

        let Some(previous) = self.snapshot.clone() else {
            // No good build yet: anything may fix it
            self.transition(CoordinatorState::Rebuilding);
            let outcome = match self.full_build().await {
                Ok(written) => RebuildOutcome::Rebuilt { written },
                Err(e) => {
                    Logger::error(&format!("Build failed:\n{}", e.format_detailed()));
                    RebuildOutcome::Failed(e.to_string())
                }
            };
            self.transition(CoordinatorState::Watching);
            return outcome;
        };

        let candidates: BTreeSet<PathBuf> = paths.iter().cloned().chain(self.dirty.iter().cloned()).collect();
        let changes = self.watch_state.detect_changes(candidates.iter());
        for path in &changes.untracked {
            Logger::debug(&format!("Not part of the build: {}", path.display()));
        }
        if changes.modified.is_empty() {
            self.dirty.clear();
            return RebuildOutcome::Unchanged;
        }

        let changed: Vec<ModuleId> = changes
            .modified
            .iter()
            .flat_map(|path| previous.graph.find_by_path(path))
            .collect();
        let invalidated = previous.graph.with_ancestors(changed.iter());

        Logger::rebuild_start(changes.modified.len(), invalidated.len());
        self.transition(CoordinatorState::Rebuilding);
        let started = Instant::now();

        let outcome = match self.service.rebuild(&previous, &invalidated).await {
            Ok(snapshot) => {
                self.watch_state.refresh(&snapshot.graph);
                self.dirty.clear();
                let written = snapshot.result.written.clone();
                Logger::info(&format!(
                    "✅ Rebuild complete in {}ms ({} chunks written)",
                    started.elapsed().as_millis(),
                    written.len()
                ));
                self.snapshot = Some(snapshot);
                RebuildOutcome::Rebuilt { written }
            }
            Err(e) => {
                Logger::error(&format!(
                    "Rebuild failed, keeping last good output:\n{}",
                    e.format_detailed()
                ));
                self.dirty.extend(changes.modified);
                RebuildOutcome::Failed(e.to_string())
            }
        };

        self.transition(CoordinatorState::Watching);
        outcome
    }

    /// Long-lived loop: debounce bursts of events into one rebuild, never run
    /// two at once, and follow up immediately on events queued meanwhile.
    /// Ends on `shutdown` or when the event stream closes.
    pub async fn run<S>(&mut self, mut events: UnboundedReceiver<Vec<PathBuf>>, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        if self.state == CoordinatorState::Idle {
            self.start().await?;
        }
        tokio::pin!(shutdown);

        let mut batch: BTreeSet<PathBuf> = BTreeSet::new();
        let mut closed = false;
        let mut follow_up = false;

        while !closed || !batch.is_empty() {
            if !follow_up {
                tokio::select! {
                    _ = &mut shutdown => break,
                    received = events.recv() => match received {
                        Some(paths) => batch.extend(paths),
                        None => closed = true,
                    },
                }

                // Quiet period: every new event restarts the timer
                while !closed {
                    tokio::select! {
                        _ = &mut shutdown => {
                            self.stop();
                            return Ok(());
                        }
                        received = events.recv() => match received {
                            Some(paths) => batch.extend(paths),
                            None => closed = true,
                        },
                        _ = tokio::time::sleep(self.debounce) => break,
                    }
                }
            }

            if !batch.is_empty() {
                let paths: Vec<PathBuf> = std::mem::take(&mut batch).into_iter().collect();
                Logger::debug(&format!("{} paths changed", paths.len()));
                self.handle_changes(&paths).await;
            }

            // Whatever queued up during the rebuild goes next, without waiting
            while let Ok(paths) = events.try_recv() {
                batch.extend(paths);
            }
            follow_up = !batch.is_empty();
        }

        Logger::info("👋 Stopping watch mode...");
        self.stop();
        Ok(())
    }

    async fn full_build(&mut self) -> Result<Vec<String>> {
        let snapshot = self.service.build().await?;
        self.watch_state = WatchState::from_graph(&snapshot.graph);
        self.dirty.clear();
        let written = snapshot.result.written.clone();
        self.snapshot = Some(snapshot);
        Ok(written)
    }

    fn transition(&mut self, to: CoordinatorState) {
        Logger::state_transition(&format!("{:?}", self.state), &format!("{:?}", to));
        self.state = to;
    }
}
