use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::Mutex;
use crate::core::config::EmitOptions;
use crate::core::interfaces::FileSystemService;
use crate::core::models::{BuildManifest, ChunkPlan, ManifestEntry};
use crate::infrastructure::processors::chunk_renderer::{render_index_html, RenderedChunk};
use crate::utils::{EmitError, Logger};

pub const INDEX_HTML: &str = "index.html";

/// What one emit pass did
#[derive(Debug, Clone, Default)]
pub struct EmitOutcome {
    pub manifest: BuildManifest,
    /// Chunk names whose file was (re)written
    pub written: Vec<String>,
    /// Files removed because their chunk disappeared or was renamed
    pub removed: Vec<String>,
}

/// Writes rendered chunks to the output directory.
///
/// Every file is written atomically and retried with exponential backoff.
/// Chunks whose hash and file are unchanged are skipped. `manifest.json` goes
/// last, so a reader that sees a manifest sees all of its chunks.
///
/// A pass is not transactional across files. If one chunk write fails, the
/// siblings written before it stay on disk while the manifest is left as it
/// was. With `[contenthash]` in the file names those siblings are new paths
/// and the previous manifest still describes a complete set. Without it, a
/// sibling may already have replaced its old file in place.
pub struct EmitController {
    fs: Arc<dyn FileSystemService>,
    outdir: PathBuf,
    options: EmitOptions,
    html: bool,
    /// One writer per chunk name at a time
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl EmitController {
    pub fn new(fs: Arc<dyn FileSystemService>, outdir: PathBuf, options: EmitOptions, html: bool) -> Self {
        Self {
            fs,
            outdir,
            options,
            html,
            locks: DashMap::new(),
        }
    }

    pub fn outdir(&self) -> &Path {
        &self.outdir
    }

    /// Emit `plan`. Chunks missing from `rendered` keep their entry from
    /// `previous` and are not touched on disk.
    pub async fn emit(
        &self,
        plan: &ChunkPlan,
        rendered: &[RenderedChunk],
        previous: &BuildManifest,
    ) -> Result<EmitOutcome, EmitError> {
        let by_name: BTreeMap<&str, &RenderedChunk> =
            rendered.iter().map(|c| (c.name.as_str(), c)).collect();

        let mut manifest = BuildManifest {
            chunks: BTreeMap::new(),
            entrypoints: plan.entrypoints.clone(),
        };
        for chunk in &plan.chunks {
            let entry = match by_name.get(chunk.name.as_str()) {
                Some(r) => ManifestEntry {
                    file: r.file.clone(),
                    hash: r.hash.clone(),
                    kind: r.kind.clone(),
                    modules: r.modules.clone(),
                },
                None => previous.get(&chunk.name).cloned().ok_or_else(|| {
                    EmitError::Manifest(format!(
                        "chunk '{}' was neither rendered nor emitted before",
                        chunk.name
                    ))
                })?,
            };
            manifest.insert(chunk.name.clone(), entry);
        }

        let to_write: Vec<&RenderedChunk> = rendered
            .iter()
            .filter(|chunk| {
                let unchanged = previous
                    .get(&chunk.name)
                    .map(|prev| prev.hash == chunk.hash && prev.file == chunk.file)
                    .unwrap_or(false)
                    && self.fs.file_exists(&self.outdir.join(&chunk.file));
                if unchanged {
                    Logger::chunk_unchanged(&chunk.name);
                }
                !unchanged
            })
            .collect();

        let results = join_all(to_write.iter().map(|chunk| self.write_chunk(chunk))).await;
        let mut written = Vec::with_capacity(results.len());
        for (chunk, result) in to_write.iter().zip(results) {
            result?;
            written.push(chunk.name.clone());
        }

        let live: BTreeSet<&str> = manifest.chunks.values().map(|e| e.file.as_str()).collect();
        let mut removed = Vec::new();
        for entry in previous.chunks.values() {
            if live.contains(entry.file.as_str()) {
                continue;
            }
            match self.fs.remove_file(&self.outdir.join(&entry.file)).await {
                Ok(()) => removed.push(entry.file.clone()),
                Err(e) => Logger::warn(&format!("Could not remove stale {}: {}", entry.file, e)),
            }
        }

        if self.html {
            let html = render_index_html(&manifest);
            self.write_with_retry(&self.outdir.join(INDEX_HTML), html.as_bytes()).await?;
        }

        let json = serde_json::to_vec_pretty(&manifest).map_err(|e| EmitError::Manifest(e.to_string()))?;
        self.write_with_retry(&self.outdir.join(BuildManifest::FILE_NAME), &json).await?;

        Ok(EmitOutcome {
            manifest,
            written,
            removed,
        })
    }

    async fn write_chunk(&self, chunk: &RenderedChunk) -> Result<(), EmitError> {
        let lock = self
            .locks
            .entry(chunk.name.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        self.write_with_retry(&self.outdir.join(&chunk.file), chunk.code.as_bytes()).await?;
        Logger::chunk_emitted(&chunk.name, &chunk.file, chunk.code.len());
        Ok(())
    }

    async fn write_with_retry(&self, path: &Path, bytes: &[u8]) -> Result<(), EmitError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.fs.write_atomic(path, bytes).await {
                Ok(()) => return Ok(()),
                Err(source) if attempts > self.options.retries => {
                    return Err(EmitError::Write {
                        path: path.to_path_buf(),
                        attempts,
                        source,
                    });
                }
                Err(e) => {
                    let delay = self.options.backoff_ms.saturating_mul(1u64 << (attempts - 1).min(16));
                    Logger::warn(&format!(
                        "Write to {} failed ({}), retrying in {}ms",
                        path.display(),
                        e,
                        delay
                    ));
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
            }
        }
    }
}
