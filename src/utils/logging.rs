use tracing::{info, warn, error, debug};
use tracing_subscriber::EnvFilter;
use std::time::Instant;

pub struct Logger;

impl Logger {
    /// Install the global subscriber. `RUST_LOG` wins over the verbosity flag.
    pub fn init(verbose: bool) {
        let default_filter = if verbose { "stitch=debug" } else { "stitch=info" };
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_filter));

        // A second init (tests, embedding) keeps the first subscriber.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init();
    }

    pub fn build_start(root: &str, outdir: &str, entries: usize) {
        info!("🧵 Stitch - Build");
        info!("═══════════════════════════════════════");
        info!("📁 Input: {}", root);
        info!("📦 Output: {}", outdir);
        info!("🎯 Entries: {}", entries);
    }

    pub fn graph_built(modules: usize, edges: usize) {
        info!("🕸️  Module graph: {} modules, {} imports", modules, edges);
    }

    pub fn chunks_planned(chunks: usize, shared: usize, runtime: usize) {
        info!(
            "🧩 Planned {} chunks ({} shared, {} runtime)",
            chunks, shared, runtime
        );
    }

    pub fn loading_module(id: &str) {
        debug!("🔍 Loading module: {}", id);
    }

    pub fn chunk_emitted(name: &str, file: &str, size: usize) {
        debug!("📝 Emitted {} → {} ({} bytes)", name, file, size);
    }

    pub fn chunk_unchanged(name: &str) {
        debug!("♻️  Unchanged chunk: {}", name);
    }

    pub fn build_complete(
        modules: usize,
        chunks: usize,
        written: usize,
        build_time: std::time::Duration,
        outdir: &str,
    ) {
        info!("");
        info!("📊 Build Statistics:");
        info!("  • Modules: {}", modules);
        info!("  • Chunks: {} ({} written)", chunks, written);
        info!("  • Build time: {:.2?}", build_time);
        info!("  • Output directory: {}", outdir);
        info!("✅ Build completed successfully!");
    }

    pub fn rebuild_start(changed: usize, invalidated: usize) {
        info!(
            "🔄 Rebuilding... ({} files changed, {} modules invalidated)",
            changed, invalidated
        );
    }

    pub fn state_transition(from: &str, to: &str) {
        debug!("🔀 Coordinator: {} → {}", from, to);
    }

    pub fn info(msg: &str) {
        info!("{}", msg);
    }

    pub fn debug(msg: &str) {
        debug!("{}", msg);
    }

    pub fn error(msg: &str) {
        error!("❌ {}", msg);
    }

    pub fn warn(msg: &str) {
        warn!("⚠️  {}", msg);
    }
}

pub struct Timer {
    start: Instant,
    name: String,
}

impl Timer {
    pub fn start(name: &str) -> Self {
        debug!("⏱️  Starting: {}", name);
        Self {
            start: Instant::now(),
            name: name.to_string(),
        }
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        debug!("⏱️  Completed: {} in {:.2?}", self.name, self.elapsed());
    }
}
