use crate::core::config::{BuildConfig, RuntimeChunkPolicy};
use crate::core::interfaces::BuildService;
use crate::core::services::StitchBuildService;
use crate::infrastructure::processors::transforms::TransformRegistry;
use crate::infrastructure::watcher::{EventFilter, FsWatcher};
use crate::utils::config_loader::{CliOverrides, ConfigLoader};
use crate::utils::watch::IncrementalCoordinator;
use crate::utils::{Logger, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Parser)]
#[command(name = "stitch")]
#[command(about = "Stitch - module graph bundler with chunk splitting and incremental rebuilds")]
pub struct Cli {
    /// Debug-level logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone)]
pub struct ProjectArgs {
    /// Root directory
    #[arg(short, long, default_value = ".")]
    pub root: String,
    /// Config file (default: <root>/stitch.config.json)
    #[arg(short, long)]
    pub config: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build the project once, or keep rebuilding with --watch
    Build {
        #[command(flatten)]
        project: ProjectArgs,
        /// Output directory
        #[arg(short, long)]
        outdir: Option<String>,
        /// Rebuild on file changes
        #[arg(short, long)]
        watch: bool,
    },
    /// Same as `build --watch`
    Watch {
        #[command(flatten)]
        project: ProjectArgs,
        /// Output directory
        #[arg(short, long)]
        outdir: Option<String>,
    },
    /// Print the resolved configuration
    Info {
        #[command(flatten)]
        project: ProjectArgs,
    },
}

pub struct CliHandler;

impl CliHandler {
    pub fn new() -> Self {
        Self
    }

    pub async fn run(&self) -> Result<()> {
        let cli = Cli::parse();
        Logger::init(cli.verbose);

        match cli.command {
            Commands::Build { project, outdir, watch } => {
                let config = self.load_config(&project, outdir, watch.then_some(true))?;
                if config.watch.enabled {
                    self.handle_watch_command(config).await
                } else {
                    self.handle_build_command(config).await
                }
            }
            Commands::Watch { project, outdir } => {
                let config = self.load_config(&project, outdir, Some(true))?;
                self.handle_watch_command(config).await
            }
            Commands::Info { project } => {
                let config = self.load_config(&project, None, None)?;
                self.handle_info_command(&config);
                Ok(())
            }
        }
    }

    fn load_config(
        &self,
        project: &ProjectArgs,
        outdir: Option<String>,
        watch: Option<bool>,
    ) -> Result<BuildConfig> {
        let root = PathBuf::from(&project.root);
        let file_config = match &project.config {
            Some(path) => Some(ConfigLoader::load_path(&root.join(path))?),
            None => ConfigLoader::load_from_file(&root)?,
        };

        ConfigLoader::merge_with_cli(
            file_config,
            root,
            &CliOverrides {
                outdir,
                watch,
                parallelism: None,
            },
        )
    }

    async fn handle_build_command(&self, config: BuildConfig) -> Result<()> {
        let service = StitchBuildService::new(config)?;
        service.build().await?;
        Ok(())
    }

    async fn handle_watch_command(&self, config: BuildConfig) -> Result<()> {
        let filter = EventFilter::new(config.watch.clone(), config.output.path.clone());
        let debounce = Duration::from_millis(config.watch.debounce_ms);
        let root = config.root.clone();

        let service = StitchBuildService::new(config)?;
        let mut coordinator = IncrementalCoordinator::new(service, debounce);
        let (watcher, events) = start_watching(&mut coordinator, &root, filter).await?;
        Logger::info(&format!("👀 Watching {} (Ctrl+C to stop)", watcher.root().display()));

        coordinator
            .run(events, async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await
    }

    fn handle_info_command(&self, config: &BuildConfig) {
        Logger::info(&format!("🧵 Stitch v{}", env!("CARGO_PKG_VERSION")));
        Logger::info("══════════════════════════════════════");
        Logger::info(&format!("📁 Root: {}", config.root.display()));
        Logger::info(&format!("📦 Output: {}", config.output.path.display()));
        Logger::info(&format!(
            "   filename: {}  chunkFilename: {}  html: {}",
            config.output.filename, config.output.chunk_filename, config.output.html
        ));

        Logger::info("🎯 Entries:");
        for entry in &config.entries {
            Logger::info(&format!("  • {} → {}", entry.name, entry.specifiers.join(", ")));
        }

        if !config.resolve.alias.is_empty() {
            Logger::info("🔗 Aliases:");
            for (alias, target) in &config.resolve.alias {
                Logger::info(&format!("  • {} → {}", alias, target));
            }
        }
        Logger::info(&format!("🔍 Extensions: {}", config.resolve.extensions.join(" ")));

        Logger::info(&format!("🔧 Loader rules: {}", config.rules.len()));
        for rule in &config.rules {
            let test = rule.test.as_ref().map(|re| re.as_str()).unwrap_or("*");
            let loaders: Vec<&str> = rule.uses.iter().map(|u| u.loader.as_str()).collect();
            Logger::info(&format!("  • {} ({:?}) → [{}]", test, rule.enforce, loaders.join(", ")));
        }
        Logger::info(&format!(
            "   available transforms: {}",
            TransformRegistry::with_builtins().names().join(", ")
        ));

        let split = &config.split_chunks;
        Logger::info(&format!(
            "✂️  Split chunks: {} (delimiter '{}')",
            if split.enabled { "on" } else { "off" },
            split.delimiter
        ));
        for group in &split.cache_groups {
            Logger::info(&format!(
                "  • {} priority={} minChunks={} minSize={}",
                group.key, group.priority, group.min_chunks, group.min_size
            ));
        }

        let runtime = match &config.runtime_chunk {
            RuntimeChunkPolicy::Disabled => "embedded".to_string(),
            RuntimeChunkPolicy::Single { name } => format!("single '{}'", name),
            RuntimeChunkPolicy::PerEntry { template } => format!("per entry '{}'", template),
        };
        Logger::info(&format!("⚙️  Runtime chunk: {}", runtime));
        Logger::info(&format!(
            "👀 Watch: {} (debounce {}ms)",
            config.watch.enabled, config.watch.debounce_ms
        ));
        Logger::info(&format!("🧵 Parallelism: {}", config.parallelism));
    }
}

impl Default for CliHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// The watcher goes up before the initial build, so saves made while that
/// build runs are queued instead of lost.
async fn start_watching<B: BuildService>(
    coordinator: &mut IncrementalCoordinator<B>,
    root: &Path,
    filter: EventFilter,
) -> Result<(FsWatcher, UnboundedReceiver<Vec<PathBuf>>)> {
    let (watcher, events) = FsWatcher::start(root, filter)?;
    coordinator.start().await?;
    Ok((watcher, events))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::WatchOptions;
    use crate::core::models::*;
    use std::collections::BTreeSet;
    use std::fs;

    /// Saves `src/late.js` in the middle of its one and only build
    struct SavesDuringBuild {
        root: PathBuf,
    }

    #[async_trait::async_trait]
    impl BuildService for SavesDuringBuild {
        async fn build(&self) -> Result<BuildSnapshot> {
            fs::write(self.root.join("src/late.js"), "late();")?;
            Ok(BuildSnapshot::default())
        }

        async fn rebuild(&self, previous: &BuildSnapshot, _: &BTreeSet<ModuleId>) -> Result<BuildSnapshot> {
            Ok(previous.clone())
        }
    }

    #[tokio::test]
    async fn test_save_during_initial_build_is_queued() {
        let dir = tempfile::tempdir().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        fs::create_dir_all(root.join("src")).unwrap();

        let service = SavesDuringBuild { root: root.clone() };
        let mut coordinator = IncrementalCoordinator::new(service, Duration::from_millis(10));
        let filter = EventFilter::new(WatchOptions::default(), root.join("dist"));
        let (_watcher, mut events) = start_watching(&mut coordinator, &root, filter).await.unwrap();

        let late = root.join("src/late.js");
        let seen = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(paths) = events.recv().await {
                if paths.iter().any(|p| p.ends_with("src/late.js")) {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap_or(false);
        assert!(seen, "no event for {}", late.display());
    }
}
