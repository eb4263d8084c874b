use crate::core::config::BuildConfig;
use crate::core::graph_builder::GraphBuilder;
use crate::core::interfaces::*;
use crate::core::models::*;
use crate::infrastructure::emitter::EmitController;
use crate::infrastructure::file_system::TokioFileSystemService;
use crate::infrastructure::processors::chunk_planner::ChunkPlanner;
use crate::infrastructure::processors::chunk_renderer::{ChunkRenderer, RenderedChunk};
use crate::infrastructure::processors::loader_pipeline::LoaderPipeline;
use crate::infrastructure::processors::transforms::TransformRegistry;
use crate::infrastructure::resolver::ModuleResolver;
use crate::utils::{GraphError, Logger, Result, StitchError, Timer};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

/// Main build service implementation: resolve, load, plan, render, emit
pub struct StitchBuildService {
    config: BuildConfig,
    fs_service: Arc<dyn FileSystemService>,
    graph_builder: GraphBuilder,
    planner: ChunkPlanner,
    renderer: Arc<ChunkRenderer>,
    emitter: EmitController,
}

impl StitchBuildService {
    /// Built-in transforms, real file system
    pub fn new(config: BuildConfig) -> Result<Self> {
        Self::with_services(config, TransformRegistry::with_builtins(), Arc::new(TokioFileSystemService))
    }

    pub fn with_services(
        config: BuildConfig,
        registry: TransformRegistry,
        fs_service: Arc<dyn FileSystemService>,
    ) -> Result<Self> {
        config.validate()?;

        let resolver = Arc::new(ModuleResolver::new(config.resolve.clone(), config.root.clone()));
        let pipeline = Arc::new(LoaderPipeline::new(config.rules.clone(), registry)?);
        let graph_builder = GraphBuilder::new(
            resolver,
            pipeline,
            fs_service.clone(),
            config.root.clone(),
            config.parallelism,
        );
        let planner = ChunkPlanner::new(config.split_chunks.clone(), config.runtime_chunk.clone());
        let renderer = Arc::new(ChunkRenderer::new(config.root.clone(), config.output.clone()));
        let emitter = EmitController::new(
            fs_service.clone(),
            config.output.path.clone(),
            config.emit.clone(),
            config.output.html,
        );

        Ok(Self {
            config,
            fs_service,
            graph_builder,
            planner,
            renderer,
            emitter,
        })
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Manifest left by an earlier run, so unchanged chunks are not rewritten
    /// and stale files get cleaned up across process restarts.
    async fn manifest_on_disk(&self) -> BuildManifest {
        let path = self.config.output.path.join(BuildManifest::FILE_NAME);
        match self.fs_service.read_bytes(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                Logger::warn(&format!("Ignoring unreadable {}: {}", path.display(), e));
                BuildManifest::default()
            }),
            Err(_) => BuildManifest::default(),
        }
    }

    /// Rendering is CPU-bound and parallelized with rayon, off the async workers
    async fn render(
        &self,
        graph: &ModuleGraph,
        plan: &ChunkPlan,
        only: Option<BTreeSet<String>>,
    ) -> Result<Vec<RenderedChunk>> {
        let _timer = Timer::start("Rendering chunks");
        let renderer = self.renderer.clone();
        let graph = graph.clone();
        let plan = plan.clone();

        tokio::task::spawn_blocking(move || match only {
            Some(names) => renderer.render_selected(&graph, &plan, &names),
            None => renderer.render_all(&graph, &plan),
        })
        .await
        .map_err(|e| GraphError::Join(e.to_string()).into())
    }

    async fn finish(
        &self,
        graph: ModuleGraph,
        plan: ChunkPlan,
        rendered: Vec<RenderedChunk>,
        previous: &BuildManifest,
        started: Instant,
    ) -> Result<BuildSnapshot> {
        check_file_collisions(&plan, &rendered, previous)?;

        let outcome = {
            let _timer = Timer::start("Emitting");
            self.emitter.emit(&plan, &rendered, previous).await?
        };

        let result = BuildResult {
            manifest: outcome.manifest.clone(),
            modules: graph.len(),
            chunks: plan.chunks.len(),
            written: outcome.written,
            build_time: started.elapsed(),
        };
        Logger::build_complete(
            result.modules,
            result.chunks,
            result.written.len(),
            result.build_time,
            &self.config.output.path.display().to_string(),
        );

        Ok(BuildSnapshot {
            graph,
            plan,
            manifest: outcome.manifest,
            result,
        })
    }
}

#[async_trait]
impl BuildService for StitchBuildService {
    async fn build(&self) -> Result<BuildSnapshot> {
        let started = Instant::now();
        Logger::build_start(
            &self.config.root.display().to_string(),
            &self.config.output.path.display().to_string(),
            self.config.entries.len(),
        );

        let graph = {
            let _timer = Timer::start("Module graph");
            self.graph_builder.build(&self.config.entries).await?
        };
        Logger::graph_built(graph.len(), graph.edge_count());

        let plan = self.planner.plan(&graph);
        log_plan(&plan);

        // Everything is rendered before the first byte is written
        let rendered = self.render(&graph, &plan, None).await?;
        let previous = self.manifest_on_disk().await;
        self.finish(graph, plan, rendered, &previous, started).await
    }

    async fn rebuild(
        &self,
        previous: &BuildSnapshot,
        invalidated: &BTreeSet<ModuleId>,
    ) -> Result<BuildSnapshot> {
        let started = Instant::now();

        let graph = {
            let _timer = Timer::start("Module graph (incremental)");
            self.graph_builder.rebuild(&previous.graph, invalidated).await?
        };

        let (plan, only) = if graph.has_same_shape(&previous.graph) {
            // Same modules and edges: the plan holds, only touched chunks re-render
            let affected = previous
                .plan
                .chunks_containing(invalidated.iter().filter(|id| graph.contains(id)));
            Logger::debug(&format!("Plan unchanged, re-rendering {} chunks", affected.len()));
            (previous.plan.clone(), Some(affected))
        } else {
            let plan = self.planner.plan(&graph);
            log_plan(&plan);
            (plan, None)
        };

        let rendered = self.render(&graph, &plan, only).await?;
        self.finish(graph, plan, rendered, &previous.manifest, started).await
    }
}

/// Two chunks rendering to one file would overwrite each other, e.g. a fixed
/// `filename` shared by several entries.
fn check_file_collisions(
    plan: &ChunkPlan,
    rendered: &[RenderedChunk],
    previous: &BuildManifest,
) -> Result<()> {
    let mut owners: BTreeMap<&str, &str> = BTreeMap::new();
    for chunk in &plan.chunks {
        let file = rendered
            .iter()
            .find(|r| r.name == chunk.name)
            .map(|r| r.file.as_str())
            .or_else(|| previous.get(&chunk.name).map(|e| e.file.as_str()));
        let Some(file) = file else { continue };
        if let Some(other) = owners.insert(file, chunk.name.as_str()) {
            return Err(StitchError::config(format!(
                "chunks '{}' and '{}' both emit '{}'; add [name] to the output filename",
                other, chunk.name, file
            )));
        }
    }
    Ok(())
}

fn log_plan(plan: &ChunkPlan) {
    let shared = plan
        .chunks
        .iter()
        .filter(|c| matches!(c.kind, ChunkKind::Shared { .. }))
        .count();
    let runtime = plan.chunks.iter().filter(|c| c.is_runtime()).count();
    Logger::chunks_planned(plan.chunks.len(), shared, runtime);
}
