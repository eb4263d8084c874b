use std::collections::{BTreeSet, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use crate::core::config::EntryConfig;
use crate::core::interfaces::FileSystemService;
use crate::core::models::{EntryPoint, ImportEdge, ModuleGraph, ModuleId, ModuleNode};
use crate::infrastructure::processors::imports::extract_imports;
use crate::infrastructure::processors::loader_pipeline::LoaderPipeline;
use crate::infrastructure::resolver::ModuleResolver;
use crate::utils::hash::content_hash;
use crate::utils::{GraphError, Logger};

/// Everything a loader task needs, cheap to clone into the task
#[derive(Clone)]
struct LoadContext {
    resolver: Arc<ModuleResolver>,
    pipeline: Arc<LoaderPipeline>,
    fs: Arc<dyn FileSystemService>,
    root: PathBuf,
}

/// Discovers the module graph from the entries.
///
/// The traversal loop is the only writer: it claims each module id exactly once
/// and hands the load (read, transform, extract, resolve) to a bounded set of
/// tasks. Cycles are fine because a claimed id is never scheduled again.
pub struct GraphBuilder {
    ctx: LoadContext,
    parallelism: usize,
}

impl GraphBuilder {
    pub fn new(
        resolver: Arc<ModuleResolver>,
        pipeline: Arc<LoaderPipeline>,
        fs: Arc<dyn FileSystemService>,
        root: PathBuf,
        parallelism: usize,
    ) -> Self {
        Self {
            ctx: LoadContext {
                resolver,
                pipeline,
                fs,
                root,
            },
            parallelism: parallelism.max(1),
        }
    }

    pub fn resolver(&self) -> &ModuleResolver {
        &self.ctx.resolver
    }

    /// Entry specifiers are resolved from the project root
    pub fn resolve_entries(&self, entries: &[EntryConfig]) -> Result<Vec<EntryPoint>, GraphError> {
        entries
            .iter()
            .map(|entry| {
                let modules = entry
                    .specifiers
                    .iter()
                    .map(|specifier| {
                        self.ctx
                            .resolver
                            .resolve(specifier, &self.ctx.root)
                            .map_err(|source| GraphError::UnresolvableEntry {
                                entry: entry.name.clone(),
                                source,
                            })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(EntryPoint {
                    name: entry.name.clone(),
                    modules,
                })
            })
            .collect()
    }

    pub async fn build(&self, entries: &[EntryConfig]) -> Result<ModuleGraph, GraphError> {
        let entries = self.resolve_entries(entries)?;
        self.traverse(entries, None).await
    }

    /// Reuse every node of `previous` not in `invalidated`; reload the rest as
    /// the traversal reaches them. Nodes no longer reachable are dropped.
    pub async fn rebuild(
        &self,
        previous: &ModuleGraph,
        invalidated: &BTreeSet<ModuleId>,
    ) -> Result<ModuleGraph, GraphError> {
        // Files may have appeared or disappeared since the last pass
        self.ctx.resolver.clear_cache();
        self.traverse(previous.entries().to_vec(), Some((previous, invalidated)))
            .await
    }

    async fn traverse(
        &self,
        entries: Vec<EntryPoint>,
        reuse: Option<(&ModuleGraph, &BTreeSet<ModuleId>)>,
    ) -> Result<ModuleGraph, GraphError> {
        let mut queue: VecDeque<ModuleId> = entries
            .iter()
            .flat_map(|e| e.modules.iter().cloned())
            .collect();
        let mut graph = ModuleGraph::new(entries);
        let mut claimed: HashSet<ModuleId> = HashSet::new();
        let mut tasks: JoinSet<Result<ModuleNode, GraphError>> = JoinSet::new();
        let mut reused = 0usize;

        loop {
            while tasks.len() < self.parallelism {
                let Some(id) = queue.pop_front() else {
                    break;
                };
                if !claimed.insert(id.clone()) {
                    continue;
                }

                let previous = reuse.and_then(|(prev, invalidated)| {
                    prev.get(&id).filter(|_| !invalidated.contains(&id)).cloned()
                });
                match previous {
                    Some(node) => {
                        queue.extend(node.dependencies().filter(|d| !claimed.contains(*d)).cloned());
                        graph.insert(node);
                        reused += 1;
                    }
                    None => {
                        let ctx = self.ctx.clone();
                        tasks.spawn(async move { load_module(ctx, id).await });
                    }
                }
            }

            match tasks.join_next().await {
                None => break,
                Some(Ok(Ok(node))) => {
                    queue.extend(node.dependencies().filter(|d| !claimed.contains(*d)).cloned());
                    graph.insert(Arc::new(node));
                }
                Some(Ok(Err(e))) => {
                    tasks.abort_all();
                    return Err(e);
                }
                Some(Err(e)) => {
                    tasks.abort_all();
                    return Err(GraphError::Join(e.to_string()));
                }
            }
        }

        if reuse.is_some() {
            Logger::debug(&format!(
                "Reused {} of {} modules",
                reused,
                graph.len()
            ));
        }
        Ok(graph)
    }
}

/// Read, transform, extract imports and resolve them for one module
async fn load_module(ctx: LoadContext, id: ModuleId) -> Result<ModuleNode, GraphError> {
    Logger::loading_module(&id.to_string());

    let raw = ctx
        .fs
        .read_bytes(id.path())
        .await
        .map_err(|source| GraphError::Load {
            path: id.path().to_path_buf(),
            source,
        })?;
    let hash = content_hash(&raw);

    let loaded = ctx.pipeline.load(&id, raw.clone(), &ctx.root)?;
    let text = String::from_utf8_lossy(&loaded.bytes);

    let imports = extract_imports(&text, loaded.meta.module_type)
        .into_iter()
        .map(|request| {
            ctx.resolver
                .resolve(&request.specifier, id.dir())
                .map(|target| ImportEdge {
                    specifier: request.specifier,
                    target,
                    kind: request.kind,
                })
                .map_err(|source| GraphError::Resolution {
                    importer: id.path().to_path_buf(),
                    source,
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ModuleNode {
        module_type: loaded.meta.module_type,
        transformed: loaded.bytes,
        raw,
        imports,
        content_hash: hash,
        id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{LoaderRule, LoaderUse, ResolveOptions};
    use crate::infrastructure::file_system::TokioFileSystemService;
    use crate::infrastructure::processors::transforms::TransformRegistry;
    use crate::utils::ResolutionError;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn project(files: &[(&str, &str)]) -> (TempDir, PathBuf) {
        let temp = tempfile::tempdir().unwrap();
        let root = fs::canonicalize(temp.path()).unwrap();
        for (file, content) in files {
            write(&root, file, content);
        }
        (temp, root)
    }

    fn write(root: &Path, file: &str, content: &str) {
        let path = root.join(file);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn builder(root: &Path, rules: Vec<LoaderRule>) -> GraphBuilder {
        GraphBuilder::new(
            Arc::new(ModuleResolver::new(ResolveOptions::default(), root.to_path_buf())),
            Arc::new(LoaderPipeline::new(rules, TransformRegistry::with_builtins()).unwrap()),
            Arc::new(TokioFileSystemService),
            root.to_path_buf(),
            4,
        )
    }

    fn entries(pairs: &[(&str, &str)]) -> Vec<EntryConfig> {
        pairs
            .iter()
            .map(|(name, spec)| EntryConfig::new(*name, vec![spec.to_string()]))
            .collect()
    }

    fn id(root: &Path, file: &str) -> ModuleId {
        ModuleId::from_path(root.join(file))
    }

    #[tokio::test]
    async fn test_builds_graph_from_entries() {
        let (_tmp, root) = project(&[
            ("src/index.js", "import { a } from './a';\nimport './style.css';"),
            ("src/a.js", "export const a = require('./b');"),
            ("src/b.js", "module.exports = 1;"),
            ("src/style.css", "body { margin: 0; }"),
        ]);

        let graph = builder(&root, Vec::new())
            .build(&entries(&[("main", "./src/index.js")]))
            .await
            .unwrap();

        assert_eq!(graph.len(), 4);
        assert_eq!(graph.edge_count(), 3);
        assert!(graph.dangling_edges().is_empty());
        let index = graph.get(&id(&root, "src/index.js")).unwrap();
        assert_eq!(index.imports[0].target, id(&root, "src/a.js"));
        assert!(!index.content_hash.is_empty());
    }

    #[tokio::test]
    async fn test_cycles_terminate() {
        let (_tmp, root) = project(&[
            ("a.js", "import './b';"),
            ("b.js", "import './a';"),
        ]);

        let graph = builder(&root, Vec::new())
            .build(&entries(&[("main", "./a.js")]))
            .await
            .unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.edge_count(), 2);
    }

    #[tokio::test]
    async fn test_missing_import_names_importer() {
        let (_tmp, root) = project(&[("a.js", "import './missing';")]);

        let err = builder(&root, Vec::new())
            .build(&entries(&[("main", "./a.js")]))
            .await
            .unwrap_err();
        match err {
            GraphError::Resolution { importer, source } => {
                assert_eq!(importer, root.join("a.js"));
                assert!(matches!(source, ResolutionError::NotFound { .. }));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_unresolvable_entry() {
        let (_tmp, root) = project(&[]);
        let err = builder(&root, Vec::new())
            .build(&entries(&[("main", "./nope.js")]))
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::UnresolvableEntry { entry, .. } if entry == "main"));
    }

    #[tokio::test]
    async fn test_transform_failure_surfaces() {
        let (_tmp, root) = project(&[
            ("a.js", "import data from './data.json';"),
            ("data.json", "{ not json"),
        ]);
        let rules = vec![LoaderRule::new(r"\.json$", vec![LoaderUse::new("json")]).unwrap()];

        let err = builder(&root, rules)
            .build(&entries(&[("main", "./a.js")]))
            .await
            .unwrap_err();
        match err {
            GraphError::Transform(e) => {
                assert_eq!(e.transform, "json");
                assert_eq!(e.module, root.join("data.json"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_css_imports_followed_through_css_transform() {
        let (_tmp, root) = project(&[
            ("a.js", "import './app.css';"),
            ("app.css", "@import 'theme.css';\nbody {}"),
            ("theme.css", ":root {}"),
        ]);
        let rules = vec![LoaderRule::new(r"\.css$", vec![LoaderUse::new("css")]).unwrap()];

        let graph = builder(&root, rules)
            .build(&entries(&[("main", "./a.js")]))
            .await
            .unwrap();
        assert!(graph.contains(&id(&root, "theme.css")));
    }

    #[tokio::test]
    async fn test_rebuild_reuses_untouched_nodes() {
        let (_tmp, root) = project(&[
            ("a.js", "import './b';\nimport './c';"),
            ("b.js", "b();"),
            ("c.js", "c();"),
        ]);
        let builder = builder(&root, Vec::new());
        let first = builder.build(&entries(&[("main", "./a.js")])).await.unwrap();

        write(&root, "b.js", "b(2);");
        let invalidated: BTreeSet<ModuleId> = [id(&root, "b.js")].into_iter().collect();
        let second = builder.rebuild(&first, &invalidated).await.unwrap();

        let c = id(&root, "c.js");
        assert!(Arc::ptr_eq(first.get(&c).unwrap(), second.get(&c).unwrap()));
        assert_eq!(second.get(&id(&root, "b.js")).unwrap().transformed, b"b(2);");
        assert!(first.has_same_shape(&second));
    }

    #[tokio::test]
    async fn test_rebuild_drops_deleted_unreferenced_module() {
        let (_tmp, root) = project(&[
            ("a.js", "import './b';"),
            ("b.js", "b();"),
        ]);
        let builder = builder(&root, Vec::new());
        let first = builder.build(&entries(&[("main", "./a.js")])).await.unwrap();

        write(&root, "a.js", "a();");
        fs::remove_file(root.join("b.js")).unwrap();
        let invalidated: BTreeSet<ModuleId> = [id(&root, "a.js"), id(&root, "b.js")].into_iter().collect();
        let second = builder.rebuild(&first, &invalidated).await.unwrap();

        assert_eq!(second.len(), 1);
        assert!(!first.has_same_shape(&second));
    }
}
