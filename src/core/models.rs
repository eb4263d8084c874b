use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use serde::{Serialize, Deserialize};

/// Canonical identity of a resolved module: absolute path plus query string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId {
    path: PathBuf,
    query: Option<String>,
}

impl ModuleId {
    pub fn new(path: impl Into<PathBuf>, query: Option<String>) -> Self {
        Self {
            path: path.into(),
            query: query.filter(|q| !q.is_empty()),
        }
    }

    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self::new(path, None)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Directory imports of this module are resolved against
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or(&self.path)
    }

    /// File stem, used to derive chunk names
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("module")
            .to_string()
    }

    /// Root-relative, forward-slash form used inside emitted artifacts so output
    /// does not depend on where the project is checked out.
    pub fn display_relative(&self, root: &Path) -> String {
        let rel = self.path.strip_prefix(root).unwrap_or(&self.path);
        let mut out = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        if let Some(query) = &self.query {
            out.push('?');
            out.push_str(query);
        }
        out
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())?;
        if let Some(query) = &self.query {
            write!(f, "?{}", query)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleType {
    JavaScript,
    Css,
    Json,
    Asset,
}

impl ModuleType {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "js" | "jsx" | "mjs" | "cjs" | "ts" | "tsx" => ModuleType::JavaScript,
            "css" => ModuleType::Css,
            "json" => ModuleType::Json,
            _ => ModuleType::Asset,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        Self::from_extension(path.extension().and_then(|s| s.to_str()).unwrap_or(""))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImportKind {
    Static,
    Dynamic,
    Css,
}

/// Outgoing import. The target is an id reference into the owning graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportEdge {
    pub specifier: String,
    pub target: ModuleId,
    pub kind: ImportKind,
}

#[derive(Debug, Clone)]
pub struct ModuleNode {
    pub id: ModuleId,
    pub raw: Vec<u8>,
    pub transformed: Vec<u8>,
    pub module_type: ModuleType,
    pub imports: Vec<ImportEdge>,
    /// blake3 of the raw bytes; drives invalidation
    pub content_hash: String,
}

impl ModuleNode {
    pub fn size(&self) -> usize {
        self.transformed.len()
    }

    pub fn dependencies(&self) -> impl Iterator<Item = &ModuleId> {
        self.imports.iter().map(|edge| &edge.target)
    }

    fn edge_targets(&self) -> BTreeSet<&ModuleId> {
        self.dependencies().collect()
    }
}

/// A named build root. Array entries put several modules into one chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPoint {
    pub name: String,
    pub modules: Vec<ModuleId>,
}

/// Arena of modules keyed by id. Edges are id references, so cycles carry no
/// ownership problem.
#[derive(Debug, Clone, Default)]
pub struct ModuleGraph {
    nodes: BTreeMap<ModuleId, Arc<ModuleNode>>,
    entries: Vec<EntryPoint>,
}

impl ModuleGraph {
    pub fn new(entries: Vec<EntryPoint>) -> Self {
        Self {
            nodes: BTreeMap::new(),
            entries,
        }
    }

    pub fn insert(&mut self, node: Arc<ModuleNode>) {
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn get(&self, id: &ModuleId) -> Option<&Arc<ModuleNode>> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &ModuleId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Arc<ModuleNode>> {
        self.nodes.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &ModuleId> {
        self.nodes.keys()
    }

    pub fn entries(&self) -> &[EntryPoint] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.nodes.values().map(|n| n.imports.len()).sum()
    }

    pub fn is_entry_module(&self, id: &ModuleId) -> bool {
        self.entries.iter().any(|e| e.modules.contains(id))
    }

    /// Every module id whose path is `path`, regardless of query
    pub fn find_by_path(&self, path: &Path) -> Vec<ModuleId> {
        self.nodes
            .keys()
            .filter(|id| id.path() == path)
            .cloned()
            .collect()
    }

    /// Reverse edges: module -> modules importing it
    pub fn dependents(&self) -> HashMap<ModuleId, BTreeSet<ModuleId>> {
        let mut reverse: HashMap<ModuleId, BTreeSet<ModuleId>> = HashMap::new();
        for node in self.nodes.values() {
            for target in node.dependencies() {
                reverse
                    .entry(target.clone())
                    .or_default()
                    .insert(node.id.clone());
            }
        }
        reverse
    }

    /// The given modules plus all of their transitive importers
    pub fn with_ancestors<'a, I>(&self, changed: I) -> BTreeSet<ModuleId>
    where
        I: IntoIterator<Item = &'a ModuleId>,
    {
        let reverse = self.dependents();
        let mut affected = BTreeSet::new();
        let mut to_process: Vec<ModuleId> = changed.into_iter().cloned().collect();

        while let Some(id) = to_process.pop() {
            if !affected.insert(id.clone()) {
                continue;
            }
            if let Some(importers) = reverse.get(&id) {
                for importer in importers {
                    if !affected.contains(importer) {
                        to_process.push(importer.clone());
                    }
                }
            }
        }

        affected
    }

    /// Modules reachable from `roots` by following import edges
    pub fn reachable_from<'a, I>(&self, roots: I) -> BTreeSet<ModuleId>
    where
        I: IntoIterator<Item = &'a ModuleId>,
    {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&ModuleId> = roots.into_iter().collect();

        while let Some(id) = stack.pop() {
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(node) = self.nodes.get(id) {
                stack.extend(node.dependencies().filter(|dep| !seen.contains(*dep)));
            }
        }

        seen
    }

    /// Same node set and the same edge targets per node
    pub fn has_same_shape(&self, other: &ModuleGraph) -> bool {
        if self.entries != other.entries || self.nodes.len() != other.nodes.len() {
            return false;
        }
        self.nodes.iter().all(|(id, node)| {
            other
                .nodes
                .get(id)
                .map(|o| o.edge_targets() == node.edge_targets())
                .unwrap_or(false)
        })
    }

    /// Edge targets that are missing from the arena
    pub fn dangling_edges(&self) -> Vec<(ModuleId, ModuleId)> {
        self.nodes
            .values()
            .flat_map(|node| {
                node.dependencies()
                    .filter(|t| !self.nodes.contains_key(*t))
                    .map(|t| (node.id.clone(), t.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChunkKind {
    Entry { entry: String },
    Shared { group: String },
    Runtime { entries: Vec<String> },
}

/// Output unit. Holds module ids, never the modules themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub name: String,
    pub kind: ChunkKind,
    pub modules: Vec<ModuleId>,
}

impl Chunk {
    pub fn is_entry(&self) -> bool {
        matches!(self.kind, ChunkKind::Entry { .. })
    }

    pub fn is_runtime(&self) -> bool {
        matches!(self.kind, ChunkKind::Runtime { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkPlan {
    pub chunks: Vec<Chunk>,
    pub module_to_chunk: BTreeMap<ModuleId, String>,
    /// entry name -> chunk names in load order (runtime, shared, entry)
    pub entrypoints: BTreeMap<String, Vec<String>>,
}

impl ChunkPlan {
    pub fn chunk(&self, name: &str) -> Option<&Chunk> {
        self.chunks.iter().find(|c| c.name == name)
    }

    pub fn chunk_names(&self) -> BTreeSet<String> {
        self.chunks.iter().map(|c| c.name.clone()).collect()
    }

    /// Names of the chunks holding any of `ids`
    pub fn chunks_containing<'a, I>(&self, ids: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a ModuleId>,
    {
        ids.into_iter()
            .filter_map(|id| self.module_to_chunk.get(id).cloned())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Path relative to the output root
    pub file: String,
    pub hash: String,
    pub kind: ChunkKind,
    pub modules: Vec<String>,
}

/// Chunk name -> emitted artifact. Regenerated each build, one entry per chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildManifest {
    pub chunks: BTreeMap<String, ManifestEntry>,
    pub entrypoints: BTreeMap<String, Vec<String>>,
}

impl BuildManifest {
    pub const FILE_NAME: &'static str = "manifest.json";

    pub fn insert(&mut self, name: String, entry: ManifestEntry) {
        self.chunks.insert(name, entry);
    }

    pub fn get(&self, name: &str) -> Option<&ManifestEntry> {
        self.chunks.get(name)
    }

    /// Chunk name -> content hash
    pub fn hashes(&self) -> BTreeMap<String, String> {
        self.chunks
            .iter()
            .map(|(name, entry)| (name.clone(), entry.hash.clone()))
            .collect()
    }

    /// Files of the chunks an entrypoint needs, in load order
    pub fn entry_files(&self, entry: &str) -> Vec<String> {
        self.entrypoints
            .get(entry)
            .map(|names| {
                names
                    .iter()
                    .filter_map(|n| self.chunks.get(n).map(|c| c.file.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct BuildResult {
    pub manifest: BuildManifest,
    pub modules: usize,
    pub chunks: usize,
    /// Chunk names actually written this pass
    pub written: Vec<String>,
    pub build_time: std::time::Duration,
}

/// Last completed build: what the coordinator keeps as last-known-good
#[derive(Debug, Clone, Default)]
pub struct BuildSnapshot {
    pub graph: ModuleGraph,
    pub plan: ChunkPlan,
    pub manifest: BuildManifest,
    pub result: BuildResult,
}
