use crate::core::models::*;
use crate::utils::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use async_trait::async_trait;

/// File system operations interface
#[async_trait]
pub trait FileSystemService: Send + Sync {
    async fn read_bytes(&self, path: &Path) -> std::io::Result<Vec<u8>>;
    /// All-or-nothing write: readers see either the old file or the full new one
    async fn write_atomic(&self, path: &Path, content: &[u8]) -> std::io::Result<()>;
    async fn remove_file(&self, path: &Path) -> std::io::Result<()>;
    async fn create_directory(&self, path: &Path) -> std::io::Result<()>;
    fn file_exists(&self, path: &Path) -> bool;
}

/// Metadata travelling with module bytes through the loader pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct SourceMeta {
    pub module_type: ModuleType,
    pub properties: BTreeMap<String, String>,
}

impl SourceMeta {
    pub fn new(module_type: ModuleType) -> Self {
        Self {
            module_type,
            properties: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadedSource {
    pub bytes: Vec<u8>,
    pub meta: SourceMeta,
}

impl LoadedSource {
    pub fn new(bytes: Vec<u8>, module_type: ModuleType) -> Self {
        Self {
            bytes,
            meta: SourceMeta::new(module_type),
        }
    }

    pub fn text(&self) -> anyhow::Result<&str> {
        std::str::from_utf8(&self.bytes)
            .map_err(|e| anyhow::anyhow!("module is not valid UTF-8: {}", e))
    }
}

/// What a transform knows about the module it is rewriting
#[derive(Debug, Clone)]
pub struct TransformContext<'a> {
    pub module: &'a ModuleId,
    pub root: &'a Path,
    pub options: &'a serde_json::Value,
}

/// Content-rewriting step: bytes + metadata in, bytes + metadata out
pub trait Transform: Send + Sync {
    fn id(&self) -> &str;
    fn apply(&self, source: LoadedSource, ctx: &TransformContext<'_>) -> anyhow::Result<LoadedSource>;
}

/// Build service interface
#[async_trait]
pub trait BuildService: Send + Sync {
    /// Full build from scratch. Nothing is written unless every step succeeds.
    async fn build(&self) -> Result<BuildSnapshot>;

    /// Reload `invalidated` modules on top of `previous`, replan only when the
    /// graph shape changed and re-emit only chunks whose content changed.
    async fn rebuild(
        &self,
        previous: &BuildSnapshot,
        invalidated: &BTreeSet<ModuleId>,
    ) -> Result<BuildSnapshot>;
}
