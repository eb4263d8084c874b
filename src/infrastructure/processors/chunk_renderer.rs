use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use rayon::prelude::*;
use serde::Serialize;
use crate::core::config::OutputOptions;
use crate::core::models::{BuildManifest, Chunk, ChunkKind, ChunkPlan, ModuleGraph};
use crate::utils::hash::content_hash;

/// Global object every chunk registers into
const GLOBAL: &str = "(typeof self !== \"undefined\" ? self : globalThis)";

/// Loader shared by every runtime: chunks register their modules and mark
/// themselves loaded; an entry boots once every chunk in its load order is in.
const RUNTIME_LOADER: &str = r#"(function (g) {
  var s = g.__stitch = g.__stitch || { modules: {}, loaded: {}, cache: {}, pending: [] };
  if (s.boot) return;
  s.require = function (id) {
    if (s.cache[id]) return s.cache[id].exports;
    var def = s.modules[id];
    if (!def) throw new Error("stitch: module not loaded: " + id);
    var module = s.cache[id] = { exports: {} };
    def.code.call(module.exports, module, module.exports, function (spec) {
      return s.require(def.deps[spec]);
    });
    return module.exports;
  };
  s.flush = function () {
    s.pending = s.pending.filter(function (entry) {
      var ready = entry.chunks.every(function (c) { return s.loaded[c]; });
      if (ready) entry.modules.forEach(s.require);
      return !ready;
    });
  };
  s.boot = function (entry) {
    s.pending.push(entry);
    s.flush();
  };
})(typeof self !== "undefined" ? self : globalThis);
"#;

/// A chunk turned into bytes, ready for the emitter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedChunk {
    pub name: String,
    pub kind: ChunkKind,
    pub file: String,
    pub hash: String,
    pub code: String,
    pub modules: Vec<String>,
}

/// Per-entry data the runtime needs at boot
#[derive(Debug, Serialize)]
struct EntryBookkeeping {
    modules: Vec<String>,
    chunks: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RuntimeBookkeeping {
    entries: BTreeMap<String, EntryBookkeeping>,
    module_to_chunk: BTreeMap<String, String>,
}

pub struct ChunkRenderer {
    root: PathBuf,
    output: OutputOptions,
}

impl ChunkRenderer {
    pub fn new(root: PathBuf, output: OutputOptions) -> Self {
        Self { root, output }
    }

    /// Render every chunk of the plan, in plan order
    pub fn render_all(&self, graph: &ModuleGraph, plan: &ChunkPlan) -> Vec<RenderedChunk> {
        plan.chunks
            .par_iter()
            .map(|chunk| self.render_chunk(graph, plan, chunk))
            .collect()
    }

    /// Render only the named chunks
    pub fn render_selected(
        &self,
        graph: &ModuleGraph,
        plan: &ChunkPlan,
        names: &BTreeSet<String>,
    ) -> Vec<RenderedChunk> {
        plan.chunks
            .par_iter()
            .filter(|chunk| names.contains(&chunk.name))
            .map(|chunk| self.render_chunk(graph, plan, chunk))
            .collect()
    }

    pub fn render_chunk(&self, graph: &ModuleGraph, plan: &ChunkPlan, chunk: &Chunk) -> RenderedChunk {
        let mut code = format!("/* stitch chunk: {} */\n", chunk.name);

        match &chunk.kind {
            ChunkKind::Runtime { entries } => {
                code.push_str(RUNTIME_LOADER);
                code.push_str(&mark_loaded(&chunk.name));
                code.push_str(&self.boot_calls(graph, plan, entries));
            }
            ChunkKind::Entry { entry } => {
                let embedded = !plan
                    .entrypoints
                    .get(entry)
                    .map(|order| {
                        order
                            .iter()
                            .any(|name| plan.chunk(name).map(|c| c.is_runtime()).unwrap_or(false))
                    })
                    .unwrap_or(false);
                if embedded {
                    code.push_str(RUNTIME_LOADER);
                }
                code.push_str(&self.module_table(graph, chunk));
                if embedded {
                    code.push_str(&self.boot_calls(graph, plan, std::slice::from_ref(entry)));
                }
            }
            ChunkKind::Shared { .. } => {
                code.push_str(&self.module_table(graph, chunk));
            }
        }

        let hash = content_hash(code.as_bytes());
        RenderedChunk {
            file: self.output.file_name_for(&chunk.name, chunk.is_entry(), &hash),
            name: chunk.name.clone(),
            kind: chunk.kind.clone(),
            modules: chunk
                .modules
                .iter()
                .map(|id| id.display_relative(&self.root))
                .collect(),
            hash,
            code,
        }
    }

    /// `__stitch.modules` registrations for every module in the chunk
    fn module_table(&self, graph: &ModuleGraph, chunk: &Chunk) -> String {
        let mut out = String::from("(function (s) {\n");
        for id in &chunk.modules {
            let Some(node) = graph.get(id) else {
                continue;
            };
            let deps: BTreeMap<&str, String> = node
                .imports
                .iter()
                .map(|edge| (edge.specifier.as_str(), edge.target.display_relative(&self.root)))
                .collect();
            let deps = serde_json::to_string(&deps).unwrap_or_else(|_| "{}".to_string());
            let key = serde_json::Value::String(id.display_relative(&self.root)).to_string();

            out.push_str(&format!("s.modules[{}] = {{\n  deps: {},\n  code: function (module, exports, require) {{\n", key, deps));
            out.push_str(&String::from_utf8_lossy(&node.transformed));
            if !node.transformed.ends_with(b"\n") {
                out.push('\n');
            }
            out.push_str("  }\n};\n");
        }
        out.push_str("})(");
        out.push_str(&format!(
            "{0}.__stitch = {0}.__stitch || {{ modules: {{}}, loaded: {{}}, cache: {{}}, pending: [] }});\n",
            GLOBAL
        ));
        out.push_str(&mark_loaded(&chunk.name));
        out
    }

    /// Bookkeeping for `entries` and the calls that boot them. References chunk
    /// names only, so sibling content changes never reach this text.
    fn boot_calls(&self, graph: &ModuleGraph, plan: &ChunkPlan, entries: &[String]) -> String {
        let mut bookkeeping = RuntimeBookkeeping {
            entries: BTreeMap::new(),
            module_to_chunk: BTreeMap::new(),
        };

        for name in entries {
            let Some(entry) = graph.entries().iter().find(|e| &e.name == name) else {
                continue;
            };
            let chunks = plan.entrypoints.get(name).cloned().unwrap_or_default();
            for chunk_name in &chunks {
                if let Some(chunk) = plan.chunk(chunk_name) {
                    for id in &chunk.modules {
                        bookkeeping
                            .module_to_chunk
                            .insert(id.display_relative(&self.root), chunk.name.clone());
                    }
                }
            }
            bookkeeping.entries.insert(
                name.clone(),
                EntryBookkeeping {
                    modules: entry.modules.iter().map(|id| id.display_relative(&self.root)).collect(),
                    chunks,
                },
            );
        }

        let json = serde_json::to_string(&bookkeeping).unwrap_or_else(|_| "{}".to_string());
        let mut out = format!("var __stitchRuntime = {};\n", json);
        for name in bookkeeping.entries.keys() {
            out.push_str(&format!(
                "{}.__stitch.boot(__stitchRuntime.entries[{}]);\n",
                GLOBAL,
                serde_json::Value::String(name.clone())
            ));
        }
        out
    }
}

/// Marks a chunk present and lets waiting entries boot
fn mark_loaded(chunk: &str) -> String {
    let name = serde_json::Value::String(chunk.to_string());
    format!(
        "{0}.__stitch.loaded[{1}] = true;\nif ({0}.__stitch.flush) {0}.__stitch.flush();\n",
        GLOBAL, name
    )
}

/// `index.html` loading every entrypoint's chunks in order, each file once
pub fn render_index_html(manifest: &BuildManifest) -> String {
    let mut seen = BTreeSet::new();
    let mut scripts = String::new();
    for entry in manifest.entrypoints.keys() {
        for file in manifest.entry_files(entry) {
            if seen.insert(file.clone()) {
                scripts.push_str(&format!("    <script src=\"{}\"></script>\n", file));
            }
        }
    }
    format!(
        "<!DOCTYPE html>\n<html>\n  <head>\n    <meta charset=\"utf-8\">\n  </head>\n  <body>\n{}  </body>\n</html>\n",
        scripts
    )
}
