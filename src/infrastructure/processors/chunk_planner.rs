use std::collections::{BTreeMap, BTreeSet};
use crate::core::config::{CacheGroup, RuntimeChunkPolicy, SplitChunksOptions};
use crate::core::models::{Chunk, ChunkKind, ChunkPlan, ModuleGraph, ModuleId};

/// Entries are referred to by declaration index while planning
type EntrySet = BTreeSet<usize>;

/// Modules a cache group wants to pull out together
struct Candidate {
    group: usize,
    reach: EntrySet,
    modules: BTreeSet<ModuleId>,
}

/// Partitions a module graph into chunks.
///
/// Every module lands in exactly one chunk: entry modules stay in their entry
/// chunk, cache groups extract what they match, and anything still reached by
/// several entries goes to a `common` fallback chunk.
pub struct ChunkPlanner {
    split: SplitChunksOptions,
    runtime: RuntimeChunkPolicy,
}

impl ChunkPlanner {
    pub fn new(split: SplitChunksOptions, runtime: RuntimeChunkPolicy) -> Self {
        Self { split, runtime }
    }

    pub fn plan(&self, graph: &ModuleGraph) -> ChunkPlan {
        let entries = graph.entries();
        let reach_sets: Vec<BTreeSet<ModuleId>> = entries
            .iter()
            .map(|entry| {
                graph
                    .reachable_from(entry.modules.iter())
                    .into_iter()
                    .filter(|id| graph.contains(id))
                    .collect()
            })
            .collect();

        // module -> entries reaching it
        let mut reaching: BTreeMap<ModuleId, EntrySet> = BTreeMap::new();
        for (index, reach) in reach_sets.iter().enumerate() {
            for id in reach {
                reaching.entry(id.clone()).or_default().insert(index);
            }
        }

        // Entry modules belong to the first entry declaring them
        let mut owner: BTreeMap<ModuleId, usize> = BTreeMap::new();
        for (index, entry) in entries.iter().enumerate() {
            for id in &entry.modules {
                if graph.contains(id) {
                    owner.entry(id.clone()).or_insert(index);
                }
            }
        }

        let mut used_names: BTreeSet<String> = entries.iter().map(|e| e.name.clone()).collect();
        let mut assigned: BTreeMap<ModuleId, String> = BTreeMap::new();
        let mut shared: Vec<Chunk> = Vec::new();

        if self.split.enabled {
            for candidate in self.collect_candidates(graph, &reaching) {
                let group = &self.split.cache_groups[candidate.group];

                if group.reuse_existing_chunk {
                    let reused = reach_sets.iter().enumerate().find(|(index, reach)| {
                        candidate.reach.contains(index)
                            && current_content(reach, &assigned) == candidate.modules
                    });
                    if let Some((index, _)) = reused {
                        for id in &candidate.modules {
                            assigned.insert(id.clone(), entries[index].name.clone());
                        }
                        continue;
                    }
                }

                let modules: BTreeSet<ModuleId> = candidate
                    .modules
                    .into_iter()
                    .filter(|id| !owner.contains_key(id) && !assigned.contains_key(id))
                    .collect();
                let size: usize = modules
                    .iter()
                    .filter_map(|id| graph.get(id))
                    .map(|node| node.size())
                    .sum();
                if modules.is_empty() || size < group.min_size {
                    continue;
                }

                let name = unique_name(self.chunk_name(group, &modules), &self.split.delimiter, &mut used_names);
                for id in &modules {
                    assigned.insert(id.clone(), name.clone());
                }
                shared.push(Chunk {
                    name,
                    kind: ChunkKind::Shared { group: group.key.clone() },
                    modules: modules.into_iter().collect(),
                });
            }
        }

        // Leftovers: owned entry modules, single-entry modules, and the
        // `common` fallback for anything several entries still share.
        let mut entry_modules: Vec<BTreeSet<ModuleId>> = vec![BTreeSet::new(); entries.len()];
        let mut common: BTreeMap<EntrySet, BTreeSet<ModuleId>> = BTreeMap::new();
        for (id, reach) in &reaching {
            if assigned.contains_key(id) {
                continue;
            }
            if let Some(&index) = owner.get(id) {
                entry_modules[index].insert(id.clone());
            } else if reach.len() == 1 {
                if let Some(&index) = reach.iter().next() {
                    entry_modules[index].insert(id.clone());
                }
            } else {
                common.entry(reach.clone()).or_default().insert(id.clone());
            }
        }
        for (reach, modules) in common {
            let base = std::iter::once("common".to_string())
                .chain(reach.iter().map(|&i| entries[i].name.clone()))
                .collect::<Vec<_>>()
                .join(&self.split.delimiter);
            let name = unique_name(base, &self.split.delimiter, &mut used_names);
            for id in &modules {
                assigned.insert(id.clone(), name.clone());
            }
            shared.push(Chunk {
                name,
                kind: ChunkKind::Shared { group: "common".to_string() },
                modules: modules.into_iter().collect(),
            });
        }

        let mut plan = ChunkPlan::default();
        for (index, entry) in entries.iter().enumerate() {
            // Reused modules were recorded under this entry's name
            let reused = assigned
                .iter()
                .filter(|(_, chunk)| **chunk == entry.name)
                .map(|(id, _)| id.clone());
            let mut modules = std::mem::take(&mut entry_modules[index]);
            modules.extend(reused);
            for id in &modules {
                plan.module_to_chunk.insert(id.clone(), entry.name.clone());
            }
            plan.chunks.push(Chunk {
                name: entry.name.clone(),
                kind: ChunkKind::Entry { entry: entry.name.clone() },
                modules: modules.into_iter().collect(),
            });
        }
        for chunk in shared {
            for id in &chunk.modules {
                plan.module_to_chunk.insert(id.clone(), chunk.name.clone());
            }
            plan.chunks.push(chunk);
        }

        // Runtime chunks own no modules, only bookkeeping
        let mut runtime_of: BTreeMap<usize, String> = BTreeMap::new();
        let mut runtime_chunks: Vec<Chunk> = Vec::new();
        let mut by_base: BTreeMap<String, String> = BTreeMap::new();
        for (index, entry) in entries.iter().enumerate() {
            let Some(base) = self.runtime.chunk_name(&entry.name) else {
                continue;
            };
            let name = by_base
                .entry(base.clone())
                .or_insert_with(|| unique_name(base, &self.split.delimiter, &mut used_names))
                .clone();
            match runtime_chunks.iter_mut().find(|c| c.name == name) {
                Some(Chunk { kind: ChunkKind::Runtime { entries: owners }, .. }) => owners.push(entry.name.clone()),
                _ => runtime_chunks.push(Chunk {
                    name: name.clone(),
                    kind: ChunkKind::Runtime { entries: vec![entry.name.clone()] },
                    modules: Vec::new(),
                }),
            }
            runtime_of.insert(index, name);
        }
        plan.chunks.extend(runtime_chunks);

        // Load order: runtime, then every other chunk the entry needs, then itself
        for (index, entry) in entries.iter().enumerate() {
            let needed: BTreeSet<String> = reach_sets[index]
                .iter()
                .filter_map(|id| plan.module_to_chunk.get(id).cloned())
                .filter(|name| *name != entry.name)
                .collect();
            let mut order: Vec<String> = runtime_of.get(&index).cloned().into_iter().collect();
            order.extend(needed);
            order.push(entry.name.clone());
            plan.entrypoints.insert(entry.name.clone(), order);
        }

        plan
    }

    /// Cache groups in priority order (desc), then declaration order
    fn ordered_groups(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.split.cache_groups.len()).collect();
        order.sort_by_key(|&i| std::cmp::Reverse(self.split.cache_groups[i].priority));
        order
    }

    /// First eligible group per module, bucketed by (group, reaching entries).
    /// Fixed-name groups collect everything into one bucket.
    fn collect_candidates(
        &self,
        graph: &ModuleGraph,
        reaching: &BTreeMap<ModuleId, EntrySet>,
    ) -> Vec<Candidate> {
        let order = self.ordered_groups();
        let mut buckets: BTreeMap<(usize, Option<EntrySet>), (EntrySet, BTreeSet<ModuleId>)> = BTreeMap::new();

        for (id, reach) in reaching {
            let size = graph.get(id).map(|n| n.size()).unwrap_or(0);
            let oversized = self.split.size_threshold.map_or(false, |t| size > t);
            let chosen = order.iter().position(|&gi| {
                let group = &self.split.cache_groups[gi];
                group.matches_path(id.path()) && (reach.len() >= group.min_chunks || oversized)
            });
            let Some(rank) = chosen else {
                continue;
            };
            let group = &self.split.cache_groups[order[rank]];
            let key = if group.name.is_some() { None } else { Some(reach.clone()) };
            let bucket = buckets.entry((rank, key)).or_default();
            bucket.0.extend(reach.iter().copied());
            bucket.1.insert(id.clone());
        }

        buckets
            .into_iter()
            .map(|((rank, _), (reach, modules))| Candidate {
                group: order[rank],
                reach,
                modules,
            })
            .collect()
    }

    fn chunk_name(&self, group: &CacheGroup, modules: &BTreeSet<ModuleId>) -> String {
        if let Some(name) = &group.name {
            return name.clone();
        }
        let stem = modules.iter().next().map(|id| id.stem()).unwrap_or_default();
        format!("{}{}{}", group.key, self.split.delimiter, stem)
    }
}

/// What an entry chunk would still hold after earlier extractions
fn current_content(reach: &BTreeSet<ModuleId>, assigned: &BTreeMap<ModuleId, String>) -> BTreeSet<ModuleId> {
    reach
        .iter()
        .filter(|id| !assigned.contains_key(*id))
        .cloned()
        .collect()
}

fn unique_name(base: String, delimiter: &str, used: &mut BTreeSet<String>) -> String {
    let mut name = base.clone();
    let mut n = 1;
    while used.contains(&name) {
        name = format!("{}{}{}", base, delimiter, n);
        n += 1;
    }
    used.insert(name.clone());
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{EntryPoint, ImportEdge, ImportKind, ModuleNode, ModuleType};
    use std::sync::Arc;

    fn node(path: &str, deps: &[&str], size: usize) -> Arc<ModuleNode> {
        Arc::new(ModuleNode {
            id: ModuleId::from_path(path),
            raw: Vec::new(),
            transformed: vec![b'x'; size],
            module_type: ModuleType::JavaScript,
            imports: deps
                .iter()
                .map(|d| ImportEdge {
                    specifier: d.to_string(),
                    target: ModuleId::from_path(*d),
                    kind: ImportKind::Static,
                })
                .collect(),
            content_hash: String::new(),
        })
    }

    fn entry(name: &str, path: &str) -> EntryPoint {
        EntryPoint {
            name: name.to_string(),
            modules: vec![ModuleId::from_path(path)],
        }
    }

    fn chunk_of<'a>(plan: &'a ChunkPlan, path: &str) -> &'a str {
        plan.module_to_chunk
            .get(&ModuleId::from_path(path))
            .map(|s| s.as_str())
            .unwrap()
    }

    /// Two entries sharing one utility module
    fn two_entries() -> ModuleGraph {
        let mut graph = ModuleGraph::new(vec![entry("a", "/p/src/a.js"), entry("b", "/p/src/b.js")]);
        graph.insert(node("/p/src/a.js", &["/p/src/util.js"], 10));
        graph.insert(node("/p/src/b.js", &["/p/src/util.js"], 10));
        graph.insert(node("/p/src/util.js", &[], 10));
        graph
    }

    fn assert_exactly_once(graph: &ModuleGraph, plan: &ChunkPlan) {
        for id in graph.ids() {
            let holders = plan.chunks.iter().filter(|c| c.modules.contains(id)).count();
            assert_eq!(holders, 1, "{} is in {} chunks", id, holders);
        }
    }

    #[test]
    fn test_shared_module_extracted() {
        let graph = two_entries();
        let planner = ChunkPlanner::new(SplitChunksOptions::default(), RuntimeChunkPolicy::Disabled);
        let plan = planner.plan(&graph);

        let expected: BTreeSet<String> = ["a", "b", "shared~util"].iter().map(|s| s.to_string()).collect();
        assert_eq!(plan.chunk_names(), expected);
        assert_eq!(chunk_of(&plan, "/p/src/util.js"), "shared~util");
        assert_eq!(plan.entrypoints["a"], vec!["shared~util", "a"]);
        assert_exactly_once(&graph, &plan);
    }

    #[test]
    fn test_disabled_splitting_falls_back_to_common() {
        let graph = two_entries();
        let split = SplitChunksOptions {
            enabled: false,
            ..Default::default()
        };
        let plan = ChunkPlanner::new(split, RuntimeChunkPolicy::Disabled).plan(&graph);

        assert_eq!(chunk_of(&plan, "/p/src/util.js"), "common~a~b");
        assert_exactly_once(&graph, &plan);
    }

    #[test]
    fn test_vendor_group_outranks_shared() {
        let mut graph = ModuleGraph::new(vec![entry("a", "/p/src/a.js"), entry("b", "/p/src/b.js")]);
        graph.insert(node("/p/src/a.js", &["/p/node_modules/react/index.js"], 10));
        graph.insert(node("/p/src/b.js", &["/p/node_modules/react/index.js"], 10));
        graph.insert(node("/p/node_modules/react/index.js", &[], 10));

        let plan = ChunkPlanner::new(SplitChunksOptions::default(), RuntimeChunkPolicy::Disabled).plan(&graph);
        assert_eq!(chunk_of(&plan, "/p/node_modules/react/index.js"), "vendors~index");
    }

    #[test]
    fn test_min_size_drops_candidate() {
        let graph = two_entries();
        let mut split = SplitChunksOptions::default();
        split.cache_groups[1].min_size = 1000;
        let plan = ChunkPlanner::new(split, RuntimeChunkPolicy::Disabled).plan(&graph);

        // Too small for `shared`, still shared, so it ends up in the fallback
        assert_eq!(chunk_of(&plan, "/p/src/util.js"), "common~a~b");
        assert_exactly_once(&graph, &plan);
    }

    #[test]
    fn test_entry_chunk_reused_when_contents_match() {
        let mut graph = ModuleGraph::new(vec![entry("a", "/p/src/a.js"), entry("b", "/p/src/b.js")]);
        graph.insert(node("/p/src/a.js", &["/p/src/b.js"], 10));
        graph.insert(node("/p/src/b.js", &[], 10));

        let plan = ChunkPlanner::new(SplitChunksOptions::default(), RuntimeChunkPolicy::Disabled).plan(&graph);
        assert_eq!(plan.chunks.len(), 2);
        assert_eq!(chunk_of(&plan, "/p/src/b.js"), "b");
        assert_eq!(plan.entrypoints["a"], vec!["b", "a"]);
        assert_exactly_once(&graph, &plan);
    }

    #[test]
    fn test_per_entry_runtime_chunks() {
        let graph = two_entries();
        let plan = ChunkPlanner::new(SplitChunksOptions::default(), RuntimeChunkPolicy::per_entry()).plan(&graph);

        let runtime = plan.chunk("runtime~a").unwrap();
        assert!(runtime.is_runtime());
        assert!(runtime.modules.is_empty());
        assert_eq!(plan.entrypoints["b"], vec!["runtime~b", "shared~util", "b"]);
    }

    #[test]
    fn test_single_runtime_shared_by_entries() {
        let graph = two_entries();
        let plan = ChunkPlanner::new(SplitChunksOptions::default(), RuntimeChunkPolicy::single()).plan(&graph);

        let runtime = plan.chunk("runtime").unwrap();
        assert_eq!(
            runtime.kind,
            ChunkKind::Runtime { entries: vec!["a".to_string(), "b".to_string()] }
        );
    }

    #[test]
    fn test_name_collision_gets_suffix() {
        let mut graph = ModuleGraph::new(vec![
            entry("shared~util", "/p/src/a.js"),
            entry("b", "/p/src/b.js"),
        ]);
        graph.insert(node("/p/src/a.js", &["/p/src/util.js"], 10));
        graph.insert(node("/p/src/b.js", &["/p/src/util.js"], 10));
        graph.insert(node("/p/src/util.js", &[], 10));

        let plan = ChunkPlanner::new(SplitChunksOptions::default(), RuntimeChunkPolicy::Disabled).plan(&graph);
        assert_eq!(chunk_of(&plan, "/p/src/util.js"), "shared~util~1");
    }

    #[test]
    fn test_size_threshold_extracts_single_entry_module() {
        let mut graph = ModuleGraph::new(vec![entry("a", "/p/src/a.js")]);
        graph.insert(node("/p/src/a.js", &["/p/src/big.js"], 10));
        graph.insert(node("/p/src/big.js", &[], 5000));

        let split = SplitChunksOptions {
            size_threshold: Some(1000),
            ..Default::default()
        };
        let plan = ChunkPlanner::new(split, RuntimeChunkPolicy::Disabled).plan(&graph);
        assert_eq!(chunk_of(&plan, "/p/src/big.js"), "shared~big");
    }

    #[test]
    fn test_cycle_between_entries_terminates() {
        let mut graph = ModuleGraph::new(vec![entry("a", "/p/src/a.js")]);
        graph.insert(node("/p/src/a.js", &["/p/src/b.js"], 10));
        graph.insert(node("/p/src/b.js", &["/p/src/a.js"], 10));

        let plan = ChunkPlanner::new(SplitChunksOptions::default(), RuntimeChunkPolicy::Disabled).plan(&graph);
        assert_eq!(plan.chunks.len(), 1);
        assert_exactly_once(&graph, &plan);
    }
}
