use std::path::{Component, Path, PathBuf};
use dashmap::DashMap;
use crate::core::config::ResolveOptions;
use crate::core::models::ModuleId;
use crate::utils::{Logger, ResolutionError};

/// Maps import specifiers to module ids.
///
/// Order of attempts:
/// 1. alias table (longest matching prefix, ties go to the first declared alias)
/// 2. relative or absolute path: exact file, each extension in order, then the
///    directory (package.json main fields, then main files)
/// 3. bare specifier: each search root in declared order
///
/// Successful lookups are memoized per `(specifier, directory)`.
pub struct ModuleResolver {
    options: ResolveOptions,
    root: PathBuf,
    cache: DashMap<(String, PathBuf), ModuleId>,
}

impl ModuleResolver {
    pub fn new(options: ResolveOptions, root: PathBuf) -> Self {
        Logger::debug(&format!("🔗 Resolver with {} aliases", options.alias.len()));
        for (alias, target) in &options.alias {
            Logger::debug(&format!("  {} → {}", alias, target));
        }

        Self {
            options,
            root,
            cache: DashMap::new(),
        }
    }

    pub fn resolve(&self, specifier: &str, from_dir: &Path) -> Result<ModuleId, ResolutionError> {
        let key = (specifier.to_string(), from_dir.to_path_buf());
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit.value().clone());
        }

        let id = self.resolve_uncached(specifier, from_dir)?;
        self.cache.insert(key, id.clone());
        Ok(id)
    }

    /// Forget memoized lookups; files may have appeared or disappeared
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    fn resolve_uncached(&self, specifier: &str, from_dir: &Path) -> Result<ModuleId, ResolutionError> {
        let (request, query) = match specifier.split_once('?') {
            Some((request, query)) => (request, Some(query.to_string())),
            None => (specifier, None),
        };

        let request = self.apply_aliases(request, specifier, from_dir)?;

        let found = if is_path_like(&request) {
            let base = if Path::new(&request).is_absolute() {
                PathBuf::from(&request)
            } else {
                from_dir.join(&request)
            };
            self.resolve_path(&normalize(&base), specifier, from_dir)?
        } else {
            self.resolve_in_roots(&request, specifier, from_dir)?
        };

        let path = found.ok_or_else(|| ResolutionError::NotFound {
            specifier: specifier.to_string(),
            from: from_dir.to_path_buf(),
        })?;

        let canonical = std::fs::canonicalize(&path).unwrap_or(path);
        Logger::debug(&format!("🔗 Resolved '{}' → {}", specifier, canonical.display()));
        Ok(ModuleId::new(canonical, query))
    }

    /// Rewrite `request` through the alias table until no alias matches.
    /// Targets that are bare specifiers may themselves be aliased again.
    fn apply_aliases(
        &self,
        request: &str,
        specifier: &str,
        from_dir: &Path,
    ) -> Result<String, ResolutionError> {
        let mut current = request.to_string();
        let mut applied: Vec<usize> = Vec::new();
        let mut chain = vec![current.clone()];

        while let Some((index, matched_len)) = self.best_alias(&current) {
            if applied.contains(&index) {
                return Err(ResolutionError::AliasCycle {
                    specifier: specifier.to_string(),
                    from: from_dir.to_path_buf(),
                    chain,
                });
            }
            applied.push(index);

            let (_, target) = &self.options.alias[index];
            let rest = &current[matched_len..];
            current = self.expand_alias_target(target, rest);
            chain.push(current.clone());

            if is_path_like(&current) {
                break;
            }
        }

        Ok(current)
    }

    /// (alias index, matched prefix length) of the best alias for `request`
    fn best_alias(&self, request: &str) -> Option<(usize, usize)> {
        let mut best: Option<(usize, usize)> = None;

        for (index, (key, target)) in self.options.alias.iter().enumerate() {
            // `vue -> vue/dist/vue.esm.js`: the request already points into the target
            if request == target || request.starts_with(&format!("{}/", target)) {
                continue;
            }
            let matched = match key.strip_suffix('$') {
                Some(exact) => (request == exact).then_some(exact.len()),
                None => {
                    let prefix_match = request.len() > key.len()
                        && request.starts_with(key.as_str())
                        && request[key.len()..].starts_with('/');
                    (request == key || prefix_match).then_some(key.len())
                }
            };

            if let Some(len) = matched {
                // Strictly longer only: equal length keeps the earlier declaration
                if best.map_or(true, |(_, best_len)| len > best_len) {
                    best = Some((index, len));
                }
            }
        }

        best
    }

    fn expand_alias_target(&self, target: &str, rest: &str) -> String {
        let target_path = Path::new(target);
        if target_path.is_absolute() {
            format!("{}{}", target, rest)
        } else if target.starts_with("./") || target.starts_with("../") || target == "." {
            let joined = normalize(&self.root.join(target));
            format!("{}{}", joined.display(), rest)
        } else {
            format!("{}{}", target, rest)
        }
    }

    fn resolve_in_roots(
        &self,
        request: &str,
        specifier: &str,
        from_dir: &Path,
    ) -> Result<Option<PathBuf>, ResolutionError> {
        for search_root in &self.options.modules {
            for dir in self.search_dirs(search_root, from_dir) {
                if !dir.is_dir() {
                    continue;
                }
                if let Some(found) = self.resolve_path(&normalize(&dir.join(request)), specifier, from_dir)? {
                    return Ok(Some(found));
                }
            }
        }
        Ok(None)
    }

    /// Absolute roots are used as-is; relative names (`node_modules`) are looked
    /// up in the requesting directory and its ancestors up to the project root.
    fn search_dirs(&self, search_root: &str, from_dir: &Path) -> Vec<PathBuf> {
        let root_path = Path::new(search_root);
        if root_path.is_absolute() {
            return vec![root_path.to_path_buf()];
        }

        let mut dirs = Vec::new();
        for dir in from_dir.ancestors() {
            dirs.push(dir.join(search_root));
            if dir == self.root {
                break;
            }
        }
        dirs
    }

    fn resolve_path(
        &self,
        base: &Path,
        specifier: &str,
        from_dir: &Path,
    ) -> Result<Option<PathBuf>, ResolutionError> {
        if let Some(file) = self.resolve_as_file(base, specifier, from_dir)? {
            return Ok(Some(file));
        }
        if base.is_dir() {
            return self.resolve_directory(base, specifier, from_dir);
        }
        Ok(None)
    }

    fn resolve_as_file(
        &self,
        path: &Path,
        specifier: &str,
        from_dir: &Path,
    ) -> Result<Option<PathBuf>, ResolutionError> {
        if path.is_file() {
            return Ok(Some(path.to_path_buf()));
        }

        let mut candidates = self
            .options
            .extensions
            .iter()
            .map(|ext| with_appended_extension(path, ext))
            .filter(|candidate| candidate.is_file());

        let first = candidates.next();
        if self.options.strict_extensions {
            let rest: Vec<PathBuf> = candidates.collect();
            if let (Some(first), false) = (&first, rest.is_empty()) {
                let mut all = vec![first.clone()];
                all.extend(rest);
                return Err(ResolutionError::Ambiguous {
                    specifier: specifier.to_string(),
                    from: from_dir.to_path_buf(),
                    candidates: all,
                });
            }
        }

        Ok(first)
    }

    fn resolve_directory(
        &self,
        dir: &Path,
        specifier: &str,
        from_dir: &Path,
    ) -> Result<Option<PathBuf>, ResolutionError> {
        if let Some(manifest) = read_package_json(&dir.join("package.json")) {
            for field in &self.options.main_fields {
                if let Some(main) = manifest.get(field).and_then(|v| v.as_str()) {
                    let entry = normalize(&dir.join(main));
                    if let Some(found) = self.resolve_as_file(&entry, specifier, from_dir)? {
                        return Ok(Some(found));
                    }
                    if entry.is_dir() {
                        if let Some(found) = self.resolve_main_files(&entry, specifier, from_dir)? {
                            return Ok(Some(found));
                        }
                    }
                }
            }
        }

        self.resolve_main_files(dir, specifier, from_dir)
    }

    fn resolve_main_files(
        &self,
        dir: &Path,
        specifier: &str,
        from_dir: &Path,
    ) -> Result<Option<PathBuf>, ResolutionError> {
        for main_file in &self.options.main_files {
            if let Some(found) = self.resolve_as_file(&dir.join(main_file), specifier, from_dir)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }
}

fn is_path_like(request: &str) -> bool {
    request.starts_with("./")
        || request.starts_with("../")
        || request == "."
        || request == ".."
        || Path::new(request).is_absolute()
}

/// `util` + `.js` -> `util.js`; unlike `with_extension` this keeps `a.service`
fn with_appended_extension(path: &Path, ext: &str) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(ext);
    PathBuf::from(os)
}

/// Lexical `.`/`..` removal; the file system is not consulted
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

fn read_package_json(path: &Path) -> Option<serde_json::Value> {
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}
