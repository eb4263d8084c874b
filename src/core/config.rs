use std::path::{Path, PathBuf};
use once_cell::sync::Lazy;
use regex::Regex;
use crate::utils::{Result, StitchError};

static TEMPLATE_PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[(name|contenthash)(?::(\d+))?\]").unwrap()
});

/// Validated, immutable configuration for one build run
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub root: PathBuf,
    pub entries: Vec<EntryConfig>,
    pub output: OutputOptions,
    pub resolve: ResolveOptions,
    pub rules: Vec<LoaderRule>,
    pub split_chunks: SplitChunksOptions,
    pub runtime_chunk: RuntimeChunkPolicy,
    pub watch: WatchOptions,
    pub parallelism: usize,
    pub emit: EmitOptions,
}

impl BuildConfig {
    /// Defaults for a project rooted at `root`: entry `main` -> `./src/index.js`,
    /// output into `<root>/dist`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            entries: vec![EntryConfig::new("main", vec!["./src/index.js".to_string()])],
            output: OutputOptions::new(root.join("dist")),
            resolve: ResolveOptions::default(),
            rules: Vec::new(),
            split_chunks: SplitChunksOptions::default(),
            runtime_chunk: RuntimeChunkPolicy::Disabled,
            watch: WatchOptions::default(),
            parallelism: num_cpus::get().max(1),
            emit: EmitOptions::default(),
            root,
        }
    }

    pub fn with_entries(mut self, entries: Vec<EntryConfig>) -> Self {
        self.entries = entries;
        self
    }

    /// Check invariants that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.entries.is_empty() {
            return Err(StitchError::config("at least one entry is required"));
        }
        for entry in &self.entries {
            if entry.specifiers.is_empty() {
                return Err(StitchError::config(format!("entry '{}' has no modules", entry.name)));
            }
            if self.entries.iter().filter(|e| e.name == entry.name).count() > 1 {
                return Err(StitchError::config(format!("duplicate entry name '{}'", entry.name)));
            }
        }
        validate_template(&self.output.filename)?;
        validate_template(&self.output.chunk_filename)?;
        if self.split_chunks.delimiter.is_empty() {
            return Err(StitchError::config("automaticNameDelimiter must not be empty"));
        }
        if self.parallelism == 0 {
            return Err(StitchError::config("parallelism must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryConfig {
    pub name: String,
    pub specifiers: Vec<String>,
}

impl EntryConfig {
    pub fn new(name: impl Into<String>, specifiers: Vec<String>) -> Self {
        Self {
            name: name.into(),
            specifiers,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutputOptions {
    pub path: PathBuf,
    /// Template for entry chunks
    pub filename: String,
    /// Template for shared and runtime chunks
    pub chunk_filename: String,
    pub html: bool,
}

impl OutputOptions {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            filename: "[name].js".to_string(),
            chunk_filename: "[name].js".to_string(),
            html: false,
        }
    }

    pub fn file_name_for(&self, chunk_name: &str, is_entry: bool, hash: &str) -> String {
        let template = if is_entry { &self.filename } else { &self.chunk_filename };
        render_template(template, chunk_name, hash)
    }
}

/// Expand `[name]`, `[contenthash]` and `[contenthash:N]`
pub fn render_template(template: &str, name: &str, hash: &str) -> String {
    TEMPLATE_PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures| match &caps[1] {
            "name" => name.to_string(),
            _ => {
                let len = caps
                    .get(2)
                    .and_then(|m| m.as_str().parse::<usize>().ok())
                    .unwrap_or(hash.len());
                hash.chars().take(len).collect()
            }
        })
        .into_owned()
}

fn validate_template(template: &str) -> Result<()> {
    let stripped = TEMPLATE_PLACEHOLDER.replace_all(template, "");
    if stripped.contains('[') || stripped.contains(']') {
        return Err(StitchError::config(format!(
            "unknown placeholder in output template '{}'",
            template
        )));
    }
    Ok(())
}

/// Non-entry template derived from `filename`. A fixed name like `built.js`
/// gets a `[name].` prefix so shared chunks never land on the entry file.
pub fn derive_chunk_filename(filename: &str) -> String {
    if filename.contains("[name]") {
        filename.to_string()
    } else {
        format!("[name].{}", filename)
    }
}

#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Declaration order matters for tie-breaking
    pub alias: Vec<(String, String)>,
    pub extensions: Vec<String>,
    pub modules: Vec<String>,
    pub main_fields: Vec<String>,
    pub main_files: Vec<String>,
    pub strict_extensions: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            alias: Vec::new(),
            extensions: [".js", ".mjs", ".jsx", ".ts", ".tsx", ".json", ".css"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            modules: vec!["node_modules".to_string()],
            main_fields: vec!["module".to_string(), "main".to_string()],
            main_files: vec!["index".to_string()],
            strict_extensions: false,
        }
    }
}

/// Include/exclude condition on a module path
#[derive(Debug, Clone)]
pub enum Condition {
    /// Absolute directory or file prefix
    Prefix(PathBuf),
    Pattern(Regex),
}

impl Condition {
    pub fn matches(&self, path: &Path) -> bool {
        match self {
            Condition::Prefix(prefix) => path.starts_with(prefix),
            Condition::Pattern(re) => re.is_match(&path.to_string_lossy()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Enforce {
    Pre,
    #[default]
    Normal,
    Post,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoaderUse {
    pub loader: String,
    pub options: serde_json::Value,
}

impl LoaderUse {
    pub fn new(loader: impl Into<String>) -> Self {
        Self {
            loader: loader.into(),
            options: serde_json::Value::Null,
        }
    }

    pub fn with_options(mut self, options: serde_json::Value) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoaderRule {
    pub test: Option<Regex>,
    pub include: Vec<Condition>,
    pub exclude: Vec<Condition>,
    pub enforce: Enforce,
    pub uses: Vec<LoaderUse>,
    /// Only the first matching sub-rule applies
    pub one_of: Vec<LoaderRule>,
}

impl LoaderRule {
    pub fn new(test: &str, uses: Vec<LoaderUse>) -> Result<Self> {
        Ok(Self {
            test: Some(Regex::new(test)?),
            uses,
            ..Default::default()
        })
    }

    /// `test`, include and exclude only. Exclude wins over include.
    pub fn matches(&self, path: &Path) -> bool {
        if self.exclude.iter().any(|c| c.matches(path)) {
            return false;
        }
        if !self.include.is_empty() && !self.include.iter().any(|c| c.matches(path)) {
            return false;
        }
        match &self.test {
            Some(re) => re.is_match(&path.to_string_lossy()),
            None => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheGroup {
    pub key: String,
    pub test: Option<Regex>,
    pub priority: i32,
    pub min_chunks: usize,
    pub min_size: usize,
    pub reuse_existing_chunk: bool,
    /// Fixed chunk name; all of the group's modules go into that chunk
    pub name: Option<String>,
}

impl CacheGroup {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            test: None,
            priority: 0,
            min_chunks: 1,
            min_size: 0,
            reuse_existing_chunk: false,
            name: None,
        }
    }

    pub fn vendors() -> Self {
        Self {
            test: Regex::new(r"[\\/]node_modules[\\/]").ok(),
            priority: -10,
            ..Self::new("vendors")
        }
    }

    pub fn shared() -> Self {
        Self {
            priority: -20,
            min_chunks: 2,
            reuse_existing_chunk: true,
            ..Self::new("shared")
        }
    }

    pub fn matches_path(&self, path: &Path) -> bool {
        match &self.test {
            Some(re) => re.is_match(&path.to_string_lossy()),
            None => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SplitChunksOptions {
    pub enabled: bool,
    pub delimiter: String,
    /// A module bigger than this is eligible even when one entry reaches it
    pub size_threshold: Option<usize>,
    pub cache_groups: Vec<CacheGroup>,
}

impl Default for SplitChunksOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            delimiter: "~".to_string(),
            size_threshold: None,
            cache_groups: vec![CacheGroup::vendors(), CacheGroup::shared()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeChunkPolicy {
    /// Runtime embedded in each entry chunk
    Disabled,
    /// One runtime chunk shared by all entries
    Single { name: String },
    /// One runtime chunk per entry; `[name]` is the entry name
    PerEntry { template: String },
}

impl RuntimeChunkPolicy {
    pub fn per_entry() -> Self {
        RuntimeChunkPolicy::PerEntry {
            template: "runtime~[name]".to_string(),
        }
    }

    pub fn single() -> Self {
        RuntimeChunkPolicy::Single {
            name: "runtime".to_string(),
        }
    }

    /// Runtime chunk owning `entry`'s bookkeeping, if isolated
    pub fn chunk_name(&self, entry: &str) -> Option<String> {
        match self {
            RuntimeChunkPolicy::Disabled => None,
            RuntimeChunkPolicy::Single { name } => Some(name.clone()),
            RuntimeChunkPolicy::PerEntry { template } => Some(template.replace("[name]", entry)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub enabled: bool,
    pub ignored: Vec<Regex>,
    pub debounce_ms: u64,
}

impl WatchOptions {
    pub fn is_ignored(&self, path: &Path) -> bool {
        let path = path.to_string_lossy();
        self.ignored.iter().any(|re| re.is_match(&path))
    }
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            ignored: [r"[\\/]node_modules[\\/]", r"[\\/]\.git[\\/]"]
                .iter()
                .filter_map(|p| Regex::new(p).ok())
                .collect(),
            debounce_ms: 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmitOptions {
    pub retries: u32,
    pub backoff_ms: u64,
}

impl Default for EmitOptions {
    fn default() -> Self {
        Self {
            retries: 3,
            backoff_ms: 50,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_template() {
        assert_eq!(render_template("[name].js", "main", "abcdef"), "main.js");
        assert_eq!(
            render_template("[name].[contenthash:4].js", "shared~util", "abcdef"),
            "shared~util.abcd.js"
        );
        assert_eq!(render_template("[contenthash]-[name]", "a", "ff00"), "ff00-a");
    }

    #[test]
    fn test_template_validation() {
        let mut config = BuildConfig::new("/project");
        assert!(config.validate().is_ok());

        config.output.chunk_filename = "[id].js".to_string();
        assert!(config.validate().is_err());

        // Fixed names are fine; clashes are caught when files are named
        config.output.chunk_filename = "[name].js".to_string();
        config.output.filename = "built.js".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_derive_chunk_filename() {
        assert_eq!(derive_chunk_filename("built.js"), "[name].built.js");
        assert_eq!(derive_chunk_filename("[name].[contenthash:8].js"), "[name].[contenthash:8].js");
    }

    #[test]
    fn test_duplicate_entries_rejected() {
        let config = BuildConfig::new("/project").with_entries(vec![
            EntryConfig::new("a", vec!["./a.js".into()]),
            EntryConfig::new("a", vec!["./b.js".into()]),
        ]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rule_exclude_beats_include() {
        let mut rule = LoaderRule::new(r"\.js$", vec![LoaderUse::new("banner")]).unwrap();
        rule.include = vec![Condition::Prefix(PathBuf::from("/project/src"))];
        rule.exclude = vec![Condition::Pattern(Regex::new("vendor").unwrap())];

        assert!(rule.matches(Path::new("/project/src/app.js")));
        assert!(!rule.matches(Path::new("/project/src/vendor/lib.js")));
        assert!(!rule.matches(Path::new("/project/lib/app.js")));
        assert!(!rule.matches(Path::new("/project/src/app.css")));
    }

    #[test]
    fn test_runtime_chunk_names() {
        assert_eq!(RuntimeChunkPolicy::Disabled.chunk_name("a"), None);
        assert_eq!(RuntimeChunkPolicy::per_entry().chunk_name("a"), Some("runtime~a".into()));
        assert_eq!(RuntimeChunkPolicy::single().chunk_name("a"), Some("runtime".into()));
        let custom = RuntimeChunkPolicy::PerEntry { template: "runtime - [name]".into() };
        assert_eq!(custom.chunk_name("index"), Some("runtime - index".into()));
    }

    #[test]
    fn test_watch_ignore_patterns() {
        let watch = WatchOptions::default();
        assert!(watch.is_ignored(Path::new("/p/node_modules/react/index.js")));
        assert!(!watch.is_ignored(Path::new("/p/src/index.js")));
    }
}
