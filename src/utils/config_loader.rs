use crate::core::config::*;
use crate::utils::{Logger, Result, StitchError};
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Either a single value or a list of them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(value) => vec![value],
            OneOrMany::Many(values) => values,
        }
    }
}

/// `entry`: `"./src/index.js"`, `["./a.js", "./b.js"]` or `{ "name": ... }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntrySpec {
    Single(String),
    Many(Vec<String>),
    Named(IndexMap<String, OneOrMany<String>>),
}

impl EntrySpec {
    pub const DEFAULT_NAME: &'static str = "main";

    pub fn into_entries(self) -> Vec<EntryConfig> {
        match self {
            EntrySpec::Single(spec) => vec![EntryConfig::new(Self::DEFAULT_NAME, vec![spec])],
            EntrySpec::Many(specs) => vec![EntryConfig::new(Self::DEFAULT_NAME, specs)],
            EntrySpec::Named(map) => map
                .into_iter()
                .map(|(name, specs)| EntryConfig::new(name, specs.into_vec()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveConfig {
    /// Declaration order breaks ties between equally long prefixes
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub alias: IndexMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modules: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main_fields: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main_files: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strict_extensions: Option<bool>,
}

/// Plain string = path prefix relative to the root, `{ "regex": ... }` = pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionConfig {
    Prefix(String),
    Regex { regex: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnforceConfig {
    Pre,
    Normal,
    Post,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UseConfig {
    Name(String),
    Loader {
        loader: String,
        #[serde(default)]
        options: serde_json::Value,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include: Option<OneOrMany<ConditionConfig>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude: Option<OneOrMany<ConditionConfig>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enforce: Option<EnforceConfig>,
    #[serde(rename = "use", skip_serializing_if = "Option::is_none")]
    pub uses: Option<OneOrMany<UseConfig>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub one_of: Vec<RuleConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfig {
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheGroupConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_chunks: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reuse_existing_chunk: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// `false` switches a group (built-in ones included) off
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CacheGroupEntry {
    Enabled(bool),
    Group(CacheGroupConfig),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitChunksConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub automatic_name_delimiter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_threshold: Option<usize>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub cache_groups: IndexMap<String, CacheGroupEntry>,
}

/// `false`, `true`, `"single"`, `"multiple"` or `{ "name": "runtime~[name]" }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuntimeChunkConfig {
    Flag(bool),
    Mode(String),
    Named { name: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub split_chunks: Option<SplitChunksConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_chunk: Option<RuntimeChunkConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignored: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debounce_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmitConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_ms: Option<u64>,
}

/// Configuration file format (stitch.config.json)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StitchConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<EntrySpec>,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub resolve: ResolveConfig,
    #[serde(default)]
    pub module: ModuleConfig,
    #[serde(default)]
    pub optimization: OptimizationConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallelism: Option<usize>,
    #[serde(default)]
    pub emit: EmitConfig,
}

impl StitchConfig {
    /// Compile into a `BuildConfig` for a project at `root` (already absolute).
    /// Unset keys keep the `BuildConfig::new` defaults.
    pub fn into_build_config(self, root: PathBuf) -> Result<BuildConfig> {
        let mut config = BuildConfig::new(root.clone());

        if let Some(entry) = self.entry {
            config.entries = entry.into_entries();
        }

        let output = self.output;
        if let Some(path) = output.path {
            config.output.path = absolute(&root, &path);
        }
        if let Some(filename) = output.filename {
            config.output.chunk_filename = output
                .chunk_filename
                .clone()
                .unwrap_or_else(|| derive_chunk_filename(&filename));
            config.output.filename = filename;
        } else if let Some(chunk_filename) = output.chunk_filename {
            config.output.chunk_filename = chunk_filename;
        }
        config.output.html = output.html.unwrap_or(false);

        let resolve = self.resolve;
        config.resolve.alias = resolve.alias.into_iter().collect();
        if let Some(extensions) = resolve.extensions {
            config.resolve.extensions = extensions;
        }
        if let Some(modules) = resolve.modules {
            config.resolve.modules = modules;
        }
        if let Some(main_fields) = resolve.main_fields {
            config.resolve.main_fields = main_fields;
        }
        if let Some(main_files) = resolve.main_files {
            config.resolve.main_files = main_files;
        }
        config.resolve.strict_extensions = resolve.strict_extensions.unwrap_or(false);

        config.rules = self
            .module
            .rules
            .into_iter()
            .map(|rule| compile_rule(rule, &root))
            .collect::<Result<_>>()?;

        if let Some(split) = self.optimization.split_chunks {
            config.split_chunks = compile_split_chunks(split)?;
        }
        if let Some(runtime) = self.optimization.runtime_chunk {
            config.runtime_chunk = compile_runtime_chunk(runtime)?;
        }

        let watch = self.watch;
        config.watch.enabled = watch.enabled.unwrap_or(false);
        if let Some(ignored) = watch.ignored {
            config.watch.ignored = ignored.iter().map(|p| Regex::new(p)).collect::<std::result::Result<_, _>>()?;
        }
        if let Some(debounce_ms) = watch.debounce_ms {
            config.watch.debounce_ms = debounce_ms;
        }

        if let Some(parallelism) = self.parallelism {
            config.parallelism = parallelism;
        }
        if let Some(retries) = self.emit.retries {
            config.emit.retries = retries;
        }
        if let Some(backoff_ms) = self.emit.backoff_ms {
            config.emit.backoff_ms = backoff_ms;
        }

        Ok(config)
    }
}

fn absolute(root: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

fn compile_condition(condition: ConditionConfig, root: &Path) -> Result<Condition> {
    Ok(match condition {
        ConditionConfig::Prefix(prefix) => {
            let prefix = prefix.trim_start_matches("./");
            Condition::Prefix(absolute(root, prefix))
        }
        ConditionConfig::Regex { regex } => Condition::Pattern(Regex::new(&regex)?),
    })
}

fn compile_rule(rule: RuleConfig, root: &Path) -> Result<LoaderRule> {
    let conditions = |list: Option<OneOrMany<ConditionConfig>>| -> Result<Vec<Condition>> {
        list.map(OneOrMany::into_vec)
            .unwrap_or_default()
            .into_iter()
            .map(|c| compile_condition(c, root))
            .collect()
    };

    let uses = rule
        .uses
        .map(OneOrMany::into_vec)
        .unwrap_or_default()
        .into_iter()
        .map(|u| match u {
            UseConfig::Name(name) => LoaderUse::new(name),
            UseConfig::Loader { loader, options } => LoaderUse::new(loader).with_options(options),
        })
        .collect();

    Ok(LoaderRule {
        test: rule.test.as_deref().map(Regex::new).transpose()?,
        include: conditions(rule.include)?,
        exclude: conditions(rule.exclude)?,
        enforce: match rule.enforce {
            Some(EnforceConfig::Pre) => Enforce::Pre,
            Some(EnforceConfig::Post) => Enforce::Post,
            Some(EnforceConfig::Normal) | None => Enforce::Normal,
        },
        uses,
        one_of: rule
            .one_of
            .into_iter()
            .map(|r| compile_rule(r, root))
            .collect::<Result<_>>()?,
    })
}

/// Declared groups merge into the built-in `vendors`/`shared` ones by key
fn compile_split_chunks(split: SplitChunksConfig) -> Result<SplitChunksOptions> {
    let mut options = SplitChunksOptions::default();
    if let Some(enabled) = split.enabled {
        options.enabled = enabled;
    }
    if let Some(delimiter) = split.automatic_name_delimiter {
        options.delimiter = delimiter;
    }
    options.size_threshold = split.size_threshold;

    for (key, entry) in split.cache_groups {
        let position = options.cache_groups.iter().position(|g| g.key == key);
        match entry {
            CacheGroupEntry::Enabled(false) => {
                if let Some(index) = position {
                    options.cache_groups.remove(index);
                }
            }
            CacheGroupEntry::Enabled(true) => {
                if position.is_none() {
                    options.cache_groups.push(CacheGroup::new(key));
                }
            }
            CacheGroupEntry::Group(spec) => {
                let mut group = match position {
                    Some(index) => options.cache_groups.remove(index),
                    None => CacheGroup::new(key),
                };
                if let Some(test) = spec.test {
                    group.test = Some(Regex::new(&test)?);
                }
                if let Some(priority) = spec.priority {
                    group.priority = priority;
                }
                if let Some(min_chunks) = spec.min_chunks {
                    group.min_chunks = min_chunks;
                }
                if let Some(min_size) = spec.min_size {
                    group.min_size = min_size;
                }
                if let Some(reuse) = spec.reuse_existing_chunk {
                    group.reuse_existing_chunk = reuse;
                }
                if spec.name.is_some() {
                    group.name = spec.name;
                }
                match position {
                    Some(index) => options.cache_groups.insert(index, group),
                    None => options.cache_groups.push(group),
                }
            }
        }
    }
    Ok(options)
}

fn compile_runtime_chunk(runtime: RuntimeChunkConfig) -> Result<RuntimeChunkPolicy> {
    match runtime {
        RuntimeChunkConfig::Flag(false) => Ok(RuntimeChunkPolicy::Disabled),
        RuntimeChunkConfig::Flag(true) => Ok(RuntimeChunkPolicy::per_entry()),
        RuntimeChunkConfig::Mode(mode) => match mode.as_str() {
            "single" => Ok(RuntimeChunkPolicy::single()),
            "multiple" => Ok(RuntimeChunkPolicy::per_entry()),
            other => Err(StitchError::config(format!(
                "runtimeChunk must be true, false, \"single\", \"multiple\" or {{ \"name\": ... }}, got \"{}\"",
                other
            ))),
        },
        RuntimeChunkConfig::Named { name } if name.contains("[name]") => {
            Ok(RuntimeChunkPolicy::PerEntry { template: name })
        }
        RuntimeChunkConfig::Named { name } => Ok(RuntimeChunkPolicy::Single { name }),
    }
}

/// Values from the command line; each one wins over the config file
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub outdir: Option<String>,
    pub watch: Option<bool>,
    pub parallelism: Option<usize>,
}

/// Config loader that supports config files with CLI override
pub struct ConfigLoader;

impl ConfigLoader {
    pub const FILE_NAME: &'static str = "stitch.config.json";

    /// Load `stitch.config.json` from the project root if it exists
    pub fn load_from_file(root: &Path) -> Result<Option<StitchConfig>> {
        let config_path = root.join(Self::FILE_NAME);

        if !config_path.exists() {
            Logger::debug(&format!("No {} found, using defaults", Self::FILE_NAME));
            return Ok(None);
        }

        Self::load_path(&config_path).map(Some)
    }

    /// Load an explicitly named config file; a missing file is an error
    pub fn load_path(path: &Path) -> Result<StitchConfig> {
        Logger::debug(&format!("Loading config from {}", path.display()));

        let content = std::fs::read_to_string(path)?;
        let config: StitchConfig = serde_json::from_str(&content).map_err(|e| {
            StitchError::config(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        Logger::debug("✅ Config file loaded successfully");
        Ok(config)
    }

    /// Merge file config with CLI arguments (CLI takes precedence) and validate
    pub fn merge_with_cli(
        file_config: Option<StitchConfig>,
        root: PathBuf,
        overrides: &CliOverrides,
    ) -> Result<BuildConfig> {
        let root = std::fs::canonicalize(&root).unwrap_or(root);
        let mut config = file_config.unwrap_or_default().into_build_config(root)?;

        if let Some(outdir) = &overrides.outdir {
            config.output.path = absolute(&config.root, outdir);
        }
        if let Some(watch) = overrides.watch {
            config.watch.enabled = watch;
        }
        if let Some(parallelism) = overrides.parallelism {
            config.parallelism = parallelism;
        }

        config.validate()?;
        Ok(config)
    }
}
