use std::path::PathBuf;
use thiserror::Error;

/// Failure to map an import specifier to a module
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("Cannot resolve '{specifier}' from {}", from.display())]
    NotFound { specifier: String, from: PathBuf },

    #[error("Ambiguous import '{specifier}' from {}: {}", from.display(), candidates.iter().map(|c| c.display().to_string()).collect::<Vec<_>>().join(", "))]
    Ambiguous {
        specifier: String,
        from: PathBuf,
        candidates: Vec<PathBuf>,
    },

    #[error("Alias cycle while resolving '{specifier}' from {}: {}", from.display(), chain.join(" -> "))]
    AliasCycle {
        specifier: String,
        from: PathBuf,
        chain: Vec<String>,
    },
}

impl ResolutionError {
    pub fn specifier(&self) -> &str {
        match self {
            ResolutionError::NotFound { specifier, .. }
            | ResolutionError::Ambiguous { specifier, .. }
            | ResolutionError::AliasCycle { specifier, .. } => specifier,
        }
    }
}

/// A loader transform rejected a module
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Transform '{transform}' failed on {}: {message}", module.display())]
pub struct TransformError {
    pub module: PathBuf,
    pub transform: String,
    pub message: String,
}

/// Structural failure while building the module graph
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Entry '{entry}' cannot be resolved: {source}")]
    UnresolvableEntry {
        entry: String,
        #[source]
        source: ResolutionError,
    },

    #[error("Unresolvable import in {}: {source}", importer.display())]
    Resolution {
        importer: PathBuf,
        #[source]
        source: ResolutionError,
    },

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error("Failed to load {}: {source}", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Module loader task failed: {0}")]
    Join(String),
}

/// Failure while writing build artifacts
#[derive(Error, Debug)]
pub enum EmitError {
    #[error("Failed to write {} after {attempts} attempts: {source}", path.display())]
    Write {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to render manifest: {0}")]
    Manifest(String),
}

#[derive(Error, Debug)]
pub enum StitchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Emit(#[from] EmitError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Watch error: {0}")]
    Watch(String),
}

impl StitchError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn watch(message: impl Into<String>) -> Self {
        Self::Watch(message.into())
    }

    /// Format error with enhanced context display
    pub fn format_detailed(&self) -> String {
        match self {
            StitchError::Graph(GraphError::Transform(err)) | StitchError::Transform(err) => {
                format!(
                    "❌ Transform Error: {}\n📁 File: {}\n🔧 Transform: {}",
                    err.message,
                    err.module.display(),
                    err.transform
                )
            }
            StitchError::Graph(GraphError::Resolution { importer, source }) => {
                format!(
                    "❌ Resolution Error: {}\n📁 File: {}\n📦 Import: {}",
                    source,
                    importer.display(),
                    source.specifier()
                )
            }
            StitchError::Graph(GraphError::UnresolvableEntry { entry, source }) => {
                format!("❌ Entry Error: {}\n🎯 Entry: {}", source, entry)
            }
            StitchError::Emit(err) => format!("❌ Emit Error: {}", err),
            _ => format!("❌ {}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, StitchError>;

impl From<regex::Error> for StitchError {
    fn from(err: regex::Error) -> Self {
        StitchError::config(format!("Regex error: {}", err))
    }
}

impl From<serde_json::Error> for StitchError {
    fn from(err: serde_json::Error) -> Self {
        StitchError::config(format!("JSON error: {}", err))
    }
}

impl From<notify::Error> for StitchError {
    fn from(err: notify::Error) -> Self {
        StitchError::watch(err.to_string())
    }
}
