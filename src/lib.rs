// Stitch - module graph bundler core
// Library surface shared by the CLI and integration tests

pub mod utils;
pub mod core;
pub mod infrastructure;
pub mod cli;

pub use crate::core::config::BuildConfig;
pub use crate::core::interfaces::BuildService;
pub use crate::core::models::{BuildManifest, BuildSnapshot};
pub use crate::core::services::StitchBuildService;
pub use crate::utils::{Result, StitchError};
