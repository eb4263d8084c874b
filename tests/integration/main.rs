mod build_tests;
mod watch_tests;

use std::fs;
use std::path::{Path, PathBuf};
use stitch::core::config::BuildConfig;
use stitch::utils::config_loader::{CliOverrides, ConfigLoader, StitchConfig};
use tempfile::TempDir;

/// Temporary project with the given files, root canonicalized
pub fn project(files: &[(&str, &str)]) -> (TempDir, PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let root = fs::canonicalize(temp.path()).unwrap();
    for (file, content) in files {
        write(&root, file, content);
    }
    (temp, root)
}

pub fn write(root: &Path, file: &str, content: &str) {
    let path = root.join(file);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// Config as the CLI would produce it from a `stitch.config.json`
pub fn config(root: &Path, json: &str) -> BuildConfig {
    let file_config: StitchConfig = serde_json::from_str(json).unwrap();
    ConfigLoader::merge_with_cli(Some(file_config), root.to_path_buf(), &CliOverrides::default()).unwrap()
}

pub fn read(root: &Path, file: &str) -> String {
    fs::read_to_string(root.join(file)).unwrap()
}
