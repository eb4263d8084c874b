use crate::core::interfaces::FileSystemService;
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

pub struct TokioFileSystemService;

impl TokioFileSystemService {
    /// Sibling temp path, so the final rename never crosses a filesystem
    fn temp_path_for(path: &Path) -> PathBuf {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "artifact".to_string());
        path.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4()))
    }
}

#[async_trait::async_trait]
impl FileSystemService for TokioFileSystemService {
    async fn read_bytes(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        fs::read(path).await
    }

    async fn write_atomic(&self, path: &Path, content: &[u8]) -> std::io::Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            self.create_directory(parent).await?;
        }

        let temp = Self::temp_path_for(path);
        if let Err(e) = fs::write(&temp, content).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e);
        }
        if let Err(e) = fs::rename(&temp, path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e);
        }
        Ok(())
    }

    async fn remove_file(&self, path: &Path) -> std::io::Result<()> {
        match fs::remove_file(path).await {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    async fn create_directory(&self, path: &Path) -> std::io::Result<()> {
        fs::create_dir_all(path).await
    }

    fn file_exists(&self, path: &Path) -> bool {
        path.is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_atomic_write_and_read() {
        let fs_service = TokioFileSystemService;
        let temp_dir = tempdir().unwrap();
        let target = temp_dir.path().join("nested/out/main.js");

        fs_service.write_atomic(&target, b"console.log(1);").await.unwrap();
        assert_eq!(fs_service.read_bytes(&target).await.unwrap(), b"console.log(1);");

        fs_service.write_atomic(&target, b"console.log(2);").await.unwrap();
        assert_eq!(fs_service.read_bytes(&target).await.unwrap(), b"console.log(2);");

        // No temp files left next to the artifact
        let leftovers: Vec<_> = std::fs::read_dir(target.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_remove_missing_file_is_ok() {
        let fs_service = TokioFileSystemService;
        let temp_dir = tempdir().unwrap();
        assert!(fs_service.remove_file(&temp_dir.path().join("nope.js")).await.is_ok());
        assert!(!fs_service.file_exists(&temp_dir.path().join("nope.js")));
    }
}
