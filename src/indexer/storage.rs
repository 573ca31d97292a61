use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use walkdir::WalkDir;

use crate::error::{RagError, Result};

/// Raw document storage. Names are flat identifiers relative to the store root.
#[async_trait]
pub trait StorageGateway: Send + Sync {
    async fn list(&self) -> Result<Vec<String>>;

    /// Fails with [`RagError::NotFound`] when `name` is absent.
    async fn read(&self, name: &str) -> Result<Vec<u8>>;

    /// Returns the location the bytes were written to.
    async fn write(&self, name: &str, bytes: &[u8]) -> Result<String>;
}

/// Stores documents as plain files directly under `base_dir`.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_dir: PathBuf,
}

impl LocalStorage {
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir).map_err(|e| RagError::Storage {
            name: base_dir.display().to_string(),
            source: e,
        })?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Resolve `name` inside the store, rejecting anything that is not a single
    /// normal path component.
    fn resolve(&self, name: &str) -> Result<PathBuf> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.base_dir.join(name)),
            _ => Err(RagError::InvalidName(name.to_string())),
        }
    }
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

#[async_trait]
impl StorageGateway for LocalStorage {
    async fn list(&self) -> Result<Vec<String>> {
        let base_dir = self.base_dir.clone();
        let entries = tokio::task::spawn_blocking(move || {
            WalkDir::new(&base_dir)
                .min_depth(1)
                .max_depth(1)
                .follow_links(true)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
                .filter(|name| !is_hidden(name))
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| RagError::Storage {
            name: self.base_dir.display().to_string(),
            source: std::io::Error::other(e),
        })?;

        let mut names = entries;
        names.sort();
        Ok(names)
    }

    async fn read(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.resolve(name)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(RagError::NotFound(format!(
                "{name} not found in {}",
                self.base_dir.display()
            ))),
            Err(e) => Err(RagError::Storage {
                name: name.to_string(),
                source: e,
            }),
        }
    }

    async fn write(&self, name: &str, bytes: &[u8]) -> Result<String> {
        let path = self.resolve(name)?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| RagError::Storage {
                name: name.to_string(),
                source: e,
            })?;
        Ok(path.to_string_lossy().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_read_list() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path().join("raw")).unwrap();

        let location = storage.write("doc1.txt", b"content").await.unwrap();
        assert!(Path::new(&location).exists());
        storage.write("a.txt", b"first").await.unwrap();

        assert_eq!(storage.list().await.unwrap(), vec!["a.txt", "doc1.txt"]);
        assert_eq!(storage.read("doc1.txt").await.unwrap(), b"content");
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).unwrap();
        assert!(matches!(
            storage.read("missing.txt").await,
            Err(RagError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).unwrap();
        for name in ["../escape.txt", "nested/file.txt", "", "/etc/passwd"] {
            assert!(
                matches!(storage.write(name, b"x").await, Err(RagError::InvalidName(_))),
                "{name} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_list_skips_directories_and_hidden_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("inner.txt"), "x").unwrap();
        std::fs::write(dir.path().join(".hidden"), "x").unwrap();
        std::fs::write(dir.path().join("visible.txt"), "x").unwrap();

        let storage = LocalStorage::new(dir.path()).unwrap();
        assert_eq!(storage.list().await.unwrap(), vec!["visible.txt"]);
    }
}
