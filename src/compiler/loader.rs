use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::domain::canonical_path;

use super::error::LoadError;

/// Source of raw module text, keyed by logical path.
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    /// Fetch the source of the module at `path`.
    ///
    /// Fails with [`LoadError::NotFound`] when no module exists there.
    async fn fetch(&self, path: &str) -> Result<String, LoadError>;
}

/// In-memory source tree.
#[derive(Debug, Default)]
pub struct MemoryLoader {
    modules: RwLock<HashMap<String, String>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a loader from `(path, source)` pairs.
    pub fn from_sources<I, P, S>(sources: I) -> Self
    where
        I: IntoIterator<Item = (P, S)>,
        P: AsRef<str>,
        S: Into<String>,
    {
        let loader = MemoryLoader::new();
        for (path, source) in sources {
            loader.insert(path.as_ref(), source);
        }
        loader
    }

    /// Load a bundled source tree: a YAML mapping of logical path to source.
    ///
    /// ```yaml
    /// main.sqrl: |
    ///   INCLUDE "sample.sqrl";
    /// sample.sqrl: |
    ///   LET A := "Hello ";
    /// ```
    pub fn from_yaml(content: &str) -> Result<Self, LoadError> {
        let sources: HashMap<String, String> = serde_yaml::from_str(content)?;
        Ok(Self::from_sources(sources))
    }

    /// Add or replace a module.
    pub fn insert(&self, path: &str, source: impl Into<String>) {
        self.modules.write().insert(canonical_path(path), source.into());
    }

    /// Remove a module, returning whether it existed.
    pub fn remove(&self, path: &str) -> bool {
        self.modules.write().remove(&canonical_path(path)).is_some()
    }

    /// Number of modules held.
    pub fn len(&self) -> usize {
        self.modules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.read().is_empty()
    }
}

#[async_trait]
impl ModuleLoader for MemoryLoader {
    async fn fetch(&self, path: &str) -> Result<String, LoadError> {
        self.modules
            .read()
            .get(&canonical_path(path))
            .cloned()
            .ok_or_else(|| LoadError::NotFound(path.to_string()))
    }
}

/// Loader reading modules from a directory tree.
#[derive(Debug, Clone)]
pub struct FsLoader {
    root: PathBuf,
}

impl FsLoader {
    /// Create a loader rooted at `root`. Logical paths are resolved below it.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsLoader { root: root.into() }
    }

    /// Get the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_path(&self, path: &str) -> PathBuf {
        canonical_path(path)
            .split('/')
            .fold(self.root.clone(), |acc, part| acc.join(part))
    }
}

#[async_trait]
impl ModuleLoader for FsLoader {
    async fn fetch(&self, path: &str) -> Result<String, LoadError> {
        let canonical = canonical_path(path);
        if canonical.split('/').any(|part| part == "..") {
            return Err(LoadError::NotFound(path.to_string()));
        }

        match tokio::fs::read_to_string(self.file_path(path)).await {
            Ok(source) => Ok(source),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(LoadError::NotFound(path.to_string()))
            }
            Err(source) => Err(LoadError::Io {
                path: path.to_string(),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_memory_loader() {
        let loader = MemoryLoader::from_sources([
            ("main.sqrl", "INCLUDE \"sample.sqrl\";"),
            ("./sample.sqrl", "LET A := \"Hello \";"),
        ]);

        assert_eq!(loader.len(), 2);
        assert_eq!(
            loader.fetch("sample.sqrl").await.unwrap(),
            "LET A := \"Hello \";"
        );

        let err = loader.fetch("missing.sqrl").await.unwrap_err();
        assert!(matches!(err, LoadError::NotFound(p) if p == "missing.sqrl"));

        assert!(loader.remove("sample.sqrl"));
        assert!(loader.fetch("sample.sqrl").await.is_err());
    }

    #[tokio::test]
    async fn test_memory_loader_from_yaml() {
        let loader = MemoryLoader::from_yaml(
            r#"
main.sqrl: |
  INCLUDE "subdir/included.sqrl";
subdir/included.sqrl: |
  LET B := "world";
"#,
        )
        .unwrap();

        assert_eq!(loader.len(), 2);
        assert!(loader
            .fetch("subdir/included.sqrl")
            .await
            .unwrap()
            .contains("LET B"));
    }

    #[tokio::test]
    async fn test_fs_loader() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("subdir")).unwrap();
        std::fs::write(dir.path().join("subdir/included.sqrl"), "LET B := \"world\";").unwrap();

        let loader = FsLoader::new(dir.path());

        let source = loader.fetch("subdir/included.sqrl").await.unwrap();
        assert_eq!(source, "LET B := \"world\";");

        let err = loader.fetch("subdir/missing.sqrl").await.unwrap_err();
        assert!(matches!(err, LoadError::NotFound(_)));

        let err = loader.fetch("../outside.sqrl").await.unwrap_err();
        assert!(matches!(err, LoadError::NotFound(_)));
    }
}
