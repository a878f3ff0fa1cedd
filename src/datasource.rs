use std::{
    fs,
    path::{Path, PathBuf},
};

use bytes::Bytes;

use crate::{datastore, error::LoadError, io::Artifact};

/// Where a `GraphStore` gets its artifacts from.
pub trait DataSource: Send + Sync {
    fn read(&self, artifact: Artifact) -> Result<Bytes, LoadError>;

    fn describe(&self) -> String;
}

/// Reads artifacts from `<base>.<extension>` files owned by this process.
#[derive(Debug, Clone)]
pub struct FileSource {
    base: PathBuf,
}

impl FileSource {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }
}

impl DataSource for FileSource {
    fn read(&self, artifact: Artifact) -> Result<Bytes, LoadError> {
        let path = artifact.path(&self.base);
        if !path.exists() {
            return Err(LoadError::Missing(path));
        }

        fs::read(&path)
            .map(Bytes::from)
            .map_err(|source| LoadError::Io { path, source })
    }

    fn describe(&self) -> String {
        format!("files at {}", self.base.display())
    }
}

/// Attaches to regions published with [`datastore::publish`].
#[derive(Debug, Clone)]
pub struct SharedMemorySource {
    base: PathBuf,
}

impl SharedMemorySource {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }
}

impl DataSource for SharedMemorySource {
    fn read(&self, artifact: Artifact) -> Result<Bytes, LoadError> {
        datastore::attach(&self.base, artifact)
    }

    fn describe(&self) -> String {
        format!("shared memory for {}", self.base.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_source_reports_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileSource::new(dir.path().join("nyc"));

        assert!(matches!(
            source.read(Artifact::Graph),
            Err(LoadError::Missing(path)) if path.ends_with("nyc.graph")
        ));
    }

    #[test]
    fn shared_memory_source_without_publication() {
        let source = SharedMemorySource::new("/nonexistent/never-published");
        assert!(matches!(
            source.read(Artifact::Hierarchy),
            Err(LoadError::SharedMemory { .. })
        ));
    }
}
