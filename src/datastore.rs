//! Process-wide registry of published datasets.
//!
//! `publish` loads every artifact of a base path once into immutable
//! reference-counted regions. Engines configured with `use_shared_memory`
//! attach to those regions instead of reading files, so any number of them
//! share one copy of the data. Regions stay alive while an engine still
//! holds them, even after `release`.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use bytes::Bytes;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::{error::LoadError, io::Artifact};

type Regions = FxHashMap<Artifact, Bytes>;

fn registry() -> &'static RwLock<FxHashMap<PathBuf, Regions>> {
    static REGISTRY: OnceLock<RwLock<FxHashMap<PathBuf, Regions>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(FxHashMap::default()))
}

/// Publishes all artifacts present for `base`, replacing an earlier
/// publication. Returns how many artifacts were published.
pub fn publish(base: &Path) -> Result<usize, LoadError> {
    let mut regions = Regions::default();

    for artifact in Artifact::ALL {
        let path = artifact.path(base);
        if !path.exists() {
            continue;
        }

        let bytes = fs::read(&path).map_err(|source| LoadError::Io { path, source })?;
        regions.insert(artifact, Bytes::from(bytes));
    }

    if regions.is_empty() {
        return Err(LoadError::Missing(Artifact::Graph.path(base)));
    }

    let count = regions.len();
    let total: usize = regions.values().map(Bytes::len).sum();
    registry().write().insert(base.to_path_buf(), regions);

    tracing::info!(base = %base.display(), artifacts = count, bytes = total, "dataset published");
    Ok(count)
}

/// Drops the publication for `base`. Returns whether one existed.
pub fn release(base: &Path) -> bool {
    let released = registry().write().remove(base).is_some();
    if released {
        tracing::info!(base = %base.display(), "dataset released");
    }
    released
}

pub fn is_published(base: &Path) -> bool {
    registry().read().contains_key(base)
}

/// A cheap handle to one published region.
pub(crate) fn attach(base: &Path, artifact: Artifact) -> Result<Bytes, LoadError> {
    registry()
        .read()
        .get(base)
        .and_then(|regions| regions.get(&artifact))
        .cloned()
        .ok_or_else(|| LoadError::SharedMemory {
            base: base.to_path_buf(),
            artifact: artifact.name(),
        })
}
