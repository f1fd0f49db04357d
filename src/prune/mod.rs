//! Chunk store pruning
//!
//! Sysupdate images are also published as desync chunk stores. Chunks that
//! are no longer referenced by any `.caibx` index in the bucket are removed
//! by running `desync prune` against the store with every surviving index.
//! A failed prune is fatal for the run and is never retried.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{error, info};

use crate::store::{ObjectInfo, ObjectStore, StoreError};

/// Errors for chunk store pruning
#[derive(Debug, thiserror::Error)]
pub enum PruneError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} prune failed ({status})")]
    Failed { program: String, status: String },

    #[error("Failed to download index {key}: {source}")]
    Download {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Removes unreferenced chunks from a content-addressed store.
pub trait Pruner {
    fn prune(&self, store_url: &str, indexes: &[PathBuf]) -> Result<(), PruneError>;
}

/// Runs the `desync` binary.
#[derive(Debug, Clone)]
pub struct DesyncPruner {
    program: String,
}

impl Default for DesyncPruner {
    fn default() -> Self {
        Self::new("desync")
    }
}

impl DesyncPruner {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Arguments passed to the program for a prune.
    pub fn args(store_url: &str, indexes: &[PathBuf]) -> Vec<String> {
        let mut args = vec![
            "prune".to_string(),
            "--yes".to_string(),
            "--store".to_string(),
            store_url.to_string(),
        ];
        args.extend(indexes.iter().map(|p| p.display().to_string()));
        args
    }
}

impl Pruner for DesyncPruner {
    fn prune(&self, store_url: &str, indexes: &[PathBuf]) -> Result<(), PruneError> {
        let args = Self::args(store_url, indexes);
        info!(program = %self.program, indexes = indexes.len(), store = store_url, "Running prune");

        // stdout/stderr are inherited so the tool's progress ends up in the job log
        let status = Command::new(&self.program)
            .args(&args)
            .status()
            .map_err(|source| PruneError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !status.success() {
            error!(
                program = %self.program,
                %status,
                "Chunk store prune failed. This is a critical problem. Get someone on this immediately!"
            );
            return Err(PruneError::Failed {
                program: self.program.clone(),
                status: status.to_string(),
            });
        }

        info!(program = %self.program, "Prune finished");
        Ok(())
    }
}

/// Every object in the bucket whose key ends in `suffix`, in key order.
pub fn list_indexes(store: &dyn ObjectStore, suffix: &str) -> Result<Vec<ObjectInfo>, PruneError> {
    let objects = store.list("", true).map_err(|source| PruneError::Download {
        key: String::new(),
        source,
    })?;
    Ok(objects.into_iter().filter(|o| o.key.ends_with(suffix)).collect())
}

/// Download every object whose key ends in `suffix` into `dir`.
///
/// `dir` is wiped first. Returns the local paths in key order.
pub fn download_indexes(
    store: &dyn ObjectStore,
    suffix: &str,
    dir: &Path,
) -> Result<Vec<PathBuf>, PruneError> {
    match fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(PruneError::Io {
                path: dir.to_path_buf(),
                source,
            })
        }
    }

    info!(suffix, dir = %dir.display(), "Downloading chunk indexes");

    let mut paths = Vec::new();
    for object in list_indexes(store, suffix)? {
        info!(key = %object.key, "Downloading index");
        let data = store.get(&object.key).map_err(|source| PruneError::Download {
            key: object.key.clone(),
            source,
        })?;

        let path = dir.join(&object.key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| PruneError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(&path, data).map_err(|source| PruneError::Io {
            path: path.clone(),
            source,
        })?;
        paths.push(path);
    }

    Ok(paths)
}
