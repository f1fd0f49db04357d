//! Directory-backed object store
//!
//! Treats a local directory (or a mounted bucket) as the bucket: the object
//! key is the path relative to the root. User metadata is kept as JSON under
//! a hidden `.vacuum-meta/` tree that is never listed. Streamed uploads are
//! staged under `.vacuum-meta/.partial/` and renamed into place on commit.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use walkdir::WalkDir;

use super::{is_direct_child, ObjectInfo, ObjectStore, ObjectWriter, StoreError};

const META_DIR: &str = ".vacuum-meta";
const PARTIAL_DIR: &str = ".partial";

static NEXT_UPLOAD: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        let rel = Path::new(key);
        let valid = !key.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
            && !key.starts_with(META_DIR);
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(rel))
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.root.join(META_DIR).join(format!("{}.json", key))
    }

    fn read_metadata(&self, key: &str) -> Result<BTreeMap<String, String>, StoreError> {
        let path = self.meta_path(key);
        match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| StoreError::Metadata {
                key: key.to_string(),
                source,
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(source) => Err(StoreError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    /// Replace the metadata of `key`; empty metadata removes the file.
    fn write_metadata(&self, key: &str, metadata: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let meta_path = self.meta_path(key);
        if metadata.is_empty() {
            return match fs::remove_file(&meta_path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(source) => Err(StoreError::Io {
                    key: key.to_string(),
                    source,
                }),
            };
        }

        if let Some(parent) = meta_path.parent() {
            fs::create_dir_all(parent).map_err(io_err(key))?;
        }
        let json = serde_json::to_vec_pretty(metadata).map_err(|source| StoreError::Metadata {
            key: key.to_string(),
            source,
        })?;
        fs::write(meta_path, json).map_err(io_err(key))
    }
}

/// Streamed upload into a staging file.
struct FsObjectWriter<'a> {
    store: &'a FsStore,
    key: String,
    target: PathBuf,
    staging: PathBuf,
    file: Option<BufWriter<File>>,
    written: u64,
}

impl Write for FsObjectWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "upload already finished"))?;
        let n = file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl ObjectWriter for FsObjectWriter<'_> {
    fn commit(mut self: Box<Self>, metadata: BTreeMap<String, String>) -> Result<u64, StoreError> {
        let key = self.key.clone();
        if let Some(file) = self.file.take() {
            let file = file.into_inner().map_err(|e| StoreError::Io {
                key: key.clone(),
                source: e.into_error(),
            })?;
            file.sync_all().map_err(io_err(&key))?;
        }

        self.store.write_metadata(&key, &metadata)?;
        if let Some(parent) = self.target.parent() {
            fs::create_dir_all(parent).map_err(io_err(&key))?;
        }
        fs::rename(&self.staging, &self.target).map_err(io_err(&key))?;
        Ok(self.written)
    }
}

impl Drop for FsObjectWriter<'_> {
    fn drop(&mut self) {
        self.file.take();
        // Gone already after a successful commit.
        let _ = fs::remove_file(&self.staging);
    }
}

fn io_err(key: &str) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| {
        if source.kind() == io::ErrorKind::NotFound {
            StoreError::NotFound(key.to_string())
        } else {
            StoreError::Io {
                key: key.to_string(),
                source,
            }
        }
    }
}

impl ObjectStore for FsStore {
    fn list(&self, prefix: &str, recursive: bool) -> Result<Vec<ObjectInfo>, StoreError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut objects = Vec::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by(|a, b| a.file_name().cmp(b.file_name()))
            .into_iter()
            .filter_entry(|e| e.depth() != 1 || e.file_name() != META_DIR);

        for entry in walker {
            let entry = entry.map_err(|e| StoreError::Io {
                key: prefix.to_string(),
                source: e.into(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let rel = match entry.path().strip_prefix(&self.root) {
                Ok(rel) => rel,
                Err(_) => continue,
            };
            let key = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            let included = if recursive {
                key.starts_with(prefix)
            } else {
                is_direct_child(prefix, &key)
            };
            if !included {
                continue;
            }

            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            let user_metadata = self.read_metadata(&key)?;
            objects.push(ObjectInfo {
                key,
                size,
                user_metadata,
            });
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.object_path(key)?;
        fs::read(path).map_err(io_err(key))
    }

    fn put(
        &self,
        key: &str,
        data: &[u8],
        metadata: BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err(key))?;
        }
        fs::write(&path, data).map_err(io_err(key))?;
        self.write_metadata(key, &metadata)
    }

    fn put_writer(&self, key: &str) -> Result<Box<dyn ObjectWriter + '_>, StoreError> {
        let target = self.object_path(key)?;
        let staging_dir = self.root.join(META_DIR).join(PARTIAL_DIR);
        fs::create_dir_all(&staging_dir).map_err(io_err(key))?;

        let staging = staging_dir.join(format!(
            "{}-{}",
            std::process::id(),
            NEXT_UPLOAD.fetch_add(1, Ordering::Relaxed)
        ));
        let file = File::create(&staging).map_err(io_err(key))?;

        Ok(Box::new(FsObjectWriter {
            store: self,
            key: key.to_string(),
            target,
            staging,
            file: Some(BufWriter::new(file)),
            written: 0,
        }))
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.object_path(key)?;
        fs::remove_file(path).map_err(io_err(key))?;
        match fs::remove_file(self.meta_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }
}
