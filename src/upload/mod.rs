//! Publishing a local build tree
//!
//! Every uploaded object carries the SHA-256 of its content in the
//! [`CHECKSUM_METADATA_KEY`] header. The vacuum reuses that header when it
//! writes manifests, so objects published through here never need a
//! sidecar lookup. Files are streamed: each is read once, hashing and
//! uploading in the same pass.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::info;
use walkdir::WalkDir;

use crate::store::{ObjectStore, StoreError, CHECKSUM_METADATA_KEY};

const CHUNK_SIZE: usize = 64 * 1024;

/// Errors for tree uploads
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Upload directory not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to upload {key}: {source}")]
    Store {
        key: String,
        #[source]
        source: StoreError,
    },
}

/// One uploaded object.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct UploadedObject {
    pub key: String,
    pub size: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct UploadReport {
    pub objects: Vec<UploadedObject>,
}

impl UploadReport {
    pub fn total_bytes(&self) -> u64 {
        self.objects.iter().map(|o| o.size).sum()
    }
}

/// Where a failed streaming copy went wrong.
#[derive(Debug)]
enum CopyError {
    Read(io::Error),
    Write(io::Error),
}

/// Copy `reader` into `writer`, returning the byte count and the lowercase
/// hex SHA-256 of everything copied.
fn copy_hashing(reader: &mut dyn Read, writer: &mut dyn Write) -> Result<(u64, String), CopyError> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut size = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CopyError::Read(e)),
        };
        hasher.update(&buf[..n]);
        writer.write_all(&buf[..n]).map_err(CopyError::Write)?;
        size += n as u64;
    }
    writer.flush().map_err(CopyError::Write)?;
    Ok((size, hex::encode(hasher.finalize())))
}

/// Streaming SHA-256 of a file as lowercase hex.
pub fn sha256_file(path: &Path) -> Result<String, UploadError> {
    let io_err = |source| UploadError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).map_err(io_err)?;
    match copy_hashing(&mut file, &mut io::sink()) {
        Ok((_, sha256)) => Ok(sha256),
        Err(CopyError::Read(source)) | Err(CopyError::Write(source)) => Err(io_err(source)),
    }
}

fn object_key(key_prefix: &str, rel: &Path) -> String {
    let rel = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    let prefix = key_prefix.trim_matches('/');
    if prefix.is_empty() {
        rel
    } else {
        format!("{}/{}", prefix, rel)
    }
}

/// Upload every file below `dir` to `key_prefix/<relative path>`.
pub fn upload_tree(
    store: &dyn ObjectStore,
    dir: &Path,
    key_prefix: &str,
) -> Result<UploadReport, UploadError> {
    if !dir.is_dir() {
        return Err(UploadError::NotFound(dir.to_path_buf()));
    }

    let mut report = UploadReport::default();

    for entry in WalkDir::new(dir)
        .follow_links(false)
        .sort_by(|a, b| a.file_name().cmp(b.file_name()))
    {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let rel = match path.strip_prefix(dir) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        let key = object_key(key_prefix, rel);
        let store_err = |source| UploadError::Store {
            key: key.clone(),
            source,
        };

        info!(key = %key, from = %path.display(), "Uploading");
        let mut file = File::open(path).map_err(|source| UploadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut writer = store.put_writer(&key).map_err(store_err)?;
        let (size, sha256) = copy_hashing(&mut file, &mut writer).map_err(|e| match e {
            CopyError::Read(source) => UploadError::Io {
                path: path.to_path_buf(),
                source,
            },
            CopyError::Write(source) => store_err(StoreError::Io {
                key: key.clone(),
                source,
            }),
        })?;

        let mut metadata = BTreeMap::new();
        metadata.insert(CHECKSUM_METADATA_KEY.to_string(), sha256.clone());
        writer.commit(metadata).map_err(store_err)?;

        info!(key = %key, size, sha256 = %sha256, "Uploaded");
        report.objects.push(UploadedObject { key, size, sha256 });
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MemoryStore;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_sha256_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hello");
        fs::write(&path, b"hello").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_object_key() {
        assert_eq!(object_key("testing/sysupdate/v2/", Path::new("a/b.raw")), "testing/sysupdate/v2/a/b.raw");
        assert_eq!(object_key("", Path::new("b.raw")), "b.raw");
        assert_eq!(object_key("/", Path::new("b.raw")), "b.raw");
    }

    #[test]
    fn test_upload_tree_sets_checksum_metadata() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("kde-linux_1.raw"), b"hello").unwrap();
        fs::write(dir.path().join("sub/kde-linux_1.efi"), b"efi").unwrap();

        let store = MemoryStore::new();
        let report = upload_tree(&store, dir.path(), "testing").unwrap();

        assert_eq!(report.objects.len(), 2);
        assert_eq!(report.total_bytes(), 8);
        assert_eq!(store.keys(), vec!["testing/kde-linux_1.raw", "testing/sub/kde-linux_1.efi"]);

        let meta = store.metadata_of("testing/kde-linux_1.raw").unwrap();
        assert_eq!(
            meta.get(CHECKSUM_METADATA_KEY).map(String::as_str),
            Some("2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824")
        );
    }

    #[test]
    fn test_copy_hashing_spans_chunks() {
        let data: Vec<u8> = (0..(CHUNK_SIZE * 2 + 17)).map(|i| (i % 251) as u8).collect();
        let mut out = Vec::new();
        let (size, sha256) = copy_hashing(&mut data.as_slice(), &mut out).unwrap();

        assert_eq!(size, data.len() as u64);
        assert_eq!(out, data);
        assert_eq!(sha256, hex::encode(Sha256::digest(&data)));
    }

    #[test]
    fn test_uploaded_size_and_digest_match_file() {
        let dir = TempDir::new().unwrap();
        let data = vec![7u8; CHUNK_SIZE + 1];
        fs::write(dir.path().join("kde-linux_2.raw"), &data).unwrap();

        let store = MemoryStore::new();
        let report = upload_tree(&store, dir.path(), "").unwrap();

        let object = &report.objects[0];
        assert_eq!(object.size, data.len() as u64);
        assert_eq!(object.sha256, sha256_file(&dir.path().join("kde-linux_2.raw")).unwrap());
        assert_eq!(store.get("kde-linux_2.raw").unwrap(), data);
    }

    #[test]
    fn test_upload_missing_dir() {
        let store = MemoryStore::new();
        let err = upload_tree(&store, Path::new("/nonexistent/upload-tree"), "x").unwrap_err();
        assert!(matches!(err, UploadError::NotFound(_)));
    }
}
