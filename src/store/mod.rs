//! Object store port
//!
//! The vacuum talks to the bucket only through [`ObjectStore`]. Listing
//! returns user metadata alongside each key so checksums recorded at upload
//! time can be reused without fetching the object.

mod fs;

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

use vacuum_core::{parse_sidecar, Artifact, ArtifactError, ChecksumSource, SIDECAR_SUFFIX};

pub use fs::FsStore;

/// Custom metadata header holding the SHA-256 computed at upload time.
pub const CHECKSUM_METADATA_KEY: &str = "X-KDE-SHA256";

/// Errors for object store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("IO error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Metadata error on {key}: {source}")]
    Metadata {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid object key: '{0}'")]
    InvalidKey(String),

    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// One entry of a listing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub user_metadata: BTreeMap<String, String>,
}

impl ObjectInfo {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    /// Look up user metadata, ignoring header case.
    pub fn metadata(&self, name: &str) -> Option<&str> {
        self.user_metadata
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A bucket.
pub trait ObjectStore: Send + Sync {
    /// List objects under `prefix`. Without `recursive` only objects directly
    /// under the prefix are returned, in key order.
    fn list(&self, prefix: &str, recursive: bool) -> Result<Vec<ObjectInfo>, StoreError>;

    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    fn put(
        &self,
        key: &str,
        data: &[u8],
        metadata: BTreeMap<String, String>,
    ) -> Result<(), StoreError>;

    /// Start a streamed upload to `key`. Nothing is visible under `key`
    /// until [`ObjectWriter::commit`]; dropping the writer abandons it.
    fn put_writer(&self, key: &str) -> Result<Box<dyn ObjectWriter + '_>, StoreError>;

    fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// An upload in progress.
///
/// Metadata is supplied at commit time so it can depend on the streamed
/// content, such as its checksum.
pub trait ObjectWriter: Write {
    /// Publish the object with `metadata`, returning its size in bytes.
    fn commit(self: Box<Self>, metadata: BTreeMap<String, String>) -> Result<u64, StoreError>;
}

/// Whether `key` sits directly under `prefix` (no further `/`).
pub(crate) fn is_direct_child(prefix: &str, key: &str) -> bool {
    match key.strip_prefix(prefix) {
        Some(rest) => !rest.is_empty() && !rest.contains('/'),
        None => false,
    }
}

/// A listed object bound to its store.
pub struct StoreArtifact {
    store: Arc<dyn ObjectStore>,
    key: String,
    sha256: Option<String>,
}

impl StoreArtifact {
    pub fn new(store: Arc<dyn ObjectStore>, info: &ObjectInfo, checksum_key: &str) -> Self {
        Self {
            store,
            key: info.key.clone(),
            sha256: info.metadata(checksum_key).map(str::to_string),
        }
    }
}

impl std::fmt::Debug for StoreArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreArtifact")
            .field("key", &self.key)
            .field("sha256", &self.sha256)
            .finish()
    }
}

impl Artifact for StoreArtifact {
    fn path(&self) -> &str {
        &self.key
    }

    fn sha256(&self) -> Option<String> {
        self.sha256.clone()
    }

    fn delete(&self) -> Result<(), ArtifactError> {
        self.store.delete(&self.key).map_err(|e| to_artifact_error(&self.key, e))
    }
}

/// Reads `<key>.sha256` sidecar objects from a store.
pub struct StoreChecksums {
    store: Arc<dyn ObjectStore>,
}

impl StoreChecksums {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

impl ChecksumSource for StoreChecksums {
    fn sidecar_sha256(&self, path: &str) -> Result<Option<String>, ArtifactError> {
        let key = format!("{}{}", path, SIDECAR_SUFFIX);
        match self.store.get(&key) {
            Ok(bytes) => Ok(parse_sidecar(&String::from_utf8_lossy(&bytes))),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(to_artifact_error(&key, e)),
        }
    }
}

fn to_artifact_error(key: &str, err: StoreError) -> ArtifactError {
    match err {
        StoreError::NotFound(k) => ArtifactError::NotFound(k),
        StoreError::Io { source, .. } => ArtifactError::Io(source),
        other => ArtifactError::Backend {
            path: key.to_string(),
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MemoryStore;

    #[test]
    fn test_metadata_lookup_ignores_case() {
        let mut info = ObjectInfo::new("a");
        info.user_metadata
            .insert("X-Amz-Meta-X-Kde-Sha256".to_string(), "abc".to_string());
        assert_eq!(info.metadata("x-amz-meta-x-kde-sha256"), Some("abc"));
        assert_eq!(info.metadata(CHECKSUM_METADATA_KEY), None);
    }

    #[test]
    fn test_is_direct_child() {
        assert!(is_direct_child("testing/", "testing/kde-linux_1.raw"));
        assert!(!is_direct_child("testing/", "testing/sysupdate/v2/kde-linux_1.raw"));
        assert!(!is_direct_child("testing/", "testing/"));
        assert!(!is_direct_child("testing/", "other/kde-linux_1.raw"));
        assert!(is_direct_child("", "vacuum.yaml"));
    }

    #[test]
    fn test_store_artifact_delete() {
        let store = Arc::new(MemoryStore::new());
        store.insert("testing/kde-linux_1.raw", b"img", Some("ab"));
        let listed = store.list("testing/", false).unwrap();
        let artifact = StoreArtifact::new(store.clone(), &listed[0], CHECKSUM_METADATA_KEY);

        assert_eq!(artifact.sha256().as_deref(), Some("ab"));
        artifact.delete().unwrap();
        assert!(store.get("testing/kde-linux_1.raw").unwrap_err().is_not_found());
    }

    #[test]
    fn test_store_checksums_sidecar() {
        let store = Arc::new(MemoryStore::new());
        store.insert("x/kde-linux_1.raw.sha256", b"deadbeef  kde-linux_1.raw\n", None);
        let sums = StoreChecksums::new(store);

        assert_eq!(
            sums.sidecar_sha256("x/kde-linux_1.raw").unwrap().as_deref(),
            Some("deadbeef")
        );
        assert_eq!(sums.sidecar_sha256("x/kde-linux_2.raw").unwrap(), None);
    }
}
