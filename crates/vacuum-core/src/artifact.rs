//! Stored artifact capability.

/// Errors reported by an artifact backend.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("Artifact not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage backend failed for {path}: {message}")]
    Backend { path: String, message: String },
}

/// One stored object belonging to a release.
///
/// Implementations are created per listing pass and never persisted.
pub trait Artifact {
    /// Full storage key of the object.
    fn path(&self) -> &str;

    /// Checksum reported by the store for this object, if it was uploaded
    /// with one.
    fn sha256(&self) -> Option<String>;

    /// Remove the object from the store.
    fn delete(&self) -> Result<(), ArtifactError>;
}

impl<A: Artifact + ?Sized> Artifact for Box<A> {
    fn path(&self) -> &str {
        (**self).path()
    }

    fn sha256(&self) -> Option<String> {
        (**self).sha256()
    }

    fn delete(&self) -> Result<(), ArtifactError> {
        (**self).delete()
    }
}

/// Final path component of a storage key.
pub fn basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basename_nested() {
        assert_eq!(basename("testing/sysupdate/v2/kde-linux_1.efi"), "kde-linux_1.efi");
    }

    #[test]
    fn test_basename_flat() {
        assert_eq!(basename("kdeos_20240101.raw"), "kdeos_20240101.raw");
    }

    #[test]
    fn test_basename_trailing_slash() {
        assert_eq!(basename("testing/sysupdate/"), "sysupdate");
    }
}
