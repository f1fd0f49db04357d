//! Release grouping
//!
//! Published objects carry their build number in the file name:
//! `kde-linux_<id>.<ext>` or `kde-linux_<id>_<variant>.<ext>`. The legacy
//! `kdeos_` prefix is still recognised because tombstoned releases published
//! under that name stay around indefinitely.
//!
//! Objects without a release prefix (manifests, chunk stores, configuration)
//! are not part of any release and are skipped. A prefixed name whose id is
//! not numeric fails the whole grouping pass.

use std::collections::BTreeMap;

use tracing::debug;

use crate::artifact::{basename, Artifact};

/// File name prefixes that mark an object as a release artifact.
pub const RELEASE_PREFIXES: &[&str] = &["kdeos_", "kde-linux_"];

/// Errors raised while grouping a listing into releases.
#[derive(Debug, thiserror::Error)]
pub enum GroupError {
    #[error("Failed to parse release number '{candidate}' from {path}")]
    MalformedReleaseName { path: String, candidate: String },
}

/// A numbered build and the artifacts published for it.
#[derive(Debug)]
pub struct Release<A> {
    /// Decimal release id extracted from the artifact names
    pub id: String,
    /// Artifacts in listing order
    pub artifacts: Vec<A>,
}

impl<A> Release<A> {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            artifacts: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

/// Releases of one storage prefix keyed by id.
pub type ReleaseSet<A> = BTreeMap<String, Release<A>>;

/// Extract the release id from an object's base name.
///
/// Returns `Ok(None)` when the name carries no release prefix.
pub fn parse_release_id(name: &str) -> Result<Option<String>, GroupError> {
    let Some(rest) = RELEASE_PREFIXES
        .iter()
        .find_map(|prefix| name.strip_prefix(prefix))
    else {
        return Ok(None);
    };

    let candidate = rest.split('.').next().unwrap_or_default();
    let candidate = candidate.split('_').next().unwrap_or_default();

    let numeric = !candidate.is_empty() && candidate.bytes().all(|b| b.is_ascii_digit());
    if !numeric || candidate.parse::<u64>().is_err() {
        return Err(GroupError::MalformedReleaseName {
            path: name.to_string(),
            candidate: candidate.to_string(),
        });
    }

    Ok(Some(candidate.to_string()))
}

/// Partition a listing into releases.
///
/// Every artifact whose base name has a release prefix lands in exactly one
/// release, regardless of its sub-path. Artifact order inside a release is
/// the order of the input.
pub fn group<A, I>(artifacts: I) -> Result<ReleaseSet<A>, GroupError>
where
    A: Artifact,
    I: IntoIterator<Item = A>,
{
    let mut releases: ReleaseSet<A> = BTreeMap::new();

    for artifact in artifacts {
        let id = match parse_release_id(basename(artifact.path())) {
            Ok(Some(id)) => id,
            Ok(None) => {
                debug!(path = artifact.path(), "skipping object without release prefix");
                continue;
            }
            Err(GroupError::MalformedReleaseName { candidate, .. }) => {
                return Err(GroupError::MalformedReleaseName {
                    path: artifact.path().to_string(),
                    candidate,
                });
            }
        };

        releases
            .entry(id.clone())
            .or_insert_with(|| Release::new(id))
            .artifacts
            .push(artifact);
    }

    Ok(releases)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeArtifact;

    fn listing(paths: &[&str]) -> Vec<FakeArtifact> {
        paths.iter().map(|p| FakeArtifact::new(p)).collect()
    }

    #[test]
    fn test_parse_release_id_variants() {
        assert_eq!(parse_release_id("kde-linux_202501.raw").unwrap().as_deref(), Some("202501"));
        assert_eq!(parse_release_id("kde-linux_202501_root-x86-64.erofs").unwrap().as_deref(), Some("202501"));
        assert_eq!(parse_release_id("kdeos_7.efi").unwrap().as_deref(), Some("7"));
        assert_eq!(parse_release_id("kde-linux_42").unwrap().as_deref(), Some("42"));
    }

    #[test]
    fn test_parse_release_id_unprefixed() {
        assert!(parse_release_id("SHA256SUMS").unwrap().is_none());
        assert!(parse_release_id("vacuum.yaml").unwrap().is_none());
        assert!(parse_release_id("linux_1.raw").unwrap().is_none());
    }

    #[test]
    fn test_parse_release_id_malformed() {
        let err = parse_release_id("kde-linux_latest.raw").unwrap_err();
        match err {
            GroupError::MalformedReleaseName { candidate, .. } => assert_eq!(candidate, "latest"),
        }
        assert!(parse_release_id("kde-linux_.raw").is_err());
        assert!(parse_release_id("kdeos_-1.raw").is_err());
    }

    #[test]
    fn test_group_partitions_every_artifact() {
        let releases = group(listing(&[
            "testing/kde-linux_10.raw",
            "testing/kde-linux_9.raw",
            "testing/kde-linux_10.efi",
            "testing/kde-linux_10.raw.sha256",
            "testing/kdeos_9_root.erofs",
        ]))
        .unwrap();

        assert_eq!(releases.len(), 2);
        let ten: Vec<_> = releases["10"].artifacts.iter().map(|a| a.path()).collect();
        assert_eq!(
            ten,
            vec![
                "testing/kde-linux_10.raw",
                "testing/kde-linux_10.efi",
                "testing/kde-linux_10.raw.sha256",
            ]
        );
        assert_eq!(releases["9"].len(), 2);
    }

    #[test]
    fn test_group_ignores_sub_path() {
        let releases = group(listing(&[
            "a/kde-linux_5.raw",
            "b/c/kde-linux_5.efi",
        ]))
        .unwrap();
        assert_eq!(releases.len(), 1);
        assert_eq!(releases["5"].len(), 2);
    }

    #[test]
    fn test_group_drops_unrelated_objects() {
        let releases = group(listing(&[
            "unrelated/file.txt",
            "testing/SHA256SUMS",
            "testing/kde-linux_3.raw",
        ]))
        .unwrap();
        assert_eq!(releases.len(), 1);
        assert!(releases
            .values()
            .flat_map(|r| r.artifacts.iter())
            .all(|a| a.path() != "unrelated/file.txt"));
    }

    #[test]
    fn test_group_malformed_name_is_fatal() {
        let err = group(listing(&[
            "testing/kde-linux_3.raw",
            "testing/kde-linux_nightly.raw",
        ]))
        .unwrap_err();
        match err {
            GroupError::MalformedReleaseName { path, candidate } => {
                assert_eq!(path, "testing/kde-linux_nightly.raw");
                assert_eq!(candidate, "nightly");
            }
        }
    }

    #[test]
    fn test_group_empty_listing() {
        let releases = group(Vec::<FakeArtifact>::new()).unwrap();
        assert!(releases.is_empty());
    }
}
