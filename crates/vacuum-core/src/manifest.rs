//! SHA256SUMS generation for retained releases
//!
//! The manifest lists one lowercase hex SHA-256 digest per line for every
//! artifact of every kept release. Artifacts are sorted by path within each
//! release so the output is identical across runs regardless of listing
//! order.
//!
//! Checksums come from the store metadata captured during listing when
//! available, otherwise from the `<path>.sha256` sidecar object. A retained
//! artifact without either is an error: the manifest must never silently
//! omit an entry.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, info};

use crate::artifact::{Artifact, ArtifactError};
use crate::release::ReleaseSet;

/// File name of the generated manifest.
pub const MANIFEST_FILENAME: &str = "SHA256SUMS";

/// Suffix of checksum sidecar objects.
pub const SIDECAR_SUFFIX: &str = ".sha256";

/// How an exclusion rule matches an artifact path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Matcher {
    Suffix(&'static str),
    Prefix(&'static str),
}

impl Matcher {
    pub fn matches(&self, path: &str) -> bool {
        match self {
            Matcher::Suffix(s) => path.ends_with(s),
            Matcher::Prefix(p) => path.starts_with(p),
        }
    }
}

/// A named reason to leave an artifact out of the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExclusionRule {
    pub name: &'static str,
    pub matcher: Matcher,
    pub reason: &'static str,
}

impl ExclusionRule {
    pub fn matches(&self, path: &str) -> bool {
        self.matcher.matches(path)
    }
}

/// `.erofs.caibx` indexes confuse systemd-sysupdate match patterns.
/// https://github.com/systemd/systemd/issues/38605
pub const EROFS_CAIBX_SUFFIX: ExclusionRule = ExclusionRule {
    name: "erofs-caibx-suffix",
    matcher: Matcher::Suffix(".erofs.caibx"),
    reason: "caibx indexes of erofs images break sysupdate match patterns",
};

/// Sidecar checksums of legacy kdeos_ images are wrong since 2025-08-20.
/// Drop once they have been regenerated.
pub const BROKEN_LEGACY_CHECKSUMS: ExclusionRule = ExclusionRule {
    name: "broken-legacy-checksums",
    matcher: Matcher::Prefix("/home/kdeos/kde-linux/kdeos_"),
    reason: "sidecar checksums of legacy kdeos_ images are broken",
};

pub const DEFAULT_EXCLUSIONS: &[ExclusionRule] = &[EROFS_CAIBX_SUFFIX, BROKEN_LEGACY_CHECKSUMS];

/// Errors for manifest generation
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("No SHA256 available for {path}")]
    MissingChecksum { path: String },

    #[error("Failed to read SHA256 sidecar for {path}: {source}")]
    Sidecar {
        path: String,
        #[source]
        source: ArtifactError,
    },

    #[error("Invalid SHA256 digest for {path}: '{digest}'")]
    InvalidDigest { path: String, digest: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Fallback source for checksums not captured at listing time.
pub trait ChecksumSource {
    /// Digest stored in the sidecar of `path`, `None` if there is no sidecar.
    fn sidecar_sha256(&self, path: &str) -> Result<Option<String>, ArtifactError>;
}

/// Extract the digest from sidecar contents (`sha256sum` output or a bare digest).
pub fn parse_sidecar(contents: &str) -> Option<String> {
    contents.split_whitespace().next().map(str::to_string)
}

/// Checksums reported by the store for every artifact, keyed by path.
pub fn known_checksums<A: Artifact>(releases: &ReleaseSet<A>) -> HashMap<String, String> {
    releases
        .values()
        .flat_map(|release| release.artifacts.iter())
        .filter_map(|artifact| {
            artifact
                .sha256()
                .filter(|sum| !sum.is_empty())
                .map(|sum| (artifact.path().to_string(), sum))
        })
        .collect()
}

/// Generated manifest contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    pub digests: Vec<String>,
}

impl Manifest {
    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }

    /// One digest per line, each terminated by a newline.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(self.digests.len() * 65);
        for digest in &self.digests {
            out.push_str(digest);
            out.push('\n');
        }
        out
    }

    /// Write the manifest, creating parent directories as needed.
    pub fn write_to(&self, path: &Path) -> Result<(), ManifestError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.render())?;
        Ok(())
    }
}

/// Builds manifests for kept releases.
#[derive(Debug, Clone)]
pub struct ManifestGenerator {
    exclusions: Vec<ExclusionRule>,
    known: HashMap<String, String>,
}

impl Default for ManifestGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_EXCLUSIONS.to_vec())
    }
}

impl ManifestGenerator {
    pub fn new(exclusions: Vec<ExclusionRule>) -> Self {
        Self {
            exclusions,
            known: HashMap::new(),
        }
    }

    /// Checksums already known for artifact paths, used before the sidecar.
    pub fn with_known(mut self, known: HashMap<String, String>) -> Self {
        self.known = known;
        self
    }

    fn excluded_by(&self, path: &str) -> Option<&ExclusionRule> {
        self.exclusions.iter().find(|rule| rule.matches(path))
    }

    /// Produce the manifest for `keep`.
    ///
    /// Duplicate ids in `keep` are processed again. Ids without a release
    /// under this prefix contribute nothing.
    pub fn generate<A: Artifact>(
        &self,
        releases: &ReleaseSet<A>,
        keep: &[String],
        sidecars: &dyn ChecksumSource,
    ) -> Result<Manifest, ManifestError> {
        let mut manifest = Manifest::default();

        for id in keep {
            let Some(release) = releases.get(id) else {
                debug!(release = %id, "Kept release not present under this prefix");
                continue;
            };

            let mut artifacts: Vec<&A> = release.artifacts.iter().collect();
            artifacts.sort_by(|a, b| a.path().cmp(b.path()));

            for artifact in artifacts {
                let path = artifact.path();
                if let Some(rule) = self.excluded_by(path) {
                    debug!(path, rule = rule.name, "Excluded from manifest");
                    continue;
                }

                let digest = match self.known.get(path) {
                    Some(sum) => {
                        info!(path, "Using existing SHA256");
                        sum.clone()
                    }
                    None => sidecars
                        .sidecar_sha256(path)
                        .map_err(|source| ManifestError::Sidecar {
                            path: path.to_string(),
                            source,
                        })?
                        .ok_or_else(|| ManifestError::MissingChecksum {
                            path: path.to_string(),
                        })?,
                };

                manifest.digests.push(normalize_digest(path, &digest)?);
            }
        }

        Ok(manifest)
    }
}

/// A SHA-256 digest as 64 lowercase hex characters.
fn normalize_digest(path: &str, digest: &str) -> Result<String, ManifestError> {
    let digest = digest.trim();
    let mut bytes = [0u8; 32];
    hex::decode_to_slice(digest, &mut bytes).map_err(|_| ManifestError::InvalidDigest {
        path: path.to_string(),
        digest: digest.to_string(),
    })?;
    Ok(hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::release::group;
    use crate::testing::FakeArtifact;
    use tempfile::TempDir;

    struct Sidecars(HashMap<String, String>);

    impl Sidecars {
        fn none() -> Self {
            Sidecars(HashMap::new())
        }
    }

    impl ChecksumSource for Sidecars {
        fn sidecar_sha256(&self, path: &str) -> Result<Option<String>, ArtifactError> {
            Ok(self.0.get(path).cloned())
        }
    }

    struct BrokenSidecars;

    impl ChecksumSource for BrokenSidecars {
        fn sidecar_sha256(&self, path: &str) -> Result<Option<String>, ArtifactError> {
            Err(ArtifactError::Backend {
                path: format!("{}{}", path, SIDECAR_SUFFIX),
                message: "connection reset".to_string(),
            })
        }
    }

    fn digest(c: char) -> String {
        std::iter::repeat(c).take(64).collect()
    }

    fn keep(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_sorted_by_path_within_release() {
        let releases = group(vec![
            FakeArtifact::new("v2/kde-linux_5.raw").with_sha256(&digest('c')),
            FakeArtifact::new("v2/kde-linux_5.efi").with_sha256(&digest('a')),
            FakeArtifact::new("v2/kde-linux_5.erofs").with_sha256(&digest('b')),
        ])
        .unwrap();
        let generator = ManifestGenerator::default().with_known(known_checksums(&releases));

        let manifest = generator
            .generate(&releases, &keep(&["5"]), &Sidecars::none())
            .unwrap();
        assert_eq!(manifest.digests, vec![digest('a'), digest('b'), digest('c')]);
    }

    #[test]
    fn test_deterministic_across_listing_order() {
        let paths = ["v2/kde-linux_7.raw", "v2/kde-linux_7.efi", "v2/kde-linux_6.raw"];
        let sums: HashMap<String, String> = paths
            .iter()
            .zip(['1', '2', '3'])
            .map(|(p, c)| (p.to_string(), digest(c)))
            .collect();

        let forward = group(paths.iter().map(|p| FakeArtifact::new(p)).collect::<Vec<_>>()).unwrap();
        let reverse = group(paths.iter().rev().map(|p| FakeArtifact::new(p)).collect::<Vec<_>>()).unwrap();

        let sidecars = Sidecars(sums);
        let generator = ManifestGenerator::default();
        let a = generator.generate(&forward, &keep(&["7", "6"]), &sidecars).unwrap();
        let b = generator.generate(&reverse, &keep(&["7", "6"]), &sidecars).unwrap();
        assert_eq!(a.render(), b.render());
    }

    #[test]
    fn test_known_checksum_preferred_over_sidecar() {
        let releases = group(vec![FakeArtifact::new("kde-linux_1.raw").with_sha256(&digest('a'))]).unwrap();
        let mut sidecar = HashMap::new();
        sidecar.insert("kde-linux_1.raw".to_string(), digest('f'));

        let manifest = ManifestGenerator::default()
            .with_known(known_checksums(&releases))
            .generate(&releases, &keep(&["1"]), &Sidecars(sidecar))
            .unwrap();
        assert_eq!(manifest.digests, vec![digest('a')]);
    }

    #[test]
    fn test_falls_back_to_sidecar() {
        let releases = group(vec![FakeArtifact::new("kde-linux_1.raw")]).unwrap();
        let mut sidecar = HashMap::new();
        sidecar.insert("kde-linux_1.raw".to_string(), digest('D'));

        let manifest = ManifestGenerator::default()
            .generate(&releases, &keep(&["1"]), &Sidecars(sidecar))
            .unwrap();
        assert_eq!(manifest.digests, vec![digest('d')]);
    }

    #[test]
    fn test_missing_checksum_is_fatal() {
        let releases = group(vec![FakeArtifact::new("kde-linux_1.raw")]).unwrap();
        let err = ManifestGenerator::default()
            .generate(&releases, &keep(&["1"]), &Sidecars::none())
            .unwrap_err();
        assert!(matches!(err, ManifestError::MissingChecksum { ref path } if path == "kde-linux_1.raw"));
    }

    #[test]
    fn test_sidecar_error_is_fatal() {
        let releases = group(vec![FakeArtifact::new("kde-linux_1.raw")]).unwrap();
        let err = ManifestGenerator::default()
            .generate(&releases, &keep(&["1"]), &BrokenSidecars)
            .unwrap_err();
        assert!(matches!(err, ManifestError::Sidecar { .. }));
    }

    #[test]
    fn test_invalid_digest_rejected() {
        let releases = group(vec![FakeArtifact::new("kde-linux_1.raw").with_sha256("not-a-digest")]).unwrap();
        let err = ManifestGenerator::default()
            .with_known(known_checksums(&releases))
            .generate(&releases, &keep(&["1"]), &Sidecars::none())
            .unwrap_err();
        assert!(matches!(err, ManifestError::InvalidDigest { .. }));
    }

    #[test]
    fn test_digest_normalization() {
        let upper = "2CF24DBA5FB0A30E26E83B2AC5B9E29E1B161E5C1FA7425E73043362938B9824";
        assert_eq!(normalize_digest("a", &format!("  {}\n", upper)).unwrap(), upper.to_lowercase());

        let short = digest('a')[..63].to_string();
        let long = format!("{}00", digest('a'));
        let not_hex = digest('g');
        for bad in ["", "abc", short.as_str(), long.as_str(), not_hex.as_str()] {
            assert!(
                matches!(normalize_digest("a", bad), Err(ManifestError::InvalidDigest { .. })),
                "{:?} accepted",
                bad
            );
        }
    }

    #[test]
    fn test_exclusion_rules() {
        let releases = group(vec![
            FakeArtifact::new("v3/kde-linux_2_root.erofs.caibx"),
            FakeArtifact::new("/home/kdeos/kde-linux/kdeos_2.raw"),
            FakeArtifact::new("v3/kde-linux_2_root.erofs").with_sha256(&digest('e')),
        ])
        .unwrap();

        let manifest = ManifestGenerator::default()
            .with_known(known_checksums(&releases))
            .generate(&releases, &keep(&["2"]), &Sidecars::none())
            .unwrap();
        assert_eq!(manifest.digests, vec![digest('e')]);
    }

    #[test]
    fn test_rules_are_removable() {
        let releases = group(vec![FakeArtifact::new("v3/kde-linux_2_root.erofs.caibx").with_sha256(&digest('c'))]).unwrap();
        let manifest = ManifestGenerator::new(vec![BROKEN_LEGACY_CHECKSUMS])
            .with_known(known_checksums(&releases))
            .generate(&releases, &keep(&["2"]), &Sidecars::none())
            .unwrap();
        assert_eq!(manifest.len(), 1);
        assert!(EROFS_CAIBX_SUFFIX.matches("x.erofs.caibx"));
        assert!(!EROFS_CAIBX_SUFFIX.matches("x.caibx"));
    }

    #[test]
    fn test_duplicate_and_missing_keep_ids() {
        let releases = group(vec![FakeArtifact::new("kde-linux_1.raw").with_sha256(&digest('a'))]).unwrap();
        let manifest = ManifestGenerator::default()
            .with_known(known_checksums(&releases))
            .generate(&releases, &keep(&["1", "404", "1"]), &Sidecars::none())
            .unwrap();
        assert_eq!(manifest.digests, vec![digest('a'), digest('a')]);
    }

    #[test]
    fn test_parse_sidecar() {
        let line = format!("{}  kde-linux_1.raw\n", digest('a'));
        assert_eq!(parse_sidecar(&line), Some(digest('a')));
        assert_eq!(parse_sidecar("   \n"), None);
    }

    #[test]
    fn test_render_and_write() {
        let manifest = Manifest {
            digests: vec![digest('a'), digest('b')],
        };
        assert_eq!(manifest.render(), format!("{}\n{}\n", digest('a'), digest('b')));

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("testing/sysupdate/v2").join(MANIFEST_FILENAME);
        manifest.write_to(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), manifest.render());
    }
}
