//! Vacuum core
//!
//! Release retention engine for published image artifacts. Object listings
//! are grouped into numbered releases, a retention decision splits release
//! ids into keep and delete sets, the delete set is applied (or only logged
//! in dry-run mode) and a deterministic SHA-256 manifest is produced for the
//! survivors.
//!
//! Storage access is injected through the [`Artifact`] and
//! [`ChecksumSource`] traits so the engine can run against in-memory fakes.

pub mod artifact;
pub mod executor;
pub mod manifest;
pub mod policy;
pub mod release;

#[cfg(test)]
mod testing;

pub use artifact::{basename, Artifact, ArtifactError};
pub use executor::{DeletionExecutor, DeletionFailure, DeletionMode, DeletionReport};
pub use manifest::{
    known_checksums, parse_sidecar, ChecksumSource, ExclusionRule, Manifest, ManifestError,
    ManifestGenerator, Matcher, BROKEN_LEGACY_CHECKSUMS, DEFAULT_EXCLUSIONS, EROFS_CAIBX_SUFFIX,
    MANIFEST_FILENAME, SIDECAR_SUFFIX,
};
pub use policy::{RetentionDecision, RetentionPolicy, DEFAULT_RETENTION_DEPTH};
pub use release::{group, parse_release_id, GroupError, Release, ReleaseSet, RELEASE_PREFIXES};
