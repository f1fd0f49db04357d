//! Deletion of releases outside the retention window
//!
//! Deletion is best-effort: a failure on one artifact is logged and recorded,
//! and the remaining artifacts and releases are still processed. Nothing is
//! retried here; a rerun recomputes everything from the store.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::artifact::Artifact;
use crate::policy::RetentionDecision;
use crate::release::ReleaseSet;

/// Whether deletions are executed or only logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionMode {
    /// Log what would be deleted, touch nothing
    #[default]
    DryRun,
    /// Actually delete
    Confirmed,
}

impl DeletionMode {
    /// Interpret the value of the confirmation switch. Only `"1"` confirms.
    pub fn from_env_value(value: Option<&str>) -> Self {
        match value {
            Some("1") => DeletionMode::Confirmed,
            _ => DeletionMode::DryRun,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        matches!(self, DeletionMode::DryRun)
    }
}

/// A deletion that failed and was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionFailure {
    pub release: String,
    pub path: String,
    pub error: String,
}

/// Result of applying a retention decision.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeletionReport {
    pub mode: DeletionMode,
    /// Releases processed from the delete set
    pub releases: usize,
    /// Artifacts considered for deletion
    pub attempted: usize,
    /// Artifacts actually deleted
    pub deleted: usize,
    /// Artifacts left in place because of dry-run mode
    pub skipped: usize,
    /// Per-artifact failures (non-fatal)
    pub failures: Vec<DeletionFailure>,
}

impl DeletionReport {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn merge(&mut self, other: &DeletionReport) {
        self.releases += other.releases;
        self.attempted += other.attempted;
        self.deleted += other.deleted;
        self.skipped += other.skipped;
        self.failures.extend(other.failures.iter().cloned());
    }
}

/// Applies the delete set of a [`RetentionDecision`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DeletionExecutor {
    mode: DeletionMode,
}

impl DeletionExecutor {
    pub fn new(mode: DeletionMode) -> Self {
        Self { mode }
    }

    pub fn apply<A: Artifact>(
        &self,
        releases: &ReleaseSet<A>,
        decision: &RetentionDecision,
    ) -> DeletionReport {
        let mut report = DeletionReport {
            mode: self.mode,
            ..Default::default()
        };

        for id in &decision.delete {
            let Some(release) = releases.get(id) else {
                warn!(release = %id, "Release marked for deletion has no artifacts");
                continue;
            };

            info!(release = %id, artifacts = release.len(), "Deleting");
            report.releases += 1;

            for artifact in &release.artifacts {
                report.attempted += 1;
                info!(path = artifact.path(), "Deleting");

                match self.mode {
                    DeletionMode::DryRun => {
                        info!(path = artifact.path(), "... not really deleting");
                        report.skipped += 1;
                    }
                    DeletionMode::Confirmed => match artifact.delete() {
                        Ok(()) => report.deleted += 1,
                        Err(e) => {
                            warn!(path = artifact.path(), error = %e, "Failed to delete");
                            report.failures.push(DeletionFailure {
                                release: id.clone(),
                                path: artifact.path().to_string(),
                                error: e.to_string(),
                            });
                        }
                    },
                }
            }
        }

        for id in &decision.keep {
            info!(release = %id, "Keeping");
        }

        report
    }
}
