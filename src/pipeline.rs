//! Vacuum run orchestration
//!
//! One run processes every configured prefix in order:
//! - list the objects directly under the prefix, with metadata
//! - group them into releases
//! - decide which releases to keep
//! - delete the rest (or log them in dry-run mode)
//! - write SHA256SUMS for the kept releases, if the prefix has a manifest
//!
//! and then prunes the chunk store if configured. Any fatal error aborts the
//! run; nothing is persisted between runs, so recovering means running again.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};
use vacuum_core::{
    group, known_checksums, DeletionExecutor, DeletionMode, DeletionReport, GroupError,
    ManifestError, ManifestGenerator, RetentionDecision, RetentionPolicy, MANIFEST_FILENAME,
};

use crate::config::{ConfigError, PrefixConfig, RetentionConfig, VacuumConfig};
use crate::prune::{download_indexes, list_indexes, DesyncPruner, PruneError, Pruner};
use crate::store::{ObjectStore, StoreArtifact, StoreChecksums, StoreError};

/// Fatal vacuum errors
#[derive(Debug, Error)]
pub enum VacuumError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("listing {prefix} failed: {source}")]
    Listing {
        prefix: String,
        #[source]
        source: StoreError,
    },

    #[error("grouping {prefix} failed: {source}")]
    Grouping {
        prefix: String,
        #[source]
        source: GroupError,
    },

    #[error("manifest for {prefix} failed: {source}")]
    Manifest {
        prefix: String,
        #[source]
        source: ManifestError,
    },

    #[error("chunk store prune failed: {0}")]
    Prune(#[from] PruneError),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Outcome for one prefix.
#[derive(Debug, Clone, Serialize)]
pub struct PrefixReport {
    pub prefix: String,
    /// Release ids found, ascending
    pub releases: Vec<String>,
    pub decision: RetentionDecision,
    pub deletion: DeletionReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest_path: Option<PathBuf>,
    pub manifest_entries: usize,
}

/// Outcome of a full run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub mode: DeletionMode,
    pub protected: Vec<String>,
    pub prefixes: Vec<PrefixReport>,
    /// Chunk indexes handed to the pruner, if pruning ran (never in dry-run mode)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pruned_indexes: Option<usize>,
}

impl RunReport {
    /// Deletion totals across all prefixes.
    pub fn deletion_totals(&self) -> DeletionReport {
        let mut total = DeletionReport {
            mode: self.mode,
            ..Default::default()
        };
        for prefix in &self.prefixes {
            total.merge(&prefix.deletion);
        }
        total
    }
}

/// Runs the vacuum against one bucket.
pub struct Vacuum {
    store: Arc<dyn ObjectStore>,
    config: VacuumConfig,
    mode: DeletionMode,
    pruner: Option<Box<dyn Pruner>>,
}

impl Vacuum {
    pub fn new(store: Arc<dyn ObjectStore>, config: VacuumConfig, mode: DeletionMode) -> Self {
        let pruner = config
            .prune
            .as_ref()
            .map(|p| Box::new(DesyncPruner::new(p.program.clone())) as Box<dyn Pruner>);
        Self {
            store,
            config,
            mode,
            pruner,
        }
    }

    /// Replace the pruner used when `[prune]` is configured.
    pub fn with_pruner(mut self, pruner: Box<dyn Pruner>) -> Self {
        self.pruner = Some(pruner);
        self
    }

    fn policy(&self) -> RetentionPolicy {
        RetentionPolicy::with_depth(self.config.retention_depth)
    }

    /// Run every prefix, then prune.
    pub fn run(&self) -> Result<RunReport, VacuumError> {
        let started_at = Utc::now();
        info!(mode = ?self.mode, store = ?self.config.store_root, "Starting vacuum");

        // Configs built in code skip `VacuumConfig::build`.
        self.config.validate()?;
        self.reset_output_dir()?;

        let retention = RetentionConfig::load(self.store.as_ref(), &self.config.retention_document)?;
        let protected = retention.protected();

        let mut prefixes = Vec::with_capacity(self.config.prefixes.len());
        for prefix in &self.config.prefixes {
            prefixes.push(self.run_prefix(prefix, &protected)?);
        }

        let pruned_indexes = self.prune()?;

        let report = RunReport {
            started_at,
            finished_at: Utc::now(),
            mode: self.mode,
            protected,
            prefixes,
            pruned_indexes,
        };

        let totals = report.deletion_totals();
        if totals.has_failures() {
            warn!(failures = totals.failures.len(), "Some deletions failed; a rerun will retry them");
        }
        info!(
            deleted = totals.deleted,
            skipped = totals.skipped,
            failed = totals.failures.len(),
            "Vacuum finished"
        );
        Ok(report)
    }

    fn reset_output_dir(&self) -> Result<(), VacuumError> {
        match fs::remove_dir_all(&self.config.output_dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(VacuumError::Io {
                path: self.config.output_dir.clone(),
                source,
            }),
        }
    }

    /// Compute and apply retention for one prefix.
    pub fn run_prefix(
        &self,
        prefix: &PrefixConfig,
        protected: &[String],
    ) -> Result<PrefixReport, VacuumError> {
        info!(prefix = %prefix.path, "Loading releases");

        let listing = self
            .store
            .list(&prefix.path, false)
            .map_err(|source| VacuumError::Listing {
                prefix: prefix.path.clone(),
                source,
            })?;

        let artifacts = listing.iter().map(|info| {
            StoreArtifact::new(
                Arc::clone(&self.store),
                info,
                &self.config.checksum_metadata_key,
            )
        });
        let releases = group(artifacts).map_err(|source| {
            error!(prefix = %prefix.path, error = %source, "Unexpected release naming");
            VacuumError::Grouping {
                prefix: prefix.path.clone(),
                source,
            }
        })?;
        info!(prefix = %prefix.path, releases = releases.len(), objects = listing.len(), "Grouped releases");

        let decision = self
            .policy()
            .decide(releases.keys().map(String::as_str), protected);
        let deletion = DeletionExecutor::new(self.mode).apply(&releases, &decision);

        let mut manifest_path = None;
        let mut manifest_entries = 0;
        if prefix.manifest {
            let generator = ManifestGenerator::default().with_known(known_checksums(&releases));
            let checksums = StoreChecksums::new(Arc::clone(&self.store));
            let manifest_error = |source| VacuumError::Manifest {
                prefix: prefix.path.clone(),
                source,
            };

            let manifest = generator
                .generate(&releases, &decision.keep, &checksums)
                .map_err(manifest_error)?;
            let path = self
                .config
                .output_dir
                .join(prefix.path.trim_matches('/'))
                .join(MANIFEST_FILENAME);
            manifest.write_to(&path).map_err(manifest_error)?;

            info!(path = %path.display(), entries = manifest.len(), "Wrote manifest");
            manifest_entries = manifest.len();
            manifest_path = Some(path);
        }

        Ok(PrefixReport {
            prefix: prefix.path.clone(),
            releases: releases.keys().cloned().collect(),
            decision,
            deletion,
            manifest_path,
            manifest_entries,
        })
    }

    fn prune(&self) -> Result<Option<usize>, VacuumError> {
        let (Some(config), Some(pruner)) = (&self.config.prune, &self.pruner) else {
            return Ok(None);
        };

        if self.mode.is_dry_run() {
            let indexes = list_indexes(self.store.as_ref(), &config.index_suffix)?;
            info!(
                store = %config.store_url,
                indexes = indexes.len(),
                "... not really pruning chunk store"
            );
            return Ok(None);
        }

        let indexes = download_indexes(
            self.store.as_ref(),
            &config.index_suffix,
            &config.download_dir,
        )?;
        pruner.prune(&config.store_url, &indexes)?;
        info!(indexes = indexes.len(), "Pruned chunk store");
        Ok(Some(indexes.len()))
    }
}
