//! Run configuration (`vacuum.toml`)

use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use vacuum_core::{DeletionMode, DEFAULT_RETENTION_DEPTH};

use super::layers::merge_layers;
use super::retention::RETENTION_DOCUMENT;
use crate::store::{StoreError, CHECKSUM_METADATA_KEY};

/// Default location of the run configuration.
pub const DEFAULT_CONFIG_PATH: &str = "vacuum.toml";

/// Environment switch that turns a dry run into a real one. Only `1` confirms.
pub const CONFIRM_ENV: &str = "VACUUM_REALLY_DELETE";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to fetch configuration: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration document {0} is empty")]
    Empty(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// A storage prefix holding releases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrefixConfig {
    /// Key prefix, ending in `/`
    pub path: String,

    /// Whether a SHA256SUMS manifest is generated for the kept releases
    #[serde(default)]
    pub manifest: bool,
}

impl PrefixConfig {
    pub fn new(path: impl Into<String>, manifest: bool) -> Self {
        Self {
            path: path.into(),
            manifest,
        }
    }
}

/// Chunk store pruning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PruneConfig {
    #[serde(default = "default_prune_program")]
    pub program: String,

    /// Store URL passed to the pruner
    pub store_url: String,

    #[serde(default = "default_index_suffix")]
    pub index_suffix: String,

    /// Local directory indexes are downloaded to
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
}

fn default_prune_program() -> String {
    "desync".to_string()
}

fn default_index_suffix() -> String {
    ".caibx".to_string()
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("caibx-files")
}

/// Run configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VacuumConfig {
    /// Directory acting as the bucket
    pub store_root: PathBuf,

    /// Key of the retention document in the bucket
    pub retention_document: String,

    /// Newest releases always kept
    pub retention_depth: usize,

    /// Where manifests are written, one subdirectory per prefix
    pub output_dir: PathBuf,

    /// Metadata header holding upload-time checksums
    pub checksum_metadata_key: String,

    /// Prefixes processed in order
    #[serde(rename = "prefix")]
    pub prefixes: Vec<PrefixConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prune: Option<PruneConfig>,
}

impl Default for VacuumConfig {
    fn default() -> Self {
        Self {
            store_root: PathBuf::from("bucket"),
            retention_document: RETENTION_DOCUMENT.to_string(),
            retention_depth: DEFAULT_RETENTION_DEPTH,
            output_dir: PathBuf::from("upload-tree"),
            checksum_metadata_key: CHECKSUM_METADATA_KEY.to_string(),
            prefixes: vec![
                PrefixConfig::new("testing/sysupdate/v2/", true),
                PrefixConfig::new("testing/sysupdate/v3/", true),
                PrefixConfig::new("testing/", false),
            ],
            prune: None,
        }
    }
}

impl VacuumConfig {
    /// Build the configuration from defaults, an optional file and CLI overrides.
    ///
    /// A missing file at the default location is not an error; a missing
    /// file that was asked for explicitly is.
    pub fn build(path: Option<&Path>, overrides: Option<Value>) -> Result<Self, ConfigError> {
        let mut layers = vec![serde_json::to_value(Self::default())?];

        let (file, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };
        if required || file.exists() {
            layers.push(Self::load_toml(&file)?);
        }

        if let Some(cli) = overrides {
            layers.push(cli);
        }

        let config: VacuumConfig = serde_json::from_value(merge_layers(layers))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document on top of the defaults.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let file: Value = toml::from_str(content)?;
        let config: VacuumConfig =
            serde_json::from_value(merge_layers(vec![serde_json::to_value(Self::default())?, file]))?;
        config.validate()?;
        Ok(config)
    }

    fn load_toml(path: &Path) -> Result<Value, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retention_depth == 0 {
            return Err(ConfigError::Validation(
                "retention_depth must be at least 1".to_string(),
            ));
        }
        if self.retention_document.is_empty() {
            return Err(ConfigError::Validation(
                "retention_document must not be empty".to_string(),
            ));
        }
        if self.checksum_metadata_key.is_empty() {
            return Err(ConfigError::Validation(
                "checksum_metadata_key must not be empty".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for prefix in &self.prefixes {
            if prefix.path.is_empty() {
                return Err(ConfigError::Validation("prefix path must not be empty".to_string()));
            }
            if !prefix.path.ends_with('/') {
                return Err(ConfigError::Validation(format!(
                    "prefix '{}' must end with '/'",
                    prefix.path
                )));
            }
            if !seen.insert(prefix.path.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate prefix '{}'",
                    prefix.path
                )));
            }
        }

        if let Some(prune) = &self.prune {
            if prune.store_url.is_empty() {
                return Err(ConfigError::Validation("prune.store_url must not be empty".to_string()));
            }
            if prune.program.is_empty() {
                return Err(ConfigError::Validation("prune.program must not be empty".to_string()));
            }
        }

        self.validate_scratch_dirs()
    }

    /// `output_dir` and `prune.download_dir` are removed at the start of every
    /// run, dry runs included. Neither may overlap the bucket or each other.
    fn validate_scratch_dirs(&self) -> Result<(), ConfigError> {
        if self.store_root.as_os_str().is_empty() {
            return Err(ConfigError::Validation("store_root must not be empty".to_string()));
        }
        let store_root = absolute(&self.store_root)?;

        let mut scratch = vec![("output_dir", &self.output_dir)];
        if let Some(prune) = &self.prune {
            scratch.push(("prune.download_dir", &prune.download_dir));
        }

        let mut checked: Vec<(&str, PathBuf)> = Vec::new();
        for (name, dir) in scratch {
            let is_cwd = dir.components().all(|c| matches!(c, Component::CurDir));
            if is_cwd {
                return Err(ConfigError::Validation(format!(
                    "{} must name a dedicated directory, got '{}'",
                    name,
                    dir.display()
                )));
            }

            let dir = absolute(dir)?;
            if !dir.components().any(|c| matches!(c, Component::Normal(_))) {
                return Err(ConfigError::Validation(format!(
                    "{} must not be the filesystem root",
                    name
                )));
            }
            if overlaps(&dir, &store_root) {
                return Err(ConfigError::Validation(format!(
                    "{} '{}' overlaps store_root '{}'",
                    name,
                    dir.display(),
                    store_root.display()
                )));
            }
            for (other, other_dir) in &checked {
                if overlaps(&dir, other_dir) {
                    return Err(ConfigError::Validation(format!(
                        "{} '{}' overlaps {} '{}'",
                        name,
                        dir.display(),
                        other,
                        other_dir.display()
                    )));
                }
            }
            checked.push((name, dir));
        }

        Ok(())
    }
}

/// Lexically normalized absolute form of `path`, relative to the working
/// directory. The path does not have to exist.
fn absolute(path: &Path) -> Result<PathBuf, ConfigError> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        let cwd = std::env::current_dir().map_err(|source| ConfigError::Io {
            path: PathBuf::from("."),
            source,
        })?;
        cwd.join(path)
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    Ok(normalized)
}

/// Whether one path equals or contains the other.
fn overlaps(a: &Path, b: &Path) -> bool {
    a.starts_with(b) || b.starts_with(a)
}

/// Read the confirmation switch from the process environment.
pub fn deletion_mode_from_env() -> DeletionMode {
    DeletionMode::from_env_value(std::env::var(CONFIRM_ENV).ok().as_deref())
}
