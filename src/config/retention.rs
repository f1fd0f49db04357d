//! Protected release list
//!
//! Fetched from the bucket itself so every runner sees the same list.
//! Parsing is strict: an unknown field means the schema drifted and the run
//! must not guess which releases are protected.

use serde::{Deserialize, Deserializer, Serialize};
use tracing::info;

use super::ConfigError;
use crate::store::ObjectStore;

/// Key of the retention document in the bucket.
pub const RETENTION_DOCUMENT: &str = "vacuum.yaml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionConfig {
    /// Releases kept forever for rollback compatibility
    #[serde(default, deserialize_with = "release_ids")]
    pub tombstone_images: Vec<String>,

    /// Releases promoted as known-good
    #[serde(default, deserialize_with = "release_ids")]
    pub golden_images: Vec<String>,
}

/// Ids may be written bare (`- 202501010000`) or quoted.
#[derive(Deserialize)]
#[serde(untagged)]
enum ReleaseId {
    Text(String),
    Number(u64),
}

fn release_ids<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let ids = Option::<Vec<ReleaseId>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(ids
        .into_iter()
        .map(|id| match id {
            ReleaseId::Text(s) => s,
            ReleaseId::Number(n) => n.to_string(),
        })
        .collect())
}

impl RetentionConfig {
    /// Parse a retention document.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Err(ConfigError::Empty(RETENTION_DOCUMENT.to_string()));
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Fetch and parse the retention document from the store.
    pub fn load(store: &dyn ObjectStore, key: &str) -> Result<Self, ConfigError> {
        let bytes = store.get(key)?;
        let content = String::from_utf8(bytes).map_err(|e| ConfigError::Validation(format!(
            "{} is not valid UTF-8: {}",
            key, e
        )))?;
        let config = Self::parse(&content)?;
        info!(
            key,
            tombstones = config.tombstone_images.len(),
            golden = config.golden_images.len(),
            "Loaded retention document"
        );
        Ok(config)
    }

    /// Every protected id: tombstones first, then golden images.
    pub fn protected(&self) -> Vec<String> {
        self.tombstone_images
            .iter()
            .chain(self.golden_images.iter())
            .cloned()
            .collect()
    }
}
