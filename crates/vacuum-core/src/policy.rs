//! Retention policy
//!
//! Keeps the newest `depth` releases plus every protected (tombstoned or
//! golden) release and marks everything else for deletion.
//!
//! Release ids are ordered as strings, descending. This matches numeric order
//! only while every id has the same number of digits: `"9"` sorts above
//! `"10"`. Published ids are fixed-width build stamps, and the existing
//! manifests and deletions were computed with this ordering, so it must not
//! be changed to numeric ordering without migrating the published trees.

use serde::{Deserialize, Serialize};
use tracing::info;

/// Number of most recent releases that are always kept.
pub const DEFAULT_RETENTION_DEPTH: usize = 4;

/// Count-based retention with a protection list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Releases kept regardless of the protection list
    #[serde(default = "default_depth")]
    pub depth: usize,
}

fn default_depth() -> usize {
    DEFAULT_RETENTION_DEPTH
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            depth: DEFAULT_RETENTION_DEPTH,
        }
    }
}

/// Outcome of a retention decision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionDecision {
    /// Newest releases followed by every protected id. May contain duplicates.
    pub keep: Vec<String>,
    /// Releases to delete, oldest first
    pub delete: Vec<String>,
}

impl RetentionDecision {
    pub fn is_empty(&self) -> bool {
        self.keep.is_empty() && self.delete.is_empty()
    }

    /// Kept ids with duplicates removed, first occurrence wins.
    pub fn unique_keep(&self) -> Vec<&str> {
        let mut seen = std::collections::HashSet::new();
        self.keep
            .iter()
            .map(String::as_str)
            .filter(|id| seen.insert(*id))
            .collect()
    }
}

impl RetentionPolicy {
    pub fn with_depth(depth: usize) -> Self {
        Self { depth }
    }

    /// Split release ids into keep and delete sets.
    ///
    /// Protected ids that fall outside the newest `depth` releases are not
    /// deleted. Every protected id is appended to `keep` afterwards, even if
    /// it is already there or does not exist in `ids`.
    pub fn decide<'a, I>(&self, ids: I, protected: &[String]) -> RetentionDecision
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut keep: Vec<String> = ids.into_iter().map(str::to_string).collect();
        if keep.is_empty() {
            info!("No releases found");
            return RetentionDecision::default();
        }

        keep.sort_unstable_by(|a, b| b.cmp(a));

        let mut delete = Vec::new();
        while keep.len() > self.depth {
            let Some(release) = keep.pop() else {
                break;
            };
            if protected.contains(&release) {
                info!(release = %release, "Protected release beyond retention depth");
            } else {
                info!(release = %release, "Marking for deletion (unless protected)");
                delete.push(release);
            }
        }

        keep.extend(protected.iter().cloned());

        RetentionDecision { keep, delete }
    }
}
