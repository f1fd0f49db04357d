//! KDE Linux upload vacuum
//!
//! Garbage collection for published image builds. Each prefix of the bucket
//! keeps its newest releases plus every protected release; everything else
//! is deleted (only when confirmed) and a SHA256SUMS manifest is written for
//! what remains. The retention engine itself lives in `vacuum-core`; this
//! crate wires it to an object store, the retention document, the chunk
//! store pruner and the command line.

pub mod config;
pub mod mock;
pub mod pipeline;
pub mod prune;
pub mod store;
pub mod timeout;
pub mod upload;

pub use config::{deletion_mode_from_env, RetentionConfig, VacuumConfig, CONFIRM_ENV};
pub use pipeline::{PrefixReport, RunReport, Vacuum, VacuumError};
pub use prune::{DesyncPruner, Pruner};
pub use store::{FsStore, ObjectInfo, ObjectStore, ObjectWriter, StoreError, CHECKSUM_METADATA_KEY};
pub use vacuum_core::{DeletionMode, RetentionPolicy};
