//! In-memory collaborators
//!
//! Fakes for the storage and pruner ports, used by the test suites and
//! for exercising the pipeline without a bucket.
//!
//! - [`MemoryStore`]: bucket held in memory, with per-key delete failure
//!   injection and a log of executed deletions
//! - [`RecordingPruner`]: records prune invocations and can be told to fail

mod pruner;
mod store;

pub use pruner::{PruneCall, RecordingPruner};
pub use store::MemoryStore;
