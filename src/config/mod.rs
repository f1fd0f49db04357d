//! Vacuum configuration
//!
//! Two documents drive a run:
//! - the run configuration (`vacuum.toml`, local): store location, prefixes
//!   to clean, retention depth, output directory and chunk store pruning
//! - the retention document (`vacuum.yaml`, fetched from the bucket): the
//!   tombstoned and golden release ids that must never be deleted
//!
//! The run configuration is layered: built-in defaults, then the file, then
//! CLI overrides. Objects merge by key, arrays and scalars are replaced.

mod layers;
mod retention;
mod vacuum;

pub use layers::{deep_merge, merge_layers};
pub use retention::{RetentionConfig, RETENTION_DOCUMENT};
pub use vacuum::{
    deletion_mode_from_env, ConfigError, PrefixConfig, PruneConfig, VacuumConfig, CONFIRM_ENV,
    DEFAULT_CONFIG_PATH,
};
