//! Shared fixtures for vacuum integration tests
//!
//! Builds a bucket that looks like the published tree: sysupdate prefixes
//! with per-release artifacts and checksum metadata, the flat image prefix,
//! and unrelated objects that must never be touched.

#![allow(dead_code)]

use std::path::Path;

use kde_linux_vacuum::config::{PrefixConfig, VacuumConfig};
use kde_linux_vacuum::mock::MemoryStore;

pub const SYSUPDATE_V2: &str = "testing/sysupdate/v2/";
pub const IMAGES: &str = "testing/";

/// A 64-char digest made of one repeated hex character.
pub fn digest(c: char) -> String {
    std::iter::repeat(c).take(64).collect()
}

/// Digest derived from a release id and an artifact index.
pub fn digest_for(id: &str, n: usize) -> String {
    format!("{:0>60}{:04x}", id, n)
}

/// Publish one sysupdate release with checksum metadata on every artifact.
pub fn publish_sysupdate_release(store: &MemoryStore, id: &str) {
    let names = [
        format!("kde-linux_{}.efi", id),
        format!("kde-linux_{}_root-x86-64.erofs", id),
        format!("kde-linux_{}_root-x86-64.erofs.caibx", id),
    ];
    for (n, name) in names.iter().enumerate() {
        let key = format!("{}{}", SYSUPDATE_V2, name);
        store.insert(&key, name.as_bytes(), Some(&digest_for(id, n)));
    }
}

/// Publish one image release without checksum metadata.
pub fn publish_image_release(store: &MemoryStore, id: &str) {
    for ext in ["raw", "torrent"] {
        let key = format!("{}kde-linux_{}.{}", IMAGES, id, ext);
        store.insert(&key, b"image", None);
    }
}

pub fn write_retention(store: &MemoryStore, yaml: &str) {
    store.insert("vacuum.yaml", yaml.as_bytes(), None);
}

/// Config over the two prefixes used in these tests, writing under `out`.
pub fn test_config(out: &Path) -> VacuumConfig {
    VacuumConfig {
        output_dir: out.join("upload-tree"),
        prefixes: vec![
            PrefixConfig::new(SYSUPDATE_V2, true),
            PrefixConfig::new(IMAGES, false),
        ],
        ..VacuumConfig::default()
    }
}
