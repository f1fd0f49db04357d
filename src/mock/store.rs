//! In-memory object store.

use std::collections::{BTreeMap, HashSet};
use std::io::{self, Write};
use std::sync::Mutex;

use crate::store::{
    is_direct_child, ObjectInfo, ObjectStore, ObjectWriter, StoreError, CHECKSUM_METADATA_KEY,
};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    metadata: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<String, StoredObject>,
    failing_deletes: HashSet<String>,
    failing_gets: HashSet<String>,
    deleted: Vec<String>,
}

/// Bucket held in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Add an object, optionally with an upload-time checksum header.
    pub fn insert(&self, key: &str, data: &[u8], sha256: Option<&str>) {
        let mut metadata = BTreeMap::new();
        if let Some(sum) = sha256 {
            metadata.insert(CHECKSUM_METADATA_KEY.to_string(), sum.to_string());
        }
        self.state().objects.insert(
            key.to_string(),
            StoredObject {
                data: data.to_vec(),
                metadata,
            },
        );
    }

    /// Make every delete of `key` fail.
    pub fn fail_delete(&self, key: &str) {
        self.state().failing_deletes.insert(key.to_string());
    }

    /// Make every get of `key` fail with a backend error.
    pub fn fail_get(&self, key: &str) {
        self.state().failing_gets.insert(key.to_string());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state().objects.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.state().objects.keys().cloned().collect()
    }

    /// Keys deleted so far, in order.
    pub fn deleted(&self) -> Vec<String> {
        self.state().deleted.clone()
    }

    pub fn metadata_of(&self, key: &str) -> Option<BTreeMap<String, String>> {
        self.state().objects.get(key).map(|o| o.metadata.clone())
    }
}

/// Buffered upload, stored on commit.
struct MemoryWriter<'a> {
    store: &'a MemoryStore,
    key: String,
    data: Vec<u8>,
}

impl Write for MemoryWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ObjectWriter for MemoryWriter<'_> {
    fn commit(self: Box<Self>, metadata: BTreeMap<String, String>) -> Result<u64, StoreError> {
        let size = self.data.len() as u64;
        self.store.put(&self.key, &self.data, metadata)?;
        Ok(size)
    }
}

impl ObjectStore for MemoryStore {
    fn list(&self, prefix: &str, recursive: bool) -> Result<Vec<ObjectInfo>, StoreError> {
        Ok(self
            .state()
            .objects
            .iter()
            .filter(|(key, _)| {
                if recursive {
                    key.starts_with(prefix)
                } else {
                    is_direct_child(prefix, key)
                }
            })
            .map(|(key, object)| ObjectInfo {
                key: key.clone(),
                size: object.data.len() as u64,
                user_metadata: object.metadata.clone(),
            })
            .collect())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let state = self.state();
        if state.failing_gets.contains(key) {
            return Err(StoreError::Backend(format!("injected get failure for {}", key)));
        }
        state
            .objects
            .get(key)
            .map(|o| o.data.clone())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    fn put(
        &self,
        key: &str,
        data: &[u8],
        metadata: BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        self.state().objects.insert(
            key.to_string(),
            StoredObject {
                data: data.to_vec(),
                metadata,
            },
        );
        Ok(())
    }

    fn put_writer(&self, key: &str) -> Result<Box<dyn ObjectWriter + '_>, StoreError> {
        Ok(Box::new(MemoryWriter {
            store: self,
            key: key.to_string(),
            data: Vec::new(),
        }))
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut state = self.state();
        if state.failing_deletes.contains(key) {
            return Err(StoreError::Backend(format!("injected delete failure for {}", key)));
        }
        if state.objects.remove(key).is_none() {
            return Err(StoreError::NotFound(key.to_string()));
        }
        state.deleted.push(key.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_injected_delete_failure() {
        let store = MemoryStore::new();
        store.insert("a", b"1", None);
        store.fail_delete("a");

        assert!(matches!(store.delete("a"), Err(StoreError::Backend(_))));
        assert!(store.contains("a"));
        assert!(store.deleted().is_empty());
    }

    #[test]
    fn test_listing_modes() {
        let store = MemoryStore::new();
        store.insert("p/a", b"1", None);
        store.insert("p/q/b", b"2", None);

        assert_eq!(store.list("p/", false).unwrap().len(), 1);
        assert_eq!(store.list("p/", true).unwrap().len(), 2);
    }
}
