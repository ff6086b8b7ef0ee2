use crate::error::StoreError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt::Debug;

/// Process-wide key-value store shared by every worker.
///
/// Each method is atomic for the single key it touches. Sequences of calls are
/// not, so callers must assume any key can change between their read and their
/// write.
pub trait SharedStore: Send + Sync + Debug {
    /// Returns the value stored under `key`, if any.
    fn get(&self, key: &str) -> Option<String>;

    /// Unconditionally replaces the value under `key`.
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Adds `delta` to the integer under `key` and returns the new value.
    ///
    /// An absent key is first initialized to `init`.
    fn incr(&self, key: &str, delta: i64, init: i64) -> Result<i64, StoreError>;

    /// Replaces the value under `key` only if it currently equals `expected`
    /// (`None` meaning absent).
    ///
    /// # Returns
    /// `Ok(true)` if the value was written, `Ok(false)` if another writer got
    /// there first.
    fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> Result<bool, StoreError>;

    /// Lists up to `limit` keys, or every key when `limit` is 0. Diagnostics only.
    fn get_keys(&self, limit: usize) -> Vec<String>;
}

/// In-process [`SharedStore`] backed by a hash map.
///
/// # Fields
/// * `entries` - The stored key-value pairs.
/// * `capacity` - Maximum number of distinct keys, `None` for unbounded.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
    capacity: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that refuses to hold more than `capacity` keys.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity: Some(capacity),
        }
    }

    fn check_room(&self, entries: &HashMap<String, String>, key: &str) -> Result<(), StoreError> {
        match self.capacity {
            Some(cap) if !entries.contains_key(key) && entries.len() >= cap => {
                Err(StoreError::NoMemory {
                    key: key.to_owned(),
                })
            }
            _ => Ok(()),
        }
    }
}

impl SharedStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write();
        self.check_room(&entries, key)?;
        entries.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn incr(&self, key: &str, delta: i64, init: i64) -> Result<i64, StoreError> {
        let mut entries = self.entries.write();
        let current = match entries.get(key) {
            Some(raw) => raw.parse::<i64>().map_err(|_| StoreError::NotANumber {
                key: key.to_owned(),
            })?,
            None => {
                self.check_room(&entries, key)?;
                init
            }
        };

        let next = current.wrapping_add(delta);
        entries.insert(key.to_owned(), next.to_string());
        Ok(next)
    }

    fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> Result<bool, StoreError> {
        let mut entries = self.entries.write();
        if entries.get(key).map(String::as_str) != expected {
            return Ok(false);
        }
        self.check_room(&entries, key)?;
        entries.insert(key.to_owned(), value.to_owned());
        Ok(true)
    }

    fn get_keys(&self, limit: usize) -> Vec<String> {
        let limit = if limit == 0 { usize::MAX } else { limit };
        self.entries.read().keys().take(limit).cloned().collect()
    }
}
