use parking_lot::RwLock;
use std::collections::BTreeMap;

use super::{KeyValueStore, StoreError};

/// In-process store, optionally capped to emulate a host storage quota.
#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<BTreeMap<String, String>>,
    hard_limit: Option<u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that rejects any growing `set` that leaves the total above `bytes`.
    pub fn with_hard_limit(bytes: u64) -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
            hard_limit: Some(bytes),
        }
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

fn occupied(data: &BTreeMap<String, String>) -> u64 {
    data.iter().map(|(k, v)| (k.len() + v.len()) as u64).sum()
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.data.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut data = self.data.write();
        if let Some(limit) = self.hard_limit {
            let current = data.get(key).map_or(0, |v| (key.len() + v.len()) as u64);
            let next = (key.len() + value.len()) as u64;
            let total = occupied(&data) - current + next;
            if total > limit && next > current {
                return Err(StoreError::QuotaExceeded);
            }
        }
        data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.data.write().remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.data
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect()
    }

    fn estimate_size(&self) -> u64 {
        occupied(&self.data.read())
    }
}
