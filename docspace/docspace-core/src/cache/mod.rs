//! Local persistent cache of per-location entry lists.
//!
//! Buckets live under the `entries:` namespace of an injected
//! [`KeyValueStore`]; trashed folder subtrees are parked under `parked:`.
//! Every write is checked against a byte ceiling. When a write does not fit,
//! the trash bucket is trimmed oldest-first (never below a minimum retained
//! count) and the write is retried exactly once.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{Result, WorkspaceError};
use crate::model::{Entry, TRASH_KEY};

pub const ENTRIES_PREFIX: &str = "entries:";
pub const PARKED_PREFIX: &str = "parked:";

/// Synchronous key/value backend.
///
/// Sizes are `key.len() + value.len()` in UTF-8 bytes.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> std::result::Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> std::result::Result<(), StoreError>;
    fn remove(&self, key: &str) -> std::result::Result<(), StoreError>;
    fn keys_with_prefix(&self, prefix: &str) -> Vec<String>;
    /// Total occupied bytes across all keys.
    fn estimate_size(&self) -> u64;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage quota exceeded")]
    QuotaExceeded,
    #[error("storage I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of a successful write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReceipt {
    /// Trash entries dropped to make room, in their stored order.
    pub evicted: Vec<Entry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheUsage {
    pub occupied_bytes: u64,
    pub quota_bytes: u64,
    pub buckets: usize,
}

impl CacheUsage {
    pub fn format_size(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
        let mut size = bytes as f64;
        let mut unit_index = 0;

        while size >= 1024.0 && unit_index < UNITS.len() - 1 {
            size /= 1024.0;
            unit_index += 1;
        }

        format!("{:.2} {}", size, UNITS[unit_index])
    }

    pub fn percent_used(&self) -> f64 {
        if self.quota_bytes == 0 {
            return 100.0;
        }
        self.occupied_bytes as f64 / self.quota_bytes as f64 * 100.0
    }

    pub fn summary(&self) -> String {
        format!(
            "{} of {} used ({:.1}%) across {} locations",
            Self::format_size(self.occupied_bytes),
            Self::format_size(self.quota_bytes),
            self.percent_used(),
            self.buckets
        )
    }
}

/// A trashed folder's cached subtree, keyed by its former location keys.
#[derive(Debug, Serialize, Deserialize)]
struct ParkedSubtree {
    root: String,
    buckets: BTreeMap<String, Vec<Entry>>,
}

pub struct LocalCache {
    store: Arc<dyn KeyValueStore>,
    quota_bytes: u64,
    min_trash_retained: usize,
}

fn bucket_key(location_key: &str) -> String {
    format!("{}{}", ENTRIES_PREFIX, location_key)
}

fn parked_key(entry_id: &str) -> String {
    format!("{}{}", PARKED_PREFIX, entry_id)
}

fn footprint(key: &str, value: &str) -> u64 {
    (key.len() + value.len()) as u64
}

fn encode(entries: &[Entry]) -> Result<String> {
    serde_json::to_string(entries).map_err(|e| WorkspaceError::Cache(e.to_string()))
}

fn store_err(e: StoreError) -> WorkspaceError {
    match e {
        StoreError::QuotaExceeded => WorkspaceError::Cache("store quota exceeded".to_string()),
        StoreError::Io(e) => WorkspaceError::Cache(e.to_string()),
    }
}

/// Remove the oldest entries (by `deleted_at`, missing stamps first) until
/// `fits` accepts the list or only `min_retained` remain. Ids in `protected`
/// are never removed. Survivors keep their relative order.
fn trim_oldest<F>(
    entries: &mut Vec<Entry>,
    min_retained: usize,
    protected: &HashSet<&str>,
    mut fits: F,
) -> Result<Vec<Entry>>
where
    F: FnMut(&[Entry]) -> Result<bool>,
{
    let mut evicted = Vec::new();
    while entries.len() > min_retained && !fits(entries.as_slice())? {
        let oldest = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| !protected.contains(e.id.as_str()))
            .min_by_key(|(_, e)| e.deleted_at)
            .map(|(i, _)| i);
        match oldest {
            Some(i) => evicted.push(entries.remove(i)),
            None => break,
        }
    }
    Ok(evicted)
}

impl LocalCache {
    pub fn new(store: Arc<dyn KeyValueStore>, quota_bytes: u64, min_trash_retained: usize) -> Self {
        Self {
            store,
            quota_bytes,
            min_trash_retained,
        }
    }

    pub fn quota_bytes(&self) -> u64 {
        self.quota_bytes
    }

    /// Entries cached for a location; missing or undecodable buckets read as empty.
    pub fn read(&self, location_key: &str) -> Result<Vec<Entry>> {
        let key = bucket_key(location_key);
        let Some(value) = self.store.get(&key).map_err(store_err)? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str(&value) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                warn!("Discarding undecodable cache bucket {}: {}", location_key, e);
                Ok(Vec::new())
            }
        }
    }

    /// Quota-aware write of a location bucket.
    ///
    /// A write that does not grow the bucket is always let through. On
    /// `QuotaExceeded` the stored value of `location_key` is unchanged,
    /// although trash eviction performed along the way stays persisted.
    pub fn write(&self, location_key: &str, entries: &[Entry]) -> Result<WriteReceipt> {
        self.write_protected(location_key, entries, &HashSet::new())
    }

    /// [`LocalCache::write`] that never evicts trash records whose id is in
    /// `protected`, whether they sit in the stored trash or in `entries`.
    pub fn write_protected(
        &self,
        location_key: &str,
        entries: &[Entry],
        protected: &HashSet<&str>,
    ) -> Result<WriteReceipt> {
        let key = bucket_key(location_key);
        let mut entries = entries.to_vec();
        let value = encode(&entries)?;
        let needed = footprint(&key, &value);

        let mut rejected = false;
        if self.fits(&key, needed, self.quota_bytes)? {
            match self.store.set(&key, &value) {
                Ok(()) => return Ok(WriteReceipt::default()),
                Err(StoreError::QuotaExceeded) => {
                    debug!("Store rejected {} ({} bytes), evicting trash", location_key, needed);
                    rejected = true;
                }
                Err(e) => return Err(store_err(e)),
            }
        }

        // The store's own limit is unknown; assume it is full at current occupancy.
        let ceiling = if rejected {
            self.quota_bytes.min(self.store.estimate_size())
        } else {
            self.quota_bytes
        };

        let evicted = if location_key == TRASH_KEY {
            let budget = self.available(&key, ceiling)?;
            let current = self.stored_size(&key)?;
            trim_oldest(&mut entries, self.min_trash_retained, protected, |list| {
                let bytes = footprint(&key, &encode(list)?);
                Ok(bytes <= budget.max(current))
            })?
        } else {
            self.evict_trash(&key, needed, ceiling, protected)?
        };

        if !evicted.is_empty() {
            info!("Evicted {} trash entries to fit {}", evicted.len(), location_key);
            for entry in &evicted {
                self.drop_parked(&entry.id)?;
            }
        }

        let value = encode(&entries)?;
        let needed = footprint(&key, &value);
        let available = self.available(&key, self.quota_bytes)?;
        let quota_err = |available| WorkspaceError::QuotaExceeded {
            key: location_key.to_string(),
            needed,
            available,
        };
        if !self.fits(&key, needed, self.quota_bytes)? {
            warn!("Cache write for {} abandoned: {} > {} bytes", location_key, needed, available);
            return Err(quota_err(available));
        }
        match self.store.set(&key, &value) {
            Ok(()) => Ok(WriteReceipt { evicted }),
            Err(StoreError::QuotaExceeded) => {
                warn!("Store rejected {} after eviction", location_key);
                Err(quota_err(available))
            }
            Err(e) => Err(store_err(e)),
        }
    }

    /// Trim the stored trash bucket until `needed` bytes fit under `ceiling`
    /// for `target`, persisting the shrunk bucket.
    fn evict_trash(
        &self,
        target: &str,
        needed: u64,
        ceiling: u64,
        protected: &HashSet<&str>,
    ) -> Result<Vec<Entry>> {
        let trash_key = bucket_key(TRASH_KEY);
        let mut trash = self.read(TRASH_KEY)?;
        if trash.len() <= self.min_trash_retained {
            return Ok(Vec::new());
        }
        let occupied = self.store.estimate_size();
        let others = occupied
            .saturating_sub(self.stored_size(target)?)
            .saturating_sub(self.stored_size(&trash_key)?);

        let evicted = trim_oldest(&mut trash, self.min_trash_retained, protected, |list| {
            let trash_bytes = footprint(&trash_key, &encode(list)?);
            Ok(others + needed + trash_bytes <= ceiling)
        })?;
        if !evicted.is_empty() {
            self.store
                .set(&trash_key, &encode(&trash)?)
                .map_err(store_err)?;
        }
        Ok(evicted)
    }

    /// Whether `needed` bytes for `key` fit under `ceiling`. Not growing
    /// what `key` already holds always fits.
    fn fits(&self, key: &str, needed: u64, ceiling: u64) -> Result<bool> {
        Ok(needed <= self.stored_size(key)? || needed <= self.available(key, ceiling)?)
    }

    fn stored_size(&self, key: &str) -> Result<u64> {
        Ok(self
            .store
            .get(key)
            .map_err(store_err)?
            .map_or(0, |v| footprint(key, &v)))
    }

    /// Bytes left under `ceiling` for `key`, not counting what `key` already holds.
    fn available(&self, key: &str, ceiling: u64) -> Result<u64> {
        let occupied = self.store.estimate_size().saturating_sub(self.stored_size(key)?);
        Ok(ceiling.saturating_sub(occupied))
    }

    pub fn remove(&self, location_key: &str) -> Result<()> {
        self.store.remove(&bucket_key(location_key)).map_err(store_err)
    }

    /// Every cached location key, sorted.
    pub fn location_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .store
            .keys_with_prefix(ENTRIES_PREFIX)
            .into_iter()
            .filter_map(|k| k.strip_prefix(ENTRIES_PREFIX).map(str::to_string))
            .collect();
        keys.sort();
        keys
    }

    pub fn usage(&self) -> CacheUsage {
        CacheUsage {
            occupied_bytes: self.store.estimate_size(),
            quota_bytes: self.quota_bytes,
            buckets: self.location_keys().len(),
        }
    }

    /// Move the buckets at and below `folder_key` under `parked:<entry_id>`.
    ///
    /// Returns the number of buckets parked.
    pub fn park_subtree(&self, entry_id: &str, folder_key: &str) -> Result<usize> {
        let nested = format!("{}/", folder_key);
        let mut buckets = BTreeMap::new();
        for key in self.location_keys() {
            if key == folder_key || key.starts_with(&nested) {
                buckets.insert(key.clone(), self.read(&key)?);
            }
        }
        if buckets.is_empty() {
            return Ok(0);
        }

        let parked = ParkedSubtree {
            root: folder_key.to_string(),
            buckets,
        };
        let key = parked_key(entry_id);
        let value = serde_json::to_string(&parked).map_err(|e| WorkspaceError::Cache(e.to_string()))?;
        let needed = footprint(&key, &value);
        let mut released = 0;
        for location_key in parked.buckets.keys() {
            released += self.stored_size(&bucket_key(location_key))?;
        }
        let available = self.available(&key, self.quota_bytes)? + released;
        if needed > available {
            return Err(WorkspaceError::QuotaExceeded {
                key: key.clone(),
                needed,
                available,
            });
        }
        self.store.set(&key, &value).map_err(store_err)?;
        for key in parked.buckets.keys() {
            self.remove(key)?;
        }
        debug!("Parked {} buckets below {}", parked.buckets.len(), folder_key);
        Ok(parked.buckets.len())
    }

    /// Bring a parked subtree back, rebased onto `new_root` when given.
    ///
    /// Returns the number of buckets restored.
    pub fn unpark_subtree(&self, entry_id: &str, new_root: Option<&str>) -> Result<usize> {
        let key = parked_key(entry_id);
        let Some(value) = self.store.get(&key).map_err(store_err)? else {
            return Ok(0);
        };
        let parked: ParkedSubtree = match serde_json::from_str(&value) {
            Ok(parked) => parked,
            Err(e) => {
                warn!("Dropping undecodable parked subtree {}: {}", entry_id, e);
                self.store.remove(&key).map_err(store_err)?;
                return Ok(0);
            }
        };

        let root = new_root.unwrap_or(&parked.root);
        let count = parked.buckets.len();
        for (old_key, mut entries) in parked.buckets {
            let suffix = old_key.strip_prefix(parked.root.as_str()).unwrap_or("");
            let rebased = format!("{}{}", root, suffix);
            for entry in &mut entries {
                entry.path = rebased.clone();
            }
            self.write(&rebased, &entries)?;
        }
        self.store.remove(&key).map_err(store_err)?;
        debug!("Unparked {} buckets onto {}", count, root);
        Ok(count)
    }

    pub fn drop_parked(&self, entry_id: &str) -> Result<()> {
        self.store.remove(&parked_key(entry_id)).map_err(store_err)
    }

    pub fn has_parked(&self, entry_id: &str) -> bool {
        matches!(self.store.get(&parked_key(entry_id)), Ok(Some(_)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::EntryKind;
    use chrono::{Duration, TimeZone, Utc};

    pub(crate) fn file(id: &str, path: &str) -> Entry {
        Entry {
            id: id.to_string(),
            name: format!("{}.txt", id),
            kind: EntryKind::File,
            size: 10,
            last_modified: Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
            owner: "ana".to_string(),
            path: path.to_string(),
            original_path: None,
            deleted_at: None,
            content: None,
        }
    }

    /// Ten trashed entries, newest first.
    fn trash_entries() -> Vec<Entry> {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..10)
            .rev()
            .map(|i| {
                let mut e = file(&format!("t{}", i), TRASH_KEY);
                e.original_path = Some("office".to_string());
                e.deleted_at = Some(base + Duration::minutes(i));
                e
            })
            .collect()
    }

    fn seed_trash(store: &MemoryStore, trash: &[Entry]) {
        store
            .set(&bucket_key(TRASH_KEY), &encode(trash).unwrap())
            .unwrap();
    }

    #[test]
    fn round_trip_preserves_order() {
        let cache = LocalCache::new(Arc::new(MemoryStore::new()), 1 << 20, 50);
        let entries = vec![file("b", "office"), file("a", "office"), file("c", "office")];
        let receipt = cache.write("office", &entries).unwrap();
        assert!(receipt.evicted.is_empty());
        assert_eq!(cache.read("office").unwrap(), entries);
        assert_eq!(cache.location_keys(), vec!["office".to_string()]);
    }

    #[test]
    fn missing_and_corrupt_buckets_read_empty() {
        let store = Arc::new(MemoryStore::new());
        store.set("entries:shared", "{broken").unwrap();
        let cache = LocalCache::new(store, 1 << 20, 50);
        assert!(cache.read("office").unwrap().is_empty());
        assert!(cache.read("shared").unwrap().is_empty());
    }

    #[test]
    fn quota_failure_keeps_trash_above_minimum() {
        let store = Arc::new(MemoryStore::new());
        let trash = trash_entries();
        seed_trash(&store, &trash);
        let cache = LocalCache::new(store.clone(), 100, 50);

        let err = cache.write("office", &[file("n", "office")]).unwrap_err();
        assert!(matches!(err, WorkspaceError::QuotaExceeded { .. }));
        assert_eq!(cache.read(TRASH_KEY).unwrap(), trash);
        assert!(store.get("entries:office").unwrap().is_none());
    }

    #[test]
    fn quota_failure_evicts_oldest_down_to_minimum() {
        let store = Arc::new(MemoryStore::new());
        let trash = trash_entries();
        seed_trash(&store, &trash);
        let cache = LocalCache::new(store.clone(), 100, 3);
        assert!(cache.write("office", &[]).is_err());

        let survivors = cache.read(TRASH_KEY).unwrap();
        let ids: Vec<&str> = survivors.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["t9", "t8", "t7"]);
        assert!(store.get("entries:office").unwrap().is_none());
    }

    #[test]
    fn eviction_stops_once_the_write_fits() {
        let store = Arc::new(MemoryStore::new());
        let trash = trash_entries();
        seed_trash(&store, &trash);

        let target = vec![file("n", "office")];
        let target_bytes = footprint("entries:office", &encode(&target).unwrap());
        let kept = &trash[..6];
        let quota = footprint("entries:trash", &encode(kept).unwrap()) + target_bytes;
        let cache = LocalCache::new(store, quota, 2);

        let receipt = cache.write("office", &target).unwrap();
        let evicted: Vec<&str> = receipt.evicted.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(evicted, vec!["t0", "t1", "t2", "t3"]);
        assert_eq!(cache.read(TRASH_KEY).unwrap(), kept.to_vec());
        assert_eq!(cache.read("office").unwrap(), target);
    }

    #[test]
    fn trash_write_trims_incoming_list() {
        let trash = trash_entries();
        let kept = &trash[..4];
        let quota = footprint("entries:trash", &encode(kept).unwrap());
        let cache = LocalCache::new(Arc::new(MemoryStore::new()), quota, 1);

        let receipt = cache.write(TRASH_KEY, &trash).unwrap();
        assert_eq!(receipt.evicted.len(), 6);
        assert_eq!(cache.read(TRASH_KEY).unwrap(), kept.to_vec());
    }

    #[test]
    fn store_rejection_triggers_eviction_and_retry() {
        let trash = trash_entries();
        let trash_bytes = footprint("entries:trash", &encode(&trash).unwrap());
        let store = Arc::new(MemoryStore::with_hard_limit(trash_bytes));
        seed_trash(&store, &trash);
        let cache = LocalCache::new(store, 1 << 20, 1);

        let target = vec![file("n", "office")];
        let receipt = cache.write("office", &target).unwrap();
        assert!(!receipt.evicted.is_empty());
        assert_eq!(cache.read("office").unwrap(), target);
    }

    #[test]
    fn parked_subtree_moves_and_rebases() {
        let cache = LocalCache::new(Arc::new(MemoryStore::new()), 1 << 20, 50);
        cache.write("office/Docs_1", &[file("a", "office/Docs_1")]).unwrap();
        cache
            .write("office/Docs_1/Inner_2", &[file("b", "office/Docs_1/Inner_2")])
            .unwrap();
        cache.write("office/Docs_10", &[file("c", "office/Docs_10")]).unwrap();

        assert_eq!(cache.park_subtree("1", "office/Docs_1").unwrap(), 2);
        assert_eq!(cache.location_keys(), vec!["office/Docs_10".to_string()]);
        assert!(cache.has_parked("1"));

        assert_eq!(cache.unpark_subtree("1", Some("office/Docs_1")).unwrap(), 2);
        let inner = cache.read("office/Docs_1/Inner_2").unwrap();
        assert_eq!(inner[0].id, "b");
        assert!(!cache.has_parked("1"));
    }

    #[test]
    fn unpark_onto_new_root() {
        let cache = LocalCache::new(Arc::new(MemoryStore::new()), 1 << 20, 50);
        cache
            .write("shared/Docs_1/Inner_2", &[file("b", "shared/Docs_1/Inner_2")])
            .unwrap();
        cache.park_subtree("1", "shared/Docs_1").unwrap();
        cache.unpark_subtree("1", Some("office/Docs_1")).unwrap();
        let moved = cache.read("office/Docs_1/Inner_2").unwrap();
        assert_eq!(moved[0].path, "office/Docs_1/Inner_2");
        assert_eq!(cache.unpark_subtree("1", None).unwrap(), 0);
    }

    #[test]
    fn shrinking_write_passes_over_quota() {
        let store = Arc::new(MemoryStore::new());
        let roomy = LocalCache::new(store.clone(), 1 << 20, 50);
        roomy.write("office", &[file("a", "office"), file("b", "office")]).unwrap();
        roomy.write("shared", &[file("s", "shared")]).unwrap();

        let cache = LocalCache::new(store, 32, 50);
        cache.write("office", &[file("b", "office")]).unwrap();
        assert_eq!(cache.read("office").unwrap(), vec![file("b", "office")]);
        assert!(matches!(
            cache.write("office", &[file("b", "office"), file("c", "office")]),
            Err(WorkspaceError::QuotaExceeded { .. })
        ));
    }

    #[test]
    fn trash_write_never_evicts_protected_records() {
        let trash = trash_entries();
        let quota = footprint("entries:trash", &encode(&trash[..2]).unwrap());
        let cache = LocalCache::new(Arc::new(MemoryStore::new()), quota, 0);

        // t0 and t1 are the oldest; protecting them forces the newer ones out.
        let protected: HashSet<&str> = ["t0", "t1"].into_iter().collect();
        let receipt = cache.write_protected(TRASH_KEY, &trash, &protected).unwrap();
        assert_eq!(receipt.evicted.len(), 8);
        let kept: Vec<String> = cache.read(TRASH_KEY).unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(kept, vec!["t1", "t0"]);

        let everything: HashSet<&str> = trash.iter().map(|e| e.id.as_str()).collect();
        let err = cache.write_protected(TRASH_KEY, &trash, &everything).unwrap_err();
        assert!(matches!(err, WorkspaceError::QuotaExceeded { .. }));
        assert_eq!(cache.read(TRASH_KEY).unwrap().len(), 2);
    }

    #[test]
    fn parking_respects_quota() {
        let store = Arc::new(MemoryStore::new());
        let roomy = LocalCache::new(store.clone(), 1 << 20, 50);
        roomy.write("office/Docs_1", &[file("a", "office/Docs_1")]).unwrap();

        let full = LocalCache::new(store.clone(), store.estimate_size(), 50);
        let err = full.park_subtree("1", "office/Docs_1").unwrap_err();
        assert!(matches!(err, WorkspaceError::QuotaExceeded { .. }));
        assert_eq!(full.location_keys(), vec!["office/Docs_1".to_string()]);
        assert!(!full.has_parked("1"));
    }

    #[test]
    fn usage_summary() {
        let usage = CacheUsage {
            occupied_bytes: 1536,
            quota_bytes: 5 * 1024 * 1024,
            buckets: 3,
        };
        assert_eq!(CacheUsage::format_size(1536), "1.50 KB");
        assert!(usage.summary().starts_with("1.50 KB of 5.00 MB used"));
    }
}
