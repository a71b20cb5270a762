//! Soft delete, restore and permanent delete over the local cache.
//!
//! An entry moves `Active(location) -> Trashed(original, deleted_at)` and from
//! there either back to its original location or out of the cache for good.
//! Trash lives only in the cache under [`TRASH_KEY`].

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::LocalCache;
use crate::error::{BatchReport, Result, WorkspaceError};
use crate::model::{Entry, Location, TRASH_KEY};

pub struct LifecycleCoordinator {
    cache: Arc<LocalCache>,
}

fn without(entries: Vec<Entry>, ids: &HashSet<&str>) -> Vec<Entry> {
    entries
        .into_iter()
        .filter(|e| !ids.contains(e.id.as_str()))
        .collect()
}

impl LifecycleCoordinator {
    pub fn new(cache: Arc<LocalCache>) -> Self {
        Self { cache }
    }

    pub fn trash(&self) -> Result<Vec<Entry>> {
        self.cache.read(TRASH_KEY)
    }

    pub fn delete(&self, entries: &[Entry], from: &Location) -> Result<Vec<Entry>> {
        self.delete_at(entries, from, Utc::now())
    }

    /// Move `entries` from `from` to trash as one batch.
    ///
    /// The trash bucket is written first; if that fails nothing moves. If the
    /// source bucket write then fails, trash is rolled back.
    pub fn delete_at(&self, entries: &[Entry], from: &Location, now: DateTime<Utc>) -> Result<Vec<Entry>> {
        if from.is_trash() {
            return Err(WorkspaceError::InvalidLocation(
                "entries in trash are deleted permanently".to_string(),
            ));
        }
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let from_key = from.key();
        let stamped: Vec<Entry> = entries
            .iter()
            .cloned()
            .map(|mut e| {
                e.original_path = Some(from_key.clone());
                e.deleted_at = Some(now);
                e.path = TRASH_KEY.to_string();
                e
            })
            .collect();
        let ids: HashSet<&str> = stamped.iter().map(|e| e.id.as_str()).collect();

        let prior_trash = self.cache.read(TRASH_KEY)?;
        let mut next_trash = without(prior_trash.clone(), &ids);
        next_trash.extend(stamped.iter().cloned());
        let next_source = without(self.cache.read(&from_key)?, &ids);

        // Eviction may only take older records; if this batch itself does not
        // fit, the write fails and nothing moves.
        self.cache.write_protected(TRASH_KEY, &next_trash, &ids)?;
        if let Err(err) = self.cache.write(&from_key, &next_source) {
            warn!("Rolling back trash after failed write of {}: {}", from_key, err);
            if let Err(rollback) = self.cache.write(TRASH_KEY, &prior_trash) {
                warn!("Trash rollback failed: {}", rollback);
            }
            return Err(err);
        }

        for entry in stamped.iter().filter(|e| e.is_folder()) {
            let parked = from
                .enter(entry)
                .and_then(|folder| self.cache.park_subtree(&entry.id, &folder.key()));
            match parked {
                Ok(0) => {}
                Ok(n) => debug!("Parked {} cached buckets of folder {}", n, entry.name),
                Err(e) => warn!("Leaving subtree of {} in place: {}", entry.name, e),
            }
        }

        info!("Moved {} entries from {} to trash", stamped.len(), from_key);
        Ok(stamped)
    }

    /// Restore each entry independently; failures stay in trash.
    pub fn restore(&self, entries: &[Entry]) -> Result<BatchReport> {
        let mut report = BatchReport::default();
        for entry in entries {
            match self.restore_one(&entry.id) {
                Ok(()) => report.succeed(entry.id.clone()),
                Err(e) => {
                    warn!("Restore of {} failed: {}", entry.name, e);
                    report.fail(entry.id.clone(), entry.name.clone(), e);
                }
            }
        }
        info!("Restore finished: {}", report.summary());
        Ok(report)
    }

    fn restore_one(&self, id: &str) -> Result<()> {
        let trash = self.cache.read(TRASH_KEY)?;
        let record = trash
            .into_iter()
            .find(|e| e.id == id)
            .ok_or_else(|| WorkspaceError::Cache(format!("{} is not in trash", id)))?;

        let fallback = record.original_path.is_none();
        let target_key = record
            .original_path
            .clone()
            .unwrap_or_else(|| Location::office().key());
        let mut restored = record;
        restored.original_path = None;
        restored.deleted_at = None;
        restored.path = target_key.clone();

        let ids: HashSet<&str> = [id].into_iter().collect();
        let prior_target = self.cache.read(&target_key)?;
        let mut next_target = without(prior_target.clone(), &ids);
        next_target.push(restored.clone());
        self.cache.write_protected(&target_key, &next_target, &ids)?;

        // The target write may have evicted trash; re-read before removing.
        let remaining = without(self.cache.read(TRASH_KEY)?, &ids);
        if let Err(err) = self.cache.write(TRASH_KEY, &remaining) {
            if let Err(rollback) = self.cache.write(&target_key, &prior_target) {
                warn!("Rollback of {} failed: {}", target_key, rollback);
            }
            return Err(err);
        }

        if restored.is_folder() {
            let new_root = if fallback {
                Some(Location::office().enter(&restored)?.key())
            } else {
                None
            };
            if let Err(e) = self.cache.unpark_subtree(id, new_root.as_deref()) {
                warn!("Could not restore cached subtree of {}: {}", restored.name, e);
            }
        }
        debug!("Restored {} to {}", id, target_key);
        Ok(())
    }

    /// Remove entries from trash for good. Ids not in trash are ignored.
    pub fn permanently_delete(&self, entries: &[Entry]) -> Result<usize> {
        let ids: HashSet<&str> = entries.iter().map(|e| e.id.as_str()).collect();
        let trash = self.cache.read(TRASH_KEY)?;
        let (removed, remaining): (Vec<Entry>, Vec<Entry>) =
            trash.into_iter().partition(|e| ids.contains(e.id.as_str()));
        if removed.is_empty() {
            return Ok(0);
        }

        self.cache.write(TRASH_KEY, &remaining)?;
        for entry in &removed {
            self.cache.drop_parked(&entry.id)?;
        }
        info!("Permanently deleted {} entries", removed.len());
        Ok(removed.len())
    }

    pub fn empty_trash(&self) -> Result<usize> {
        let trash = self.cache.read(TRASH_KEY)?;
        for entry in &trash {
            self.cache.drop_parked(&entry.id)?;
        }
        self.cache.remove(TRASH_KEY)?;
        info!("Emptied trash of {} entries", trash.len());
        Ok(trash.len())
    }
}
