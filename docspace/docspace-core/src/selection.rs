//! Multi-select model and the bulk actions it drives.

use bytes::Bytes;
use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::content::ContentResolver;
use crate::error::BatchReport;
use crate::model::Entry;

/// Selected entry ids, valid for exactly one location key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionSet {
    scope: Option<String>,
    ids: BTreeSet<String>,
}

impl SelectionSet {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: Some(scope.into()),
            ids: BTreeSet::new(),
        }
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    /// Flip membership of `id`; returns whether it is now selected.
    pub fn toggle(&mut self, id: &str) -> bool {
        if self.ids.remove(id) {
            false
        } else {
            self.ids.insert(id.to_string());
            true
        }
    }

    pub fn select(&mut self, id: &str) {
        self.ids.insert(id.to_string());
    }

    pub fn select_all<'a, I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.ids.extend(ids.into_iter().map(str::to_string));
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    /// Move to another location; the selection is emptied.
    pub fn rescope(&mut self, scope: impl Into<String>) {
        self.scope = Some(scope.into());
        self.ids.clear();
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkAction {
    Delete,
    Restore,
    PermanentlyDelete,
    Download,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyBinding {
    SelectAll,
    ClearSelection,
    Delete,
}

/// Selected entries that are still listed, in listing order.
pub fn resolve(selection: &SelectionSet, listed: &[Entry]) -> Vec<Entry> {
    let entries: Vec<Entry> = listed
        .iter()
        .filter(|e| selection.contains(&e.id))
        .cloned()
        .collect();
    if entries.len() < selection.len() {
        debug!(
            "Dropped {} selected ids no longer listed",
            selection.len() - entries.len()
        );
    }
    entries
}

#[derive(Debug, Default)]
pub struct DownloadReport {
    pub downloaded: Vec<(Entry, Bytes)>,
    pub report: BatchReport,
}

/// Fetch each entry's bytes in turn; one failure never stops the rest.
pub async fn download(resolver: &dyn ContentResolver, entries: &[Entry]) -> DownloadReport {
    let mut out = DownloadReport::default();
    for entry in entries {
        if entry.is_folder() {
            out.report.fail(entry.id.clone(), entry.name.clone(), "folders cannot be downloaded");
            continue;
        }
        let Some(content) = &entry.content else {
            out.report.fail(entry.id.clone(), entry.name.clone(), "no content available");
            continue;
        };
        match resolver.fetch(content).await {
            Ok(bytes) => {
                out.report.succeed(entry.id.clone());
                out.downloaded.push((entry.clone(), bytes));
            }
            Err(e) => {
                warn!("Download of {} failed: {}", entry.name, e);
                out.report.fail(entry.id.clone(), entry.name.clone(), e);
            }
        }
    }
    out
}
